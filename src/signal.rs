// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signal envelope codec.
//!
//! Envelopes are JSON text frames of shape `{"type": ..., "data": ...}`,
//! modeled as an internally-tagged enum. The same envelopes travel over the
//! WebSocket and, for `join`/`leave`/`message`, over the pub/sub channel.
//! Arbitrary extra payload fields round-trip untouched; the relay never
//! inspects payload semantics.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

/// Identity and metadata a peer advertises on `join`.
///
/// Stored verbatim on the client record and echoed back in `join`/`leave`
/// fan-out; the server never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDescriptor {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Client-supplied creation time, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Set by a reconnecting peer to reattach to its prior record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<bool>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// Point-to-point payload carried by a `message` envelope.
///
/// Only `targetClientId` is read by the relay; everything else passes
/// through opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub target_client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// A signaling envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signal {
    /// Sent once by the server after upgrade; carries the room's stored
    /// password hash (or null).
    Connected { data: Option<String> },
    Join { data: ClientDescriptor },
    Leave { data: ClientDescriptor },
    Message { data: MessagePayload },
    Ping,
    Pong,
}

const KNOWN_TYPES: &[&str] = &["connected", "join", "leave", "message", "ping", "pong"];

/// Decode a text frame into a [`Signal`].
///
/// Distinguishes a recognized tag with a bad data shape (`MalformedFrame`)
/// from a tag the protocol does not define (`UnknownSignalType`). Either way
/// the caller logs and drops the frame; decode failures never close a
/// session.
pub fn decode(text: &str) -> Result<Signal, RelayError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RelayError::MalformedFrame(format!("not json: {e}")))?;
    let Some(ty) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
        return Err(RelayError::MalformedFrame("missing type".to_owned()));
    };
    if !KNOWN_TYPES.contains(&ty.as_str()) {
        return Err(RelayError::UnknownSignalType(ty));
    }
    serde_json::from_value(value)
        .map_err(|e| RelayError::MalformedFrame(format!("bad {ty} data: {e}")))
}

/// Encode a [`Signal`] as a text frame.
pub fn encode(signal: &Signal) -> String {
    // Serialization of these types cannot fail (string keys throughout);
    // fall back to an empty object rather than panicking in the relay path.
    serde_json::to_string(signal).unwrap_or_else(|_| "{}".to_owned())
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod tests;
