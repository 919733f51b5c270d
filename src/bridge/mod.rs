// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distribution bridge capability.
//!
//! The router talks to a [`Bridge`] handle and never knows whether a backend
//! exists: a disabled bridge swallows every call. The backend task (Redis in
//! production, a loopback bus in tests) consumes [`BridgeCommand`]s and owns
//! the confirmed-subscription set — a room enters the set only once the
//! backend has acknowledged the subscription, and publishes gate on it.

pub mod redis;

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use crate::signal::{self, Signal};

/// Commands sent from the relay core to the bridge backend.
#[derive(Debug)]
pub enum BridgeCommand {
    Subscribe(String),
    Unsubscribe(String),
    Publish { room_id: String, payload: String },
}

/// Receiving side of the bridge, handed to a backend task.
pub struct BridgeBackend {
    pub commands: mpsc::UnboundedReceiver<BridgeCommand>,
    /// Rooms with a backend-confirmed subscription. The backend inserts on
    /// confirmation; the handle removes eagerly on unsubscribe.
    pub subscribed: Arc<RwLock<HashSet<String>>>,
}

/// Handle to the distribution bridge, owned by the relay state.
pub struct Bridge {
    cmd_tx: Option<mpsc::UnboundedSender<BridgeCommand>>,
    subscribed: Arc<RwLock<HashSet<String>>>,
}

impl Bridge {
    /// A bridge with no backend: every operation is a no-op.
    pub fn disabled() -> Self {
        Self { cmd_tx: None, subscribed: Arc::new(RwLock::new(HashSet::new())) }
    }

    /// A connected handle/backend pair.
    pub fn channel() -> (Self, BridgeBackend) {
        let (cmd_tx, commands) = mpsc::unbounded_channel();
        let subscribed = Arc::new(RwLock::new(HashSet::new()));
        let handle = Self { cmd_tx: Some(cmd_tx), subscribed: Arc::clone(&subscribed) };
        (handle, BridgeBackend { commands, subscribed })
    }

    pub fn is_enabled(&self) -> bool {
        self.cmd_tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn is_subscribed(&self, room_id: &str) -> bool {
        self.subscribed.read().map(|set| set.contains(room_id)).unwrap_or(false)
    }

    /// Request a subscription to the room's channel. Idempotent,
    /// fire-and-forget; the set updates once the backend confirms.
    pub fn subscribe(&self, room_id: &str) {
        self.send(BridgeCommand::Subscribe(room_id.to_owned()));
    }

    /// Drop the room's subscription. Idempotent; the room leaves the set
    /// immediately so publishes stop gating through it.
    pub fn unsubscribe(&self, room_id: &str) {
        if let Ok(mut set) = self.subscribed.write() {
            set.remove(room_id);
        }
        self.send(BridgeCommand::Unsubscribe(room_id.to_owned()));
    }

    /// Publish a signal on the room's channel. No-op unless the room is in
    /// the confirmed-subscription set. Only `join`/`leave`/`message` are
    /// ever handed to this by the router.
    pub fn publish(&self, room_id: &str, signal: &Signal) {
        if !self.is_subscribed(room_id) {
            return;
        }
        self.send(BridgeCommand::Publish {
            room_id: room_id.to_owned(),
            payload: signal::encode(signal),
        });
    }

    fn send(&self, cmd: BridgeCommand) {
        if let Some(ref tx) = self.cmd_tx {
            // A dropped backend (connect gave up, or disabled) makes every
            // call a silent no-op.
            let _ = tx.send(cmd);
        }
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
