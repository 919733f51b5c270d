// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fan-out router.
//!
//! Decides, for each signal produced by a local session or consumed from
//! the distribution bridge, which local sessions receive it, what gets
//! cached for sessions that are not open, and what gets re-published.
//! Remote-originated signals are never re-published.

use std::sync::Arc;
use std::time::Instant;

use crate::error::RelayError;
use crate::room::{ClientMap, Room, SessionHandle};
use crate::signal::{self, ClientDescriptor, MessagePayload, Signal};
use crate::state::RelayState;

/// Where a signal entered the relay from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin<'a> {
    /// Produced by a session on this instance.
    Local { client_id: &'a str },
    /// Re-entered from the distribution bridge.
    Remote,
}

/// Deliver a frame to every record, skipping `skip` if given. Open sessions
/// get a write; closed ones get a cache append.
fn fan_out(clients: &mut ClientMap, frame: &str, skip: Option<&str>) {
    for (client_id, record) in clients.iter_mut() {
        if skip == Some(client_id.as_str()) {
            continue;
        }
        record.deliver_or_cache(frame);
    }
}

/// Handle a `join` from a local session: fresh install, resume rebind, or
/// displacement of a prior record under the same client id.
pub async fn local_join(
    state: &RelayState,
    room: &Room,
    desc: ClientDescriptor,
    session: SessionHandle,
) {
    let resume = desc.resume.unwrap_or(false);
    let mut clients = room.clients().await;

    if resume {
        if let Some(record) = clients.get_mut(&desc.client_id) {
            // Reattach: cancel the pending eviction, rebind, and replay
            // whatever queued up while the client was gone. The descriptor
            // stored at first join stays; resume matches on client id only.
            if let Some(token) = record.grace.take() {
                token.cancel();
            }
            if record.session.id != session.id {
                record.session.close();
            }
            record.session = session;
            record.last_pong = Instant::now();
            record.flush_cache();
            tracing::info!(room = %room.id, client = %desc.client_id, "session resumed");
            return;
        }
        // No surviving record; fall through to a fresh install.
    } else if let Some(prior) = clients.evict(&desc.client_id) {
        if prior.session.id != session.id {
            prior.session.close();
        }
        let leave = Signal::Leave { data: prior.descriptor };
        fan_out(&mut clients, &signal::encode(&leave), None);
        state.bridge.publish(&room.id, &leave);
        tracing::info!(room = %room.id, client = %desc.client_id, "prior record displaced by new join");
    }

    // Roster bootstrap: the new session learns every existing member first.
    for (_, record) in clients.iter() {
        let join = Signal::Join { data: record.descriptor.clone() };
        let _ = session.send(&signal::encode(&join));
    }

    let join = Signal::Join { data: desc.clone() };
    let frame = signal::encode(&join);
    fan_out(&mut clients, &frame, None);
    clients.install(desc, session, state.config.message_cache_limit);
    state.bridge.publish(&room.id, &join);
}

/// Handle an explicit `leave` from a local session. The caller closes the
/// socket afterwards.
pub async fn local_leave(state: &RelayState, room: &Room, client_id: &str) {
    let leave = {
        let mut clients = room.clients().await;
        let Some(record) = clients.evict(client_id) else {
            tracing::debug!(room = %room.id, client = %client_id, "leave for unknown client ignored");
            return;
        };
        record.session.close();
        let leave = Signal::Leave { data: record.descriptor };
        fan_out(&mut clients, &signal::encode(&leave), None);
        leave
    };
    state.bridge.publish(&room.id, &leave);
    state.drop_room_if_empty(room).await;
    tracing::info!(room = %room.id, client = %client_id, "client left");
}

/// Evict a record whose grace period ran out. Re-checks under the lock that
/// the record still belongs to the closed session and was not rebound by a
/// resume in the meantime.
pub async fn evict_after_grace(state: &RelayState, room: &Room, client_id: &str, session_id: u64) {
    let leave = {
        let mut clients = room.clients().await;
        let stale = matches!(
            clients.get(client_id),
            Some(record) if record.session.id == session_id && !record.session.is_open()
        );
        if !stale {
            return;
        }
        let Some(record) = clients.evict(client_id) else {
            return;
        };
        let leave = Signal::Leave { data: record.descriptor };
        fan_out(&mut clients, &signal::encode(&leave), None);
        leave
    };
    state.bridge.publish(&room.id, &leave);
    state.drop_room_if_empty(room).await;
    tracing::info!(room = %room.id, client = %client_id, "grace period expired, client evicted");
}

/// Route a `message` envelope to its target.
pub async fn route_message(
    state: &RelayState,
    room: &Room,
    payload: MessagePayload,
    origin: Origin<'_>,
) {
    if let Origin::Local { client_id } = origin {
        if client_id == payload.target_client_id {
            tracing::debug!(room = %room.id, client = %client_id, "self-addressed message dropped");
            return;
        }
    }

    let target = payload.target_client_id.clone();
    let frame = signal::encode(&Signal::Message { data: payload.clone() });
    let mut clients = room.clients().await;
    match clients.get_mut(&target) {
        Some(record) => record.deliver_or_cache(&frame),
        None => {
            drop(clients);
            match origin {
                // The target may live on another instance.
                Origin::Local { .. } => {
                    state.bridge.publish(&room.id, &Signal::Message { data: payload });
                }
                Origin::Remote => {
                    let err = RelayError::UnknownClient(target);
                    tracing::warn!(room = %room.id, err = %err, "message dropped");
                }
            }
        }
    }
}

/// Re-enter a signal consumed from the distribution bridge.
///
/// Joins and leaves whose client id is present locally are this instance's
/// own bus echo (the backend delivers publishes back to every subscriber)
/// and are dropped; the local fan-out already happened.
pub async fn dispatch_remote(state: &Arc<RelayState>, room_id: &str, signal: Signal) {
    let Some(room) = state.room(room_id).await else {
        let err = RelayError::UnknownRoom(room_id.to_owned());
        tracing::warn!(err = %err, "signal dropped");
        return;
    };
    match signal {
        Signal::Join { data } => {
            let mut clients = room.clients().await;
            if clients.contains(&data.client_id) {
                tracing::debug!(room = %room.id, client = %data.client_id, "own join echo dropped");
                return;
            }
            let frame = signal::encode(&Signal::Join { data });
            fan_out(&mut clients, &frame, None);
        }
        Signal::Leave { data } => {
            let mut clients = room.clients().await;
            if clients.contains(&data.client_id) {
                tracing::debug!(room = %room.id, client = %data.client_id, "own leave echo dropped");
                return;
            }
            let frame = signal::encode(&Signal::Leave { data });
            fan_out(&mut clients, &frame, None);
        }
        Signal::Message { data } => {
            route_message(state, &room, data, Origin::Remote).await;
        }
        Signal::Connected { .. } | Signal::Ping | Signal::Pong => {
            tracing::debug!(room = %room.id, "non-forwardable signal from bus dropped");
        }
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
