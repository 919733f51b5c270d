// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rooms and per-room client records.
//!
//! A room exclusively owns its client records; all mutation happens under
//! the room's `clients` lock (single writer per room). Records hold a
//! write-capable session handle, a pong timestamp for the liveness
//! supervisor, an optional grace token while pending eviction, and a capped
//! FIFO cache of envelopes that could not be written.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;
use crate::signal::ClientDescriptor;

/// Commands consumed by a session's writer task.
#[derive(Debug)]
pub enum Outbound {
    /// A text frame to write to the socket.
    Frame(String),
    /// Close the socket and end the writer.
    Close,
}

/// Write-capable handle to one live WebSocket session.
///
/// The actual socket sink is owned by the session's writer task; this handle
/// only enqueues. It reads as open while that task is alive, which stands in
/// for the socket's ready state.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Process-unique session id, used to detect rebinding races.
    pub id: u64,
    /// Peer address, for logs.
    pub addr: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SessionHandle {
    pub fn new(id: u64, addr: SocketAddr, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, addr, tx }
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Enqueue a text frame. Returns false if the writer is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.tx.send(Outbound::Frame(frame.to_owned())).is_ok()
    }

    /// Ask the writer to close the socket. Idempotent.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Per-client state inside one room.
pub struct ClientRecord {
    pub descriptor: ClientDescriptor,
    pub session: SessionHandle,
    pub last_pong: Instant,
    /// Set while the record is pending eviction after an ungraceful close.
    pub grace: Option<CancellationToken>,
    cache: VecDeque<String>,
    cache_limit: usize,
}

impl ClientRecord {
    pub fn new(descriptor: ClientDescriptor, session: SessionHandle, cache_limit: usize) -> Self {
        Self {
            descriptor,
            session,
            last_pong: Instant::now(),
            grace: None,
            cache: VecDeque::new(),
            cache_limit,
        }
    }

    /// Write the frame if the session is open, otherwise cache it.
    pub fn deliver_or_cache(&mut self, frame: &str) {
        if self.session.is_open() && self.session.send(frame) {
            return;
        }
        if self.cache.len() >= self.cache_limit {
            self.cache.pop_front();
        }
        self.cache.push_back(frame.to_owned());
        let err = RelayError::SessionNotOpen(self.descriptor.client_id.clone());
        tracing::debug!(err = %err, cached = self.cache.len(), "envelope cached");
    }

    /// Drain cached envelopes in FIFO order into the bound session.
    pub fn flush_cache(&mut self) {
        for frame in self.cache.drain(..) {
            let _ = self.session.send(&frame);
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Client registry for one room, keyed by client id.
#[derive(Default)]
pub struct ClientMap {
    records: HashMap<String, ClientRecord>,
}

impl ClientMap {
    pub fn get(&self, client_id: &str) -> Option<&ClientRecord> {
        self.records.get(client_id)
    }

    pub fn get_mut(&mut self, client_id: &str) -> Option<&mut ClientRecord> {
        self.records.get_mut(client_id)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.records.contains_key(client_id)
    }

    /// Create a fresh record with `last_pong = now`, no grace timer, and an
    /// empty cache. Replaces any record under the same id.
    pub fn install(&mut self, descriptor: ClientDescriptor, session: SessionHandle, cache_limit: usize) {
        let client_id = descriptor.client_id.clone();
        self.records.insert(client_id, ClientRecord::new(descriptor, session, cache_limit));
    }

    /// Remove a record, cancelling any pending grace timer.
    pub fn evict(&mut self, client_id: &str) -> Option<ClientRecord> {
        let mut record = self.records.remove(client_id)?;
        if let Some(token) = record.grace.take() {
            token.cancel();
        }
        Some(record)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ClientRecord)> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut ClientRecord)> {
        self.records.iter_mut()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// A named multiparty session.
pub struct Room {
    pub id: String,
    /// Stored at room creation from the first connector; immutable after.
    pub password_hash: Option<String>,
    clients: Mutex<ClientMap>,
}

impl Room {
    pub fn new(id: impl Into<String>, password_hash: Option<String>) -> Self {
        Self { id: id.into(), password_hash, clients: Mutex::new(ClientMap::default()) }
    }

    pub async fn clients(&self) -> MutexGuard<'_, ClientMap> {
        self.clients.lock().await
    }
}

#[cfg(test)]
#[path = "room_tests.rs"]
mod tests;
