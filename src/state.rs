// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bridge::Bridge;
use crate::config::Config;
use crate::room::Room;

/// Shared relay state.
///
/// The room map sits behind one short-lived lock that is never held across
/// I/O; everything inside a room is guarded by that room's own client lock.
/// Lock order is always map, then room.
pub struct RelayState {
    pub config: Config,
    pub bridge: Bridge,
    pub shutdown: CancellationToken,
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    draining: AtomicBool,
    next_session_id: AtomicU64,
}

impl RelayState {
    pub fn new(config: Config, bridge: Bridge, shutdown: CancellationToken) -> Self {
        Self {
            config,
            bridge,
            shutdown,
            rooms: Mutex::new(HashMap::new()),
            draining: AtomicBool::new(false),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub async fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.lock().await.get(room_id).map(Arc::clone)
    }

    /// Get the room, creating it on first sight. A new room stores the
    /// connector's password hash and fires a bridge subscription; an
    /// existing room ignores `password_hash` entirely.
    pub async fn get_or_create_room(
        &self,
        room_id: &str,
        password_hash: Option<String>,
    ) -> Arc<Room> {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(room_id) {
            return Arc::clone(room);
        }
        let room = Arc::new(Room::new(room_id, password_hash));
        rooms.insert(room_id.to_owned(), Arc::clone(&room));
        self.bridge.subscribe(room_id);
        tracing::info!(room = %room_id, "room created");
        room
    }

    /// Remove the room and drop its subscription iff its client map is
    /// empty. Callers must not hold the room's client lock.
    pub async fn drop_room_if_empty(&self, room: &Room) {
        let mut rooms = self.rooms.lock().await;
        if !room.clients().await.is_empty() {
            return;
        }
        if rooms.remove(&room.id).is_some() {
            self.bridge.unsubscribe(&room.id);
            tracing::info!(room = %room.id, "room destroyed");
        }
    }

    pub async fn snapshot_rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.lock().await.values().map(Arc::clone).collect()
    }

    /// Graceful shutdown: evict every record, cancel pending grace timers,
    /// close every session, and drop all subscriptions. Idempotent.
    pub async fn drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
        let rooms: Vec<Arc<Room>> = {
            let mut map = self.rooms.lock().await;
            map.drain().map(|(_, room)| room).collect()
        };
        for room in rooms {
            let mut clients = room.clients().await;
            for (_, record) in clients.iter_mut() {
                if let Some(token) = record.grace.take() {
                    token.cancel();
                }
                record.session.close();
            }
            clients.clear();
            self.bridge.unsubscribe(&room.id);
        }
    }
}
