// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for unit and integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bridge::{Bridge, BridgeBackend, BridgeCommand};
use crate::config::Config;
use crate::room::{Outbound, SessionHandle};
use crate::router;
use crate::signal::{self, ClientDescriptor};
use crate::state::RelayState;

/// Builder for a [`RelayState`] with test-friendly timings.
pub struct StateBuilder {
    config: Config,
}

impl Default for StateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBuilder {
    pub fn new() -> Self {
        let config = Config {
            heartbeat_interval_ms: 1000,
            pong_timeout_ms: 3000,
            disconnect_timeout_ms: 2000,
            ..Default::default()
        };
        Self { config }
    }

    pub fn heartbeat_ms(mut self, ms: u64) -> Self {
        self.config.heartbeat_interval_ms = ms;
        self
    }

    pub fn pong_timeout_ms(mut self, ms: u64) -> Self {
        self.config.pong_timeout_ms = ms;
        self
    }

    pub fn disconnect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.disconnect_timeout_ms = ms;
        self
    }

    pub fn cache_limit(mut self, limit: usize) -> Self {
        self.config.message_cache_limit = limit;
        self
    }

    /// Build with a disabled bridge.
    pub fn build(self) -> Arc<RelayState> {
        Arc::new(RelayState::new(self.config, Bridge::disabled(), CancellationToken::new()))
    }

    /// Build with a connected bridge handle; the caller drives the backend.
    pub fn build_with_bridge(self) -> (Arc<RelayState>, BridgeBackend) {
        let (bridge, backend) = Bridge::channel();
        let state = Arc::new(RelayState::new(self.config, bridge, CancellationToken::new()));
        (state, backend)
    }
}

/// Serve the relay router on an ephemeral local port.
pub async fn spawn_http_server(
    state: Arc<RelayState>,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let router = crate::build_router(state);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    Ok((addr, handle))
}

/// Wire two instances together through an in-memory bus, the way two relay
/// processes share a pub/sub channel. Subscribes confirm immediately; a
/// publish from one instance is delivered to the other iff it is subscribed
/// to the room.
pub fn link_bridges(
    a: (Arc<RelayState>, BridgeBackend),
    b: (Arc<RelayState>, BridgeBackend),
) {
    let (a_state, a_backend) = a;
    let (b_state, b_backend) = b;
    tokio::spawn(pump(a_backend, b_state));
    tokio::spawn(pump(b_backend, a_state));
}

async fn pump(mut backend: BridgeBackend, peer: Arc<RelayState>) {
    while let Some(cmd) = backend.commands.recv().await {
        match cmd {
            BridgeCommand::Subscribe(room_id) => {
                if let Ok(mut set) = backend.subscribed.write() {
                    set.insert(room_id);
                }
            }
            BridgeCommand::Unsubscribe(room_id) => {
                if let Ok(mut set) = backend.subscribed.write() {
                    set.remove(&room_id);
                }
            }
            BridgeCommand::Publish { room_id, payload } => {
                if !peer.bridge.is_subscribed(&room_id) {
                    continue;
                }
                if let Ok(sig) = signal::decode(&payload) {
                    router::dispatch_remote(&peer, &room_id, sig).await;
                }
            }
        }
    }
}

/// A session handle backed by a plain channel, for registry and router
/// tests. The receiver stands in for the writer task: drop it to make the
/// session read as closed.
pub fn fake_session(id: u64) -> (SessionHandle, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let addr: SocketAddr = "127.0.0.1:0".parse().expect("static addr");
    (SessionHandle::new(id, addr, tx), rx)
}

/// A minimal descriptor for tests.
pub fn descriptor(client_id: &str) -> ClientDescriptor {
    ClientDescriptor {
        client_id: client_id.to_owned(),
        name: Some(client_id.to_uppercase()),
        avatar: None,
        created_at: Some(1),
        resume: None,
        rest: serde_json::Map::new(),
    }
}

/// Drain every frame currently queued on a fake session.
pub fn drain_frames(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
    let mut frames = Vec::new();
    while let Ok(out) = rx.try_recv() {
        if let Outbound::Frame(frame) = out {
            frames.push(frame);
        }
    }
    frames
}
