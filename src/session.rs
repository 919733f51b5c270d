// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket upgrade handler and per-connection state machine.
//!
//! One task per session reads frames and drives the room through the
//! registry and router; a second task owns the socket sink and drains the
//! session's outbound channel, so no lock is ever held across a socket
//! write. An ungraceful close parks the record in a grace period during
//! which a `resume`-flagged rejoin can reattach.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::room::{Outbound, Room, SessionHandle};
use crate::router::{self, Origin};
use crate::signal::{self, Signal};
use crate::state::RelayState;

/// Query parameters accepted on upgrade.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub room: Option<String>,
    pub pwd: Option<String>,
}

/// Any-path GET handler: upgrades to a WebSocket when the query supplies
/// `room`; everything else gets HTTP 404.
pub async fn ws_handler(
    State(state): State<Arc<RelayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    query: Result<Query<ConnectQuery>, axum::extract::rejection::QueryRejection>,
    ws: Result<WebSocketUpgrade, axum::extract::ws::rejection::WebSocketUpgradeRejection>,
) -> Response {
    let Ok(ws) = ws else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Ok(Query(query)) = query else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(room_id) = query.room.filter(|room| !room.is_empty()) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if state.is_draining() {
        return StatusCode::NOT_FOUND.into_response();
    }
    ws.on_upgrade(move |socket| run_session(socket, state, room_id, query.pwd, addr))
        .into_response()
}

async fn run_session(
    socket: WebSocket,
    state: Arc<RelayState>,
    room_id: String,
    pwd: Option<String>,
    addr: SocketAddr,
) {
    let session_id = state.next_session_id();
    let room = state.get_or_create_room(&room_id, pwd).await;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let handle = SessionHandle::new(session_id, addr, outbound_tx);
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: sole owner of the sink. Exits on an explicit close, a
    // socket error, or the last handle clone dropping.
    let writer = tokio::spawn(async move {
        while let Some(cmd) = outbound_rx.recv().await {
            match cmd {
                Outbound::Frame(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Opening: announce the room's stored password hash.
    let connected = Signal::Connected { data: room.password_hash.clone() };
    let _ = handle.send(&signal::encode(&connected));
    tracing::info!(room = %room.id, peer = %addr, session = session_id, "session opened");

    let mut bound_client: Option<String> = None;
    let mut explicit_leave = false;

    while let Some(frame) = ws_rx.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(room = %room.id, session = session_id, err = %e, "socket error");
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                handle_frame(
                    &state,
                    &room,
                    &handle,
                    &text,
                    &mut bound_client,
                    &mut explicit_leave,
                )
                .await;
                if explicit_leave {
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // Stop the writer so the handle reads as closed before any grace
    // decision; if the session already left, this is a no-op.
    handle.close();
    let _ = writer.await;

    match bound_client {
        Some(ref client_id) if !explicit_leave => {
            on_socket_closed(&state, &room, client_id, session_id).await;
        }
        _ => {
            // Never joined, or evicted by an explicit leave. A room created
            // just for this connection must not leak.
            state.drop_room_if_empty(&room).await;
        }
    }
    tracing::info!(room = %room.id, session = session_id, "session closed");
}

async fn handle_frame(
    state: &Arc<RelayState>,
    room: &Arc<Room>,
    handle: &SessionHandle,
    text: &str,
    bound_client: &mut Option<String>,
    explicit_leave: &mut bool,
) {
    let signal = match signal::decode(text) {
        Ok(signal) => signal,
        Err(e) => {
            tracing::warn!(room = %room.id, err = %e, "frame dropped");
            return;
        }
    };

    match signal {
        Signal::Join { data } => {
            *bound_client = Some(data.client_id.clone());
            router::local_join(state, room, data, handle.clone()).await;
        }
        Signal::Leave { .. } => {
            // The leave payload is not trusted to name someone else; the
            // session can only remove its own record.
            match bound_client.as_deref() {
                Some(client_id) => router::local_leave(state, room, client_id).await,
                None => tracing::debug!(room = %room.id, "leave before join"),
            }
            // Server-initiated close after leave, for determinism.
            *explicit_leave = true;
            handle.close();
        }
        Signal::Message { data } => match bound_client.as_deref() {
            Some(client_id) => {
                router::route_message(state, room, data, Origin::Local { client_id }).await;
            }
            None => {
                tracing::warn!(room = %room.id, "message before join dropped");
            }
        },
        Signal::Ping | Signal::Pong => {
            if let Some(client_id) = bound_client.as_deref() {
                let mut clients = room.clients().await;
                if let Some(record) = clients.get_mut(client_id) {
                    record.last_pong = Instant::now();
                }
            }
        }
        Signal::Connected { .. } => {
            tracing::debug!(room = %room.id, "unexpected connected frame from peer dropped");
        }
    }
}

/// The socket closed without a `leave`: park the record in its grace period
/// and schedule the eviction, unless a resume already rebound it.
async fn on_socket_closed(
    state: &Arc<RelayState>,
    room: &Arc<Room>,
    client_id: &str,
    session_id: u64,
) {
    if state.is_draining() {
        // Shutdown tears everything down at once; no grace windows.
        return;
    }

    let token = CancellationToken::new();
    {
        let mut clients = room.clients().await;
        let Some(record) = clients.get_mut(client_id) else {
            return;
        };
        if record.session.id != session_id {
            // A resume rebound the record to a newer session.
            return;
        }
        if let Some(prev) = record.grace.replace(token.clone()) {
            prev.cancel();
        }
    }

    let timeout = state.config.disconnect_timeout();
    tracing::info!(
        room = %room.id,
        client = %client_id,
        timeout_ms = timeout.as_millis() as u64,
        "connection lost, grace period started"
    );

    let state = Arc::clone(state);
    let room = Arc::clone(room);
    let client_id = client_id.to_owned();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                router::evict_after_grace(&state, &room, &client_id, session_id).await;
            }
        }
    });
}
