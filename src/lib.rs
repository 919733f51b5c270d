// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Switchboard: WebSocket signaling relay for peer-to-peer sessions.
//!
//! Clients connect to named rooms via a URL query parameter; the relay
//! tracks membership, fans signals out to room members, forwards targeted
//! payloads, keeps sessions live with heartbeats, supports reconnection
//! with a grace period, and optionally spans instances through a Redis
//! pub/sub bridge.

pub mod bridge;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod room;
pub mod router;
pub mod session;
pub mod signal;
pub mod state;
pub mod test_support;
pub mod tls;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::bridge::Bridge;
use crate::config::Config;
use crate::state::RelayState;

/// Build the axum router. Every path is the signaling endpoint; anything
/// that is not an upgrade with a `room` parameter gets a 404.
pub fn build_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .fallback(session::ws_handler)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the relay until interrupted.
pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let shutdown = CancellationToken::new();
    let (bridge, backend) = match config.redis_url {
        Some(_) => {
            let (bridge, backend) = Bridge::channel();
            (bridge, Some(backend))
        }
        None => (Bridge::disabled(), None),
    };

    let state = Arc::new(RelayState::new(config, bridge, shutdown.clone()));

    if let Some(backend) = backend {
        if let Some(url) = state.config.redis_url.clone() {
            bridge::redis::spawn(url, Arc::clone(&state), backend);
        }
    }
    heartbeat::spawn(Arc::clone(&state));

    // Signal handler: stop accepting, then tear down sessions with no grace
    // windows so the graceful serve can complete.
    {
        let sd = shutdown.clone();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGTERM");
                }
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGINT");
                }
            }
            sd.cancel();
            state.drain().await;
        });
    }

    let router = build_router(Arc::clone(&state));
    let addr = format!("{}:{}", state.config.host, state.config.port);

    if let (Some(cert), Some(key)) = (&state.config.tls_cert_file, &state.config.tls_key_file) {
        let tls = tls::load_server_config(cert, key, &state.config.tls_ca_files)?;
        let rustls_config =
            axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(tls));
        let handle = axum_server::Handle::new();
        {
            let sd = shutdown.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                sd.cancelled().await;
                handle.graceful_shutdown(Some(Duration::from_secs(5)));
            });
        }
        let socket_addr: SocketAddr = addr.parse()?;
        info!("listening on {addr} (tls)");
        axum_server::bind_rustls(socket_addr, rustls_config)
            .handle(handle)
            .serve(router.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
    } else {
        let listener = TcpListener::bind(&addr).await?;
        info!("listening on {addr}");
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
    }

    // Idempotent: the signal task normally drained already.
    state.drain().await;
    info!("shutdown complete");
    Ok(())
}
