// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness supervisor.
//!
//! One background task per process. Every `HEARTBEAT_INTERVAL` it sweeps all
//! rooms: sessions past the pong deadline get a close (which drives them
//! into the grace period), the rest get a `ping`. Sessions already closed —
//! records waiting out their grace timer — are skipped, and pings are never
//! cached.

use std::sync::Arc;

use crate::signal::{self, Signal};
use crate::state::RelayState;

/// Spawn the heartbeat sweep task. Runs until shutdown.
pub fn spawn(state: Arc<RelayState>) {
    let interval = state.config.heartbeat_interval();
    let pong_timeout = state.config.pong_timeout();

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let ping = signal::encode(&Signal::Ping);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            for room in state.snapshot_rooms().await {
                let mut clients = room.clients().await;
                for (client_id, record) in clients.iter_mut() {
                    if !record.session.is_open() {
                        continue;
                    }
                    if record.last_pong.elapsed() > pong_timeout {
                        tracing::warn!(
                            room = %room.id,
                            client = %client_id,
                            "pong deadline passed, closing session"
                        );
                        record.session.close();
                    } else {
                        let _ = record.session.send(&ping);
                    }
                }
            }
        }
    });
}
