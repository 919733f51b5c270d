// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redis-backed bridge task.
//!
//! Holds two connections: a multiplexed connection for PUBLISH and a split
//! pub/sub connection whose sink half subscribes and unsubscribes while the
//! stream half yields inbound messages. Connection setup retries with
//! linear backoff; after the final failure the task exits, the command
//! channel closes, and the bridge handle degrades to a no-op for the rest
//! of the process.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub, PubSubSink};
use redis::AsyncCommands;

use crate::bridge::{BridgeBackend, BridgeCommand};
use crate::error::RelayError;
use crate::router;
use crate::signal;
use crate::state::RelayState;

const CONNECT_ATTEMPTS: u64 = 5;
const BACKOFF_BASE: Duration = Duration::from_millis(500);

fn channel_name(room_id: &str) -> String {
    format!("room:{room_id}")
}

/// Spawn the bridge backend. Runs until shutdown or a dead subscription
/// stream.
pub fn spawn(url: String, state: Arc<RelayState>, backend: BridgeBackend) {
    tokio::spawn(async move {
        run(url, state, backend).await;
    });
}

async fn connect(url: &str) -> Result<(MultiplexedConnection, PubSub), redis::RedisError> {
    let client = redis::Client::open(url)?;
    let publish = client.get_multiplexed_tokio_connection().await?;
    let pubsub = client.get_async_pubsub().await?;
    Ok((publish, pubsub))
}

async fn connect_with_backoff(url: &str) -> Option<(MultiplexedConnection, PubSub)> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        match connect(url).await {
            Ok(pair) => {
                tracing::info!("bridge connected to redis");
                return Some(pair);
            }
            Err(e) => {
                tracing::warn!(attempt, err = %e, "redis connect failed");
                if attempt < CONNECT_ATTEMPTS {
                    tokio::time::sleep(BACKOFF_BASE * attempt as u32).await;
                }
            }
        }
    }
    None
}

async fn run(url: String, state: Arc<RelayState>, backend: BridgeBackend) {
    let BridgeBackend { commands: mut cmd_rx, subscribed } = backend;

    let Some((mut publish, pubsub)) = connect_with_backoff(&url).await else {
        let err = RelayError::PubSubUnavailable(format!(
            "giving up after {CONNECT_ATTEMPTS} attempts"
        ));
        tracing::error!("{err}; bridge disabled");
        // Dropping the command receiver makes every publish/subscribe call
        // from here on a no-op.
        return;
    };
    let (mut sink, mut stream) = pubsub.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                handle_command(cmd, &mut sink, &mut publish, &subscribed).await;
            }
            msg = stream.next() => {
                let Some(msg) = msg else {
                    tracing::warn!("redis subscription stream ended, bridge disabled");
                    break;
                };
                handle_inbound(&state, msg).await;
            }
        }
    }
}

async fn handle_command(
    cmd: BridgeCommand,
    sink: &mut PubSubSink,
    publish: &mut MultiplexedConnection,
    subscribed: &std::sync::RwLock<std::collections::HashSet<String>>,
) {
    match cmd {
        BridgeCommand::Subscribe(room_id) => {
            match sink.subscribe(channel_name(&room_id)).await {
                Ok(()) => {
                    if let Ok(mut set) = subscribed.write() {
                        set.insert(room_id.clone());
                    }
                    tracing::debug!(room = %room_id, "subscribed");
                }
                Err(e) => {
                    tracing::warn!(room = %room_id, err = %e, "subscribe failed");
                }
            }
        }
        BridgeCommand::Unsubscribe(room_id) => {
            // The handle already removed the room from the set.
            if let Err(e) = sink.unsubscribe(channel_name(&room_id)).await {
                tracing::warn!(room = %room_id, err = %e, "unsubscribe failed");
            }
        }
        BridgeCommand::Publish { room_id, payload } => {
            if let Err(e) = publish.publish::<_, _, ()>(channel_name(&room_id), payload).await {
                tracing::warn!(room = %room_id, err = %e, "publish failed");
            }
        }
    }
}

async fn handle_inbound(state: &Arc<RelayState>, msg: redis::Msg) {
    let channel = msg.get_channel_name().to_owned();
    let Some(room_id) = channel.strip_prefix("room:") else {
        tracing::debug!(channel = %channel, "message on unexpected channel dropped");
        return;
    };
    let payload: String = match msg.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(room = %room_id, err = %e, "unreadable bus payload dropped");
            return;
        }
    };
    match signal::decode(&payload) {
        Ok(signal) => router::dispatch_remote(state, room_id, signal).await,
        Err(e) => {
            tracing::warn!(room = %room_id, err = %e, "bad envelope from bus dropped");
        }
    }
}
