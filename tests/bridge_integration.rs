// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-instance scenarios: two in-process relay instances joined through
//! the loopback bus, the way two processes share a Redis channel.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use switchboard::test_support::{link_bridges, spawn_http_server, StateBuilder};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct Peer {
    tx: futures_util::stream::SplitSink<WsStream, WsMessage>,
    rx: futures_util::stream::SplitStream<WsStream>,
}

impl Peer {
    async fn connect(addr: &SocketAddr, query: &str) -> anyhow::Result<Self> {
        let url = format!("ws://{addr}/?{query}");
        let (stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| anyhow::anyhow!("ws connect: {e}"))?;
        let (tx, rx) = stream.split();
        Ok(Self { tx, rx })
    }

    async fn send(&mut self, value: &Value) -> anyhow::Result<()> {
        let text = serde_json::to_string(value)?;
        self.tx
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| anyhow::anyhow!("ws send: {e}"))?;
        Ok(())
    }

    async fn recv_signal(&mut self, timeout: Duration) -> anyhow::Result<Value> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| anyhow::anyhow!("ws recv timeout"))?;
            let msg = tokio::time::timeout(remaining, self.rx.next())
                .await
                .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
                .ok_or_else(|| anyhow::anyhow!("ws stream closed"))?
                .map_err(|e| anyhow::anyhow!("ws recv: {e}"))?;
            match msg {
                WsMessage::Text(text) => {
                    let value: Value = serde_json::from_str(&text)?;
                    if value.get("type").and_then(Value::as_str) == Some("ping") {
                        self.send(&json!({"type": "pong"})).await?;
                        continue;
                    }
                    return Ok(value);
                }
                WsMessage::Close(_) => anyhow::bail!("ws closed by server"),
                _ => continue,
            }
        }
    }

    async fn expect_silence(&mut self, dur: Duration) -> anyhow::Result<()> {
        match self.recv_signal(dur).await {
            Ok(value) => anyhow::bail!("expected silence, got {value}"),
            Err(e) if e.to_string().contains("timeout") => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn join(client_id: &str, created_at: i64) -> Value {
    json!({
        "type": "join",
        "data": {"clientId": client_id, "name": client_id.to_uppercase(), "createdAt": created_at}
    })
}

fn message(from: &str, to: &str, payload: &str) -> Value {
    json!({
        "type": "message",
        "data": {"clientId": from, "targetClientId": to, "sessionId": "s1", "payload": payload}
    })
}

/// Two instances wired through the loopback bus, each serving HTTP.
async fn two_instances() -> anyhow::Result<(SocketAddr, SocketAddr)> {
    let (i1, i1_backend) = StateBuilder::new().build_with_bridge();
    let (i2, i2_backend) = StateBuilder::new().build_with_bridge();
    link_bridges(
        (std::sync::Arc::clone(&i1), i1_backend),
        (std::sync::Arc::clone(&i2), i2_backend),
    );
    let (addr1, _h1) = spawn_http_server(i1).await?;
    let (addr2, _h2) = spawn_http_server(i2).await?;
    Ok((addr1, addr2))
}

#[tokio::test]
async fn s6_message_relays_across_instances() -> anyhow::Result<()> {
    let (addr1, addr2) = two_instances().await?;

    let mut a = Peer::connect(&addr1, "room=x").await?;
    a.recv_signal(RECV_TIMEOUT).await?; // connected
    a.send(&join("a", 1)).await?;

    let mut b = Peer::connect(&addr2, "room=x").await?;
    b.recv_signal(RECV_TIMEOUT).await?; // connected
    // Give instance 2's subscription a beat to confirm before publishing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    b.send(&join("b", 2)).await?;

    // B's join crossed the bus into instance 1.
    let seen = a.recv_signal(RECV_TIMEOUT).await?;
    assert_eq!(seen["type"], "join");
    assert_eq!(seen["data"]["clientId"], "b");

    // a is unknown on instance 2, so b's message travels the bus to a.
    b.send(&message("b", "a", "hi over the bus")).await?;
    let msg = a.recv_signal(RECV_TIMEOUT).await?;
    assert_eq!(msg["type"], "message");
    assert_eq!(msg["data"]["payload"], "hi over the bus");
    b.expect_silence(Duration::from_millis(300)).await?;

    // And the reverse direction.
    a.send(&message("a", "b", "right back")).await?;
    let msg = b.recv_signal(RECV_TIMEOUT).await?;
    assert_eq!(msg["data"]["payload"], "right back");

    Ok(())
}

#[tokio::test]
async fn s6_leave_propagates_across_instances() -> anyhow::Result<()> {
    let (addr1, addr2) = two_instances().await?;

    let mut a = Peer::connect(&addr1, "room=x").await?;
    a.recv_signal(RECV_TIMEOUT).await?;
    a.send(&join("a", 1)).await?;

    let mut b = Peer::connect(&addr2, "room=x").await?;
    b.recv_signal(RECV_TIMEOUT).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    b.send(&join("b", 2)).await?;
    a.recv_signal(RECV_TIMEOUT).await?; // join(b)

    b.send(&json!({"type": "leave", "data": {"clientId": "b", "createdAt": 2}})).await?;

    let leave = a.recv_signal(RECV_TIMEOUT).await?;
    assert_eq!(leave["type"], "leave");
    assert_eq!(leave["data"]["clientId"], "b");

    Ok(())
}

#[tokio::test]
async fn rooms_are_isolated_on_the_bus() -> anyhow::Result<()> {
    let (addr1, addr2) = two_instances().await?;

    let mut a = Peer::connect(&addr1, "room=x").await?;
    a.recv_signal(RECV_TIMEOUT).await?;
    a.send(&join("a", 1)).await?;

    // A joins a *different* room on the other instance.
    let mut c = Peer::connect(&addr2, "room=z").await?;
    c.recv_signal(RECV_TIMEOUT).await?;
    c.send(&join("c", 3)).await?;

    // Nothing from room z reaches room x.
    a.expect_silence(Duration::from_millis(300)).await?;

    Ok(())
}
