//! Multiplexer against a real WebSocket server on localhost.

mod common;

use common::MockWsServer;
use mdstream_core::{Interval, StreamKey};
use mdstream_ws::{ConnectionConfig, ConnectionState, Multiplexer, Subscription};
use std::time::Duration;
use tokio::time::timeout;

fn config(url: String) -> ConnectionConfig {
    ConnectionConfig {
        url,
        reconnect_base_delay_ms: 50,
        reconnect_max_delay_ms: 200,
        grace_period_ms: 200,
        ..ConnectionConfig::default()
    }
}

async fn wait_connected(sub: &Subscription) {
    let mut rx = sub.status_receiver();
    timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_connected()))
        .await
        .expect("timed out waiting for connection")
        .unwrap();
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_subscribers_share_one_socket() {
    let server = MockWsServer::start().await;
    let mux = Multiplexer::connect(config(server.url()));
    let key = StreamKey::kline("btcusdt", Interval::OneMinute);

    let mut a = mux.subscribe(key.clone());
    let mut b = mux.subscribe(key.clone());
    wait_connected(&a).await;

    assert_eq!(server.paths(), vec!["/ws/btcusdt@kline_1m".to_string()]);

    server.push(r#"{"e":"kline","k":{"t":60000,"o":"1","h":"2","l":"0.5","c":"1.5","v":"10"}}"#);
    for sub in [&mut a, &mut b] {
        let msg = timeout(Duration::from_secs(5), sub.recv()).await.unwrap().unwrap();
        assert_eq!(msg.key, key);
        assert_eq!(msg.payload["k"]["c"], "1.5");
    }
    assert_eq!(server.connection_count(), 1);

    mux.shutdown().await;
    server.shutdown();
}

#[tokio::test]
async fn test_reconnects_after_outage() {
    let server = MockWsServer::start().await;
    let mux = Multiplexer::connect(config(server.url()));
    let key = StreamKey::depth("ethusdt");

    let mut sub = mux.subscribe(key);
    wait_connected(&sub).await;

    let mut status = sub.status_receiver();
    server.kick_all();
    timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.state == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();

    wait_connected(&sub).await;
    assert_eq!(server.connection_count(), 2);

    server.push(r#"{"b":[["100.0","1"]],"a":[]}"#);
    let msg = timeout(Duration::from_secs(5), sub.recv()).await.unwrap().unwrap();
    assert!(msg.payload["b"].is_array());

    mux.shutdown().await;
    server.shutdown();
}

#[tokio::test]
async fn test_unsubscribe_closes_after_grace_period() {
    let server = MockWsServer::start().await;
    let mux = Multiplexer::connect(config(server.url()));
    let key = StreamKey::depth("solusdt");

    let sub = mux.subscribe(key.clone());
    wait_connected(&sub).await;
    sub.unsubscribe();

    eventually(|| server.close_frames() == 1).await;
    assert_eq!(mux.connection_count(), 0);
    assert_eq!(server.connection_count(), 1);

    server.shutdown();
}

#[tokio::test]
async fn test_outbound_frames_reach_server() {
    let server = MockWsServer::start().await;
    let mux = Multiplexer::connect(config(server.url()));

    let sub = mux.subscribe(StreamKey::depth("bnbusdt"));
    wait_connected(&sub).await;

    sub.sender()
        .send_text(r#"{"method":"LIST_SUBSCRIPTIONS","id":1}"#)
        .await
        .unwrap();

    eventually(|| !server.received().is_empty()).await;
    assert_eq!(
        server.received(),
        vec![r#"{"method":"LIST_SUBSCRIPTIONS","id":1}"#.to_string()]
    );

    mux.shutdown().await;
    server.shutdown();
}
