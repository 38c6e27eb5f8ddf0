//! Shared fixtures for facade tests.

#![allow(dead_code)]

use mdstream_core::{Bar, Candle};
use mdstream_indicators::IndicatorConfig;
use mdstream_ws::testing::{MemoryConnector, ServerEnd};
use mdstream_ws::{ConnectionConfig, Multiplexer};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub fn ws_config() -> ConnectionConfig {
    ConnectionConfig {
        max_reconnect_attempts: 0,
        reconnect_base_delay_ms: 100,
        reconnect_max_delay_ms: 1_600,
        grace_period_ms: 3_000,
        ..ConnectionConfig::default()
    }
}

pub fn setup() -> (
    Multiplexer,
    Arc<MemoryConnector>,
    mpsc::UnboundedReceiver<ServerEnd>,
) {
    let (connector, sessions) = MemoryConnector::new();
    let connector = Arc::new(connector);
    let mux = Multiplexer::new(ws_config(), connector.clone());
    (mux, connector, sessions)
}

pub fn small_indicators() -> IndicatorConfig {
    IndicatorConfig {
        ma_period: 3,
        rsi_period: 3,
        macd_short: 2,
        macd_long: 4,
        macd_signal: 2,
        boll_period: 3,
        boll_std_dev: 2.0,
    }
}

pub fn bar(time: i64, close: f64) -> Bar {
    Bar::new(Candle::new(time, close, close, close, close), 2.0)
}

/// Bars at 60, 120, ... with closes cycling around 100.
pub fn history(count: i64) -> Vec<Bar> {
    (1..=count)
        .map(|i| bar(60 * i, 100.0 + (i % 5) as f64))
        .collect()
}

pub fn kline(time: i64, close: f64, closed: bool) -> Value {
    json!({
        "e": "kline",
        "s": "BTCUSDT",
        "k": {
            "t": time * 1000,
            "i": "1m",
            "o": close.to_string(),
            "h": close.to_string(),
            "l": close.to_string(),
            "c": close.to_string(),
            "v": "1.5",
            "x": closed
        }
    })
}

pub async fn next_session(sessions: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    within(sessions.recv()).await.expect("connector dropped")
}

/// Wait on a watch channel until `pred` holds.
pub async fn wait_until<T, F>(mut rx: watch::Receiver<T>, pred: F) -> T
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    let value = within(rx.wait_for(|v| pred(v)))
        .await
        .expect("output channel closed")
        .clone();
    value
}

pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(120), fut)
        .await
        .expect("timed out")
}
