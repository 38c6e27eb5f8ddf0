//! Prometheus metrics for mdstream.
//!
//! Covers:
//! - Connection state per stream key
//! - Reconnects and connect attempts
//! - Message throughput and drops
//! - Series upserts and cache failures
//! - REST requests
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A failure means a
//! duplicate metric name, which is a programming error that should crash at
//! first use rather than silently drop observability. These panics only
//! occur during static initialization.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

/// Connection state per stream key (1 = connected).
pub static WS_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "mdstream_ws_connected",
        "WebSocket connection state per stream key (1=connected)",
        &["key"]
    )
    .unwrap()
});

/// Connection state machine, one-hot per stream key.
/// Labels: key, state (connecting/connected/disconnected)
pub static WS_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "mdstream_ws_state",
        "Connection state machine current state (1=active, 0=inactive)",
        &["key", "state"]
    )
    .unwrap()
});

pub static WS_CONNECT_ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdstream_ws_connect_attempts_total",
        "Total physical connect attempts",
        &["key"]
    )
    .unwrap()
});

/// Labels: key, reason (error/closed_by_server/heartbeat/exhausted)
pub static WS_RECONNECT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdstream_ws_reconnect_total",
        "Total reconnections scheduled",
        &["key", "reason"]
    )
    .unwrap()
});

pub static WS_SUBSCRIBERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "mdstream_ws_subscribers",
        "Live subscribers per stream key",
        &["key"]
    )
    .unwrap()
});

pub static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdstream_messages_total",
        "Messages fanned out per stream key",
        &["key"]
    )
    .unwrap()
});

/// Labels: reason (malformed/binary/lagged/unknown_event/stale_book)
pub static MESSAGES_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdstream_messages_dropped_total",
        "Messages dropped before reaching consumers",
        &["reason"]
    )
    .unwrap()
});

/// Labels: symbol, interval, outcome (inserted/updated/evicted)
pub static CANDLE_UPSERTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdstream_candle_upserts_total",
        "Candle upserts by outcome",
        &["symbol", "interval", "outcome"]
    )
    .unwrap()
});

/// Labels: op (read/write/validate)
pub static CACHE_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdstream_cache_errors_total",
        "Series cache failures treated as a miss",
        &["op"]
    )
    .unwrap()
});

pub static REST_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mdstream_rest_requests_total",
        "REST requests by endpoint and outcome",
        &["endpoint", "status"]
    )
    .unwrap()
});

const STATES: [&str; 3] = ["connecting", "connected", "disconnected"];

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    /// Set the one-hot state gauge and the connected flag for a key.
    pub fn ws_state_set(key: &str, state: &str) {
        for s in STATES {
            WS_STATE
                .with_label_values(&[key, s])
                .set(i64::from(s == state));
        }
        WS_CONNECTED
            .with_label_values(&[key])
            .set(i64::from(state == "connected"));
    }

    pub fn ws_connect_attempt(key: &str) {
        WS_CONNECT_ATTEMPTS_TOTAL.with_label_values(&[key]).inc();
    }

    pub fn ws_reconnect(key: &str, reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[key, reason]).inc();
    }

    pub fn ws_subscribers(key: &str, count: usize) {
        WS_SUBSCRIBERS
            .with_label_values(&[key])
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn message_received(key: &str) {
        MESSAGES_TOTAL.with_label_values(&[key]).inc();
    }

    pub fn message_dropped(reason: &str) {
        MESSAGES_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn candle_upsert(symbol: &str, interval: &str, outcome: &str) {
        CANDLE_UPSERTS_TOTAL
            .with_label_values(&[symbol, interval, outcome])
            .inc();
    }

    pub fn cache_error(op: &str) {
        CACHE_ERRORS_TOTAL.with_label_values(&[op]).inc();
    }

    pub fn rest_request(endpoint: &str, status: &str) {
        REST_REQUESTS_TOTAL
            .with_label_values(&[endpoint, status])
            .inc();
    }

    /// Render every registered metric in the text exposition format.
    pub fn encode() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_gauge_is_one_hot() {
        Metrics::ws_state_set("test@kline_1m", "connecting");
        Metrics::ws_state_set("test@kline_1m", "connected");

        let get = |s: &str| WS_STATE.with_label_values(&["test@kline_1m", s]).get();
        assert_eq!(get("connected"), 1);
        assert_eq!(get("connecting"), 0);
        assert_eq!(get("disconnected"), 0);
        assert_eq!(WS_CONNECTED.with_label_values(&["test@kline_1m"]).get(), 1);
    }

    #[test]
    fn test_encode_contains_registered_metric() {
        Metrics::message_dropped("malformed");
        let text = Metrics::encode().unwrap();
        assert!(text.contains("mdstream_messages_dropped_total"));
    }
}
