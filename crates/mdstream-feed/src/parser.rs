//! Message parsing for live stream payloads.
//!
//! Recognised shapes:
//! 1. Candle: `{"k": {"t": openTimeMs, "o", "h", "l", "c", "v", "x"?}}`
//! 2. Depth delta: `{"b": [[price, qty]...], "a": [[price, qty]...]}`,
//!    optionally with `U`/`u` update ids
//! 3. Partial depth: `{"lastUpdateId", "bids": [...], "asks": [...]}`, a
//!    complete top-N view that replaces the book rather than patching it
//!
//! Subscription acknowledgements (`{"result": ..., "id": ...}`) are
//! recognised and skipped.

use crate::error::{FeedError, FeedResult};
use crate::order_book::DepthSnapshot;
use crate::serde_helpers::{de_f64, de_i64, parse_levels};
use mdstream_core::{Bar, Candle, OrderBookLevel};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Parse counters.
#[derive(Debug, Default)]
pub struct ParseStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    ignored: AtomicU64,
}

impl ParseStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Deserialize)]
struct RawKlineEvent {
    #[serde(rename = "s", default)]
    symbol: Option<String>,
    k: RawKline,
}

#[derive(Debug, Deserialize)]
struct RawKline {
    #[serde(rename = "t", deserialize_with = "de_i64")]
    open_time_ms: i64,
    #[serde(rename = "o", deserialize_with = "de_f64")]
    open: f64,
    #[serde(rename = "h", deserialize_with = "de_f64")]
    high: f64,
    #[serde(rename = "l", deserialize_with = "de_f64")]
    low: f64,
    #[serde(rename = "c", deserialize_with = "de_f64")]
    close: f64,
    #[serde(rename = "v", deserialize_with = "de_f64")]
    volume: f64,
    #[serde(rename = "i", default)]
    interval: Option<String>,
    #[serde(rename = "x", default)]
    is_closed: bool,
}

/// One candle update. The open bar is revised by many ticks until the
/// exchange marks it closed.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineTick {
    pub symbol: Option<String>,
    pub interval: Option<String>,
    pub bar: Bar,
    pub is_closed: bool,
}

/// Incremental order-book change. A zero quantity removes the level.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DepthDelta {
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub first_update_id: Option<u64>,
    pub final_update_id: Option<u64>,
}

/// Parsed live event.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Kline(KlineTick),
    Depth(DepthDelta),
    /// Full top-N book; levels absent from it are gone.
    Snapshot(DepthSnapshot),
}

/// Parser for live stream payloads.
#[derive(Debug, Default)]
pub struct MessageParser {
    stats: ParseStats,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    /// Parse a payload.
    ///
    /// Returns `Ok(None)` for control frames that carry no market data.
    pub fn parse(&self, payload: &Value) -> FeedResult<Option<FeedEvent>> {
        let result = Self::classify(payload);
        match &result {
            Ok(Some(_)) => self.stats.accepted.fetch_add(1, Ordering::Relaxed),
            Ok(None) => self.stats.ignored.fetch_add(1, Ordering::Relaxed),
            Err(e) => {
                warn!(error = %e, "Rejected payload");
                self.stats.rejected.fetch_add(1, Ordering::Relaxed)
            }
        };
        result
    }

    fn classify(payload: &Value) -> FeedResult<Option<FeedEvent>> {
        let Some(obj) = payload.as_object() else {
            return Err(FeedError::UnknownEvent(truncate(payload)));
        };

        if obj.contains_key("k") {
            return parse_kline(payload).map(|t| Some(FeedEvent::Kline(t)));
        }
        if obj.contains_key("b") || obj.contains_key("a") {
            return parse_depth(payload).map(|d| Some(FeedEvent::Depth(d)));
        }
        if obj.contains_key("bids") || obj.contains_key("asks") {
            return parse_partial_depth(payload).map(|s| Some(FeedEvent::Snapshot(s)));
        }
        if obj.contains_key("result") && obj.contains_key("id") {
            debug!(?payload, "Subscription acknowledgement");
            return Ok(None);
        }

        Err(FeedError::UnknownEvent(truncate(payload)))
    }
}

/// Parse a candle payload and validate the bar.
pub fn parse_kline(payload: &Value) -> FeedResult<KlineTick> {
    let raw = RawKlineEvent::deserialize(payload)
        .map_err(|e| FeedError::ParseError(format!("kline: {e}")))?;
    let k = raw.k;

    if k.open_time_ms < 0 {
        return Err(FeedError::InvalidData(format!(
            "negative open time {}",
            k.open_time_ms
        )));
    }
    let candle = Candle::new(k.open_time_ms / 1000, k.open, k.high, k.low, k.close);
    if !candle.is_well_formed() {
        return Err(FeedError::InvalidData(format!("inconsistent OHLC {candle:?}")));
    }
    if k.volume < 0.0 {
        return Err(FeedError::InvalidData(format!("negative volume {}", k.volume)));
    }

    Ok(KlineTick {
        symbol: raw.symbol,
        interval: k.interval,
        bar: Bar::new(candle, k.volume),
        is_closed: k.is_closed,
    })
}

/// Parse a diff-depth payload.
pub fn parse_depth(payload: &Value) -> FeedResult<DepthDelta> {
    let bids = parse_levels(&payload["b"]).map_err(FeedError::ParseError)?;
    let asks = parse_levels(&payload["a"]).map_err(FeedError::ParseError)?;
    Ok(DepthDelta {
        bids,
        asks,
        first_update_id: payload["U"].as_u64(),
        final_update_id: payload["u"].as_u64(),
    })
}

/// Parse a partial-book payload.
pub fn parse_partial_depth(payload: &Value) -> FeedResult<DepthSnapshot> {
    let bids = parse_levels(&payload["bids"]).map_err(FeedError::ParseError)?;
    let asks = parse_levels(&payload["asks"]).map_err(FeedError::ParseError)?;
    Ok(DepthSnapshot {
        last_update_id: payload["lastUpdateId"].as_u64(),
        bids,
        asks,
    })
}

fn truncate(payload: &Value) -> String {
    let text = payload.to_string();
    match text.char_indices().nth(120) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdstream_core::{Direction, Price};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn kline_payload(t: i64, o: &str, c: &str, closed: bool) -> Value {
        json!({
            "e": "kline",
            "s": "BTCUSDT",
            "k": {"t": t, "i": "1m", "o": o, "h": "110", "l": "90", "c": c, "v": "12.5", "x": closed}
        })
    }

    #[test]
    fn test_parse_kline() {
        let parser = MessageParser::new();
        let event = parser
            .parse(&kline_payload(1_700_000_040_000, "100", "105", false))
            .unwrap()
            .unwrap();

        let FeedEvent::Kline(tick) = event else {
            panic!("expected kline");
        };
        assert_eq!(tick.bar.candle.time, 1_700_000_040);
        assert_eq!(tick.bar.candle.close, 105.0);
        assert_eq!(tick.bar.volume.value, 12.5);
        assert_eq!(tick.bar.volume.color, Direction::Up);
        assert_eq!(tick.symbol.as_deref(), Some("BTCUSDT"));
        assert!(!tick.is_closed);
        assert_eq!(parser.stats().accepted(), 1);
    }

    #[test]
    fn test_parse_minimal_kline_numeric_fields() {
        let payload = json!({"k": {"t": 60000, "o": 1.0, "h": 2.0, "l": 0.5, "c": 0.8, "v": 3}});
        let tick = parse_kline(&payload).unwrap();
        assert_eq!(tick.bar.candle.time, 60);
        assert_eq!(tick.bar.volume.color, Direction::Down);
        assert!(!tick.is_closed);
    }

    #[test]
    fn test_kline_missing_field_rejected() {
        let parser = MessageParser::new();
        let payload = json!({"k": {"t": 60000, "o": "1", "h": "2", "l": "0.5"}});
        assert!(matches!(parser.parse(&payload), Err(FeedError::ParseError(_))));
        assert_eq!(parser.stats().rejected(), 1);
    }

    #[test]
    fn test_kline_inconsistent_ohlc_rejected() {
        let payload = kline_payload(60_000, "100", "150", true);
        assert!(matches!(parse_kline(&payload), Err(FeedError::InvalidData(_))));
    }

    #[test]
    fn test_parse_depth_delta() {
        let parser = MessageParser::new();
        let payload = json!({
            "e": "depthUpdate", "U": 157, "u": 160,
            "b": [["0.0024", "10"]],
            "a": [["0.0026", "100"], ["0.0027", "0"]]
        });

        let Some(FeedEvent::Depth(delta)) = parser.parse(&payload).unwrap() else {
            panic!("expected depth");
        };
        assert_eq!(delta.bids.len(), 1);
        assert!(delta.asks[1].quantity.is_zero());
        assert_eq!(delta.asks[0].price, Price::new(dec!(0.0026)));
        assert_eq!(delta.first_update_id, Some(157));
        assert_eq!(delta.final_update_id, Some(160));
    }

    #[test]
    fn test_parse_partial_depth() {
        let payload = json!({"lastUpdateId": 9, "bids": [["1", "1"]], "asks": []});
        let Some(FeedEvent::Snapshot(snapshot)) = MessageParser::new().parse(&payload).unwrap()
        else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.last_update_id, Some(9));
        assert_eq!(snapshot.bids.len(), 1);
        assert!(snapshot.asks.is_empty());
    }

    #[test]
    fn test_subscription_ack_ignored() {
        let parser = MessageParser::new();
        assert_eq!(parser.parse(&json!({"result": null, "id": 1})).unwrap(), None);
        assert_eq!(parser.stats().ignored(), 1);
    }

    #[test]
    fn test_unknown_payload_rejected() {
        let parser = MessageParser::new();
        assert!(matches!(
            parser.parse(&json!({"foo": 1})),
            Err(FeedError::UnknownEvent(_))
        ));
        assert!(parser.parse(&json!([1, 2])).is_err());
    }
}
