//! Response body parsing.

use crate::error::{RestError, RestResult};
use mdstream_core::{Bar, Candle};
use mdstream_feed::serde_helpers::{de_f64, de_i64, parse_levels};
use mdstream_feed::DepthSnapshot;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// `[openTime, open, high, low, close, volume, ...]`; trailing fields are
/// ignored.
#[derive(Debug, Deserialize)]
struct RawKline(
    #[serde(deserialize_with = "de_i64")] i64,
    #[serde(deserialize_with = "de_f64")] f64,
    #[serde(deserialize_with = "de_f64")] f64,
    #[serde(deserialize_with = "de_f64")] f64,
    #[serde(deserialize_with = "de_f64")] f64,
    #[serde(deserialize_with = "de_f64")] f64,
);

/// Parse a kline array. Malformed rows are dropped with a warning; a body
/// that is not an array is an error.
pub fn parse_klines(body: &Value) -> RestResult<Vec<Bar>> {
    let rows = body
        .as_array()
        .ok_or_else(|| RestError::Parse(format!("klines body is not an array: {}", short(body))))?;

    let mut bars = Vec::with_capacity(rows.len());
    for row in rows {
        let head = match row.as_array() {
            Some(fields) if fields.len() >= 6 => Value::Array(fields[..6].to_vec()),
            _ => {
                warn!(row = %short(row), "Dropping kline row");
                continue;
            }
        };
        let raw = match RawKline::deserialize(&head) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(row = %short(row), error = %e, "Dropping kline row");
                continue;
            }
        };
        let candle = Candle::new(raw.0 / 1000, raw.1, raw.2, raw.3, raw.4);
        if raw.0 < 0 || raw.5 < 0.0 || !candle.is_well_formed() {
            warn!(row = %short(row), "Dropping inconsistent kline row");
            continue;
        }
        bars.push(Bar::new(candle, raw.5));
    }
    bars.sort_by_key(|b| b.time());
    Ok(bars)
}

/// Parse `{lastUpdateId?, bids: [[p,q]..], asks: [[p,q]..]}`.
pub fn parse_depth_snapshot(body: &Value) -> RestResult<DepthSnapshot> {
    if !body.is_object() {
        return Err(RestError::Parse(format!(
            "depth body is not an object: {}",
            short(body)
        )));
    }
    let bids = parse_levels(&body["bids"]).map_err(RestError::Parse)?;
    let asks = parse_levels(&body["asks"]).map_err(RestError::Parse)?;
    Ok(DepthSnapshot {
        last_update_id: body["lastUpdateId"].as_u64(),
        bids,
        asks,
    })
}

fn short(value: &Value) -> String {
    let mut text = value.to_string();
    if text.len() > 120 {
        let mut cut = 120;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push('…');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdstream_core::{OrderBookLevel, Price, Size};
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_klines() {
        let body = json!([
            [1700000060000i64, "101.0", "103.0", "100.0", "102.0", "7.5", 1700000119999i64, "0", 10],
            [1700000000000i64, "100.0", "102.0", "99.0", "101.0", "3.0", 1700000059999i64, "0", 5]
        ]);
        let bars = parse_klines(&body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].time(), 1700000000);
        assert_eq!(bars[1].candle, Candle::new(1700000060, 101.0, 103.0, 100.0, 102.0));
        assert_eq!(bars[1].volume.value, 7.5);
    }

    #[test]
    fn test_parse_klines_drops_bad_rows() {
        let body = json!([
            [60000, "1", "2", "0.5", "1.5", "1"],
            [120000, "x", "2", "0.5", "1.5", "1"],
            [180000, "1", "0.5", "2", "1.5", "1"],
            [240000, "1"],
            "garbage"
        ]);
        let bars = parse_klines(&body).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time(), 60);
    }

    #[test]
    fn test_parse_klines_rejects_non_array() {
        assert!(matches!(
            parse_klines(&json!({"code": -1121, "msg": "Invalid symbol."})),
            Err(RestError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_depth_snapshot() {
        let body = json!({
            "lastUpdateId": 1027024,
            "bids": [["4.00000000", "431.00000000"]],
            "asks": [["4.00000200", "12.00000000"]]
        });
        let snapshot = parse_depth_snapshot(&body).unwrap();
        assert_eq!(snapshot.last_update_id, Some(1027024));
        assert_eq!(
            snapshot.bids,
            vec![OrderBookLevel::new(Price::new(dec!(4)), Size::new(dec!(431)))]
        );
        assert_eq!(snapshot.asks[0].price, Price::new(dec!(4.000002)));
    }

    #[test]
    fn test_parse_depth_snapshot_errors() {
        assert!(parse_depth_snapshot(&json!([])).is_err());
        assert!(parse_depth_snapshot(&json!({"bids": [["a", "1"]]})).is_err());
    }
}
