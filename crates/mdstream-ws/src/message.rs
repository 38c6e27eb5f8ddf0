//! Inbound message envelope.

use crate::error::{WsError, WsResult};
use chrono::{DateTime, Utc};
use mdstream_core::StreamKey;
use serde_json::Value;
use std::sync::Arc;

/// One parsed payload, fanned out to every subscriber of `key`.
///
/// The payload is shared behind an `Arc` so fan-out clones stay cheap.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub key: StreamKey,
    pub payload: Arc<Value>,
    pub received_at: DateTime<Utc>,
}

impl StreamMessage {
    pub fn new(key: StreamKey, payload: Value) -> Self {
        Self {
            key,
            payload: Arc::new(payload),
            received_at: Utc::now(),
        }
    }
}

/// Parse a text frame into a JSON payload.
///
/// Combined-stream frames (`{"stream": "...", "data": {...}}`) are unwrapped
/// to their `data` member. Only objects and arrays are accepted.
pub fn parse_frame(text: &str) -> WsResult<Value> {
    let value: Value = serde_json::from_str(text)?;

    let value = match value {
        Value::Object(mut map) if map.contains_key("stream") && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };

    match value {
        Value::Object(_) | Value::Array(_) => Ok(value),
        other => Err(WsError::ParseError(format!(
            "expected JSON object or array, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_object() {
        let v = parse_frame(r#"{"e":"kline","k":{"t":1}}"#).unwrap();
        assert_eq!(v["e"], "kline");
    }

    #[test]
    fn test_parse_unwraps_combined_stream() {
        let v = parse_frame(r#"{"stream":"btcusdt@depth","data":{"b":[],"a":[]}}"#).unwrap();
        assert_eq!(v, json!({"b": [], "a": []}));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_frame("not json"), Err(WsError::Json(_))));
        assert!(matches!(parse_frame("42"), Err(WsError::ParseError(_))));
        assert!(parse_frame(r#"{"stream":"x","data":null}"#).is_err());
    }
}
