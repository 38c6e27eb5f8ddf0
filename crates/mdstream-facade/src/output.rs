//! Consumer-facing output shapes.

use mdstream_core::{Candle, IndicatorPoint, Volume};
use mdstream_feed::BookSnapshot;
use mdstream_ws::{ConnectionState, LinkStatus};
use serde::Serialize;

/// Everything a chart needs for one candle stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamOutput {
    pub candles: Vec<Candle>,
    pub volumes: Vec<Volume>,
    pub ma: Vec<IndicatorPoint>,
    pub rsi: Vec<IndicatorPoint>,
    pub macd: Vec<IndicatorPoint>,
    pub signal: Vec<IndicatorPoint>,
    pub histogram: Vec<IndicatorPoint>,
    pub boll_upper: Vec<IndicatorPoint>,
    pub boll_lower: Vec<IndicatorPoint>,
    /// True until the history fetch has finished, successfully or not.
    pub loading: bool,
    /// History fetch error. Connection problems are reported in
    /// `connected`/`connection_error` instead.
    pub error: Option<String>,
    pub connected: ConnectionState,
    /// Set when the connection failed; contains "giving up" once retries
    /// are exhausted.
    pub connection_error: Option<String>,
}

impl Default for StreamOutput {
    fn default() -> Self {
        Self {
            candles: Vec::new(),
            volumes: Vec::new(),
            ma: Vec::new(),
            rsi: Vec::new(),
            macd: Vec::new(),
            signal: Vec::new(),
            histogram: Vec::new(),
            boll_upper: Vec::new(),
            boll_lower: Vec::new(),
            loading: true,
            error: None,
            connected: ConnectionState::Connecting,
            connection_error: None,
        }
    }
}

impl StreamOutput {
    pub fn last_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }

    pub fn last_value(line: &[IndicatorPoint]) -> Option<f64> {
        line.last().map(|p| p.value)
    }

    pub fn is_connected(&self) -> bool {
        self.connected == ConnectionState::Connected
    }
}

/// Order book for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthOutput {
    #[serde(flatten)]
    pub book: BookSnapshot,
    pub loading: bool,
    pub error: Option<String>,
    pub connected: ConnectionState,
    pub connection_error: Option<String>,
}

impl Default for DepthOutput {
    fn default() -> Self {
        Self {
            book: BookSnapshot {
                bids: Vec::new(),
                asks: Vec::new(),
                synced: false,
                updated_at: None,
            },
            loading: true,
            error: None,
            connected: ConnectionState::Connecting,
            connection_error: None,
        }
    }
}

impl DepthOutput {
    pub fn is_connected(&self) -> bool {
        self.connected == ConnectionState::Connected
    }
}

pub(crate) fn link_fields(status: &LinkStatus) -> (ConnectionState, Option<String>) {
    (status.state, status.error.clone())
}
