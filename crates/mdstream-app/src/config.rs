//! Application configuration.
//!
//! Loaded from a TOML file and layered with `MDSTREAM__`-prefixed
//! environment variables, e.g. `MDSTREAM__WEBSOCKET__GRACE_PERIOD_MS=500`.
//! Every field has a default, so an empty file is a valid (if useless)
//! configuration until `validate` checks it.

use crate::error::{AppError, AppResult};
use mdstream_core::Interval;
use mdstream_facade::{DepthStreamConfig, MarketStreamConfig};
use mdstream_indicators::IndicatorConfig;
use mdstream_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "MDSTREAM";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// REST API root.
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// WebSocket root; streams are dialed at `{ws_url}/ws/{key}`.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Candle streams.
    #[serde(default)]
    pub streams: Vec<StreamEntry>,
    /// Order-book streams.
    #[serde(default)]
    pub depth: Vec<DepthEntry>,
    #[serde(default)]
    pub series: SeriesConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_rest_url() -> String {
    "https://api.binance.com/api/v3".to_string()
}

fn default_ws_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEntry {
    pub symbol: String,
    pub interval: Interval,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthEntry {
    pub symbol: String,
    /// Levels kept per side. Default: 20.
    #[serde(default = "default_depth")]
    pub depth: usize,
}

fn default_depth() -> usize {
    20
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    /// Bars fetched on startup. Default: 500.
    pub history_limit: usize,
    /// Bars fetched after a reconnect. Default: 100.
    pub backfill_limit: usize,
    /// Bars held in memory per stream. Default: 1000.
    pub max_len: usize,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            history_limit: 500,
            backfill_limit: 100,
            max_len: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub connect_timeout_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// 0 retries forever.
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub grace_period_ms: u64,
    pub channel_capacity: usize,
    pub max_outbound_per_sec: u32,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 120_000,
            max_reconnect_attempts: 20,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            grace_period_ms: 3_000,
            channel_capacity: 1_024,
            max_outbound_per_sec: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Minimum time between cache writes. Default: 5000.
    pub flush_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("data/cache"),
            flush_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub log_level: Option<String>,
    /// Period of the per-stream summary line. Default: 10000.
    pub summary_interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            summary_interval_ms: 10_000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            ws_url: default_ws_url(),
            streams: Vec::new(),
            depth: Vec::new(),
            series: SeriesConfig::default(),
            websocket: WebSocketConfig::default(),
            indicators: IndicatorConfig::default(),
            cache: CacheConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `path` (if it exists) plus environment overrides.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        }
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Parse TOML text without environment overrides.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> AppResult<()> {
        if self.streams.is_empty() && self.depth.is_empty() {
            return Err(AppError::Config(
                "no [[streams]] or [[depth]] entries configured".to_string(),
            ));
        }
        if let Some(bad) = self.streams.iter().find(|s| s.symbol.trim().is_empty()) {
            return Err(AppError::Config(format!("stream with empty symbol: {bad:?}")));
        }
        if let Some(bad) = self
            .depth
            .iter()
            .find(|d| d.symbol.trim().is_empty() || d.depth == 0)
        {
            return Err(AppError::Config(format!("invalid depth entry: {bad:?}")));
        }
        if self.series.history_limit == 0 || self.series.max_len == 0 {
            return Err(AppError::Config(
                "series.history_limit and series.max_len must be positive".to_string(),
            ));
        }
        let ws = &self.websocket;
        if ws.reconnect_base_delay_ms == 0 || ws.reconnect_base_delay_ms > ws.reconnect_max_delay_ms
        {
            return Err(AppError::Config(format!(
                "websocket reconnect delays must satisfy 0 < base ({}) <= max ({})",
                ws.reconnect_base_delay_ms, ws.reconnect_max_delay_ms
            )));
        }
        if ws.heartbeat_interval_ms == 0 || ws.heartbeat_timeout_ms == 0 {
            return Err(AppError::Config(
                "websocket heartbeat interval and timeout must be positive".to_string(),
            ));
        }
        if ws.channel_capacity == 0 || ws.max_outbound_per_sec == 0 {
            return Err(AppError::Config(
                "websocket channel_capacity and max_outbound_per_sec must be positive".to_string(),
            ));
        }
        if self.cache.flush_interval_ms == 0 {
            return Err(AppError::Config(
                "cache.flush_interval_ms must be positive".to_string(),
            ));
        }
        self.indicators
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        let ws = &self.websocket;
        ConnectionConfig {
            url: self.ws_url.clone(),
            connect_timeout_ms: ws.connect_timeout_ms,
            max_reconnect_attempts: ws.max_reconnect_attempts,
            reconnect_base_delay_ms: ws.reconnect_base_delay_ms,
            reconnect_max_delay_ms: ws.reconnect_max_delay_ms,
            heartbeat_interval_ms: ws.heartbeat_interval_ms,
            heartbeat_timeout_ms: ws.heartbeat_timeout_ms,
            grace_period_ms: ws.grace_period_ms,
            channel_capacity: ws.channel_capacity,
            max_outbound_per_sec: ws.max_outbound_per_sec,
        }
    }

    pub fn market_stream_configs(&self) -> Vec<MarketStreamConfig> {
        self.streams
            .iter()
            .map(|s| MarketStreamConfig {
                history_limit: self.series.history_limit,
                backfill_limit: self.series.backfill_limit,
                max_len: self.series.max_len,
                indicators: self.indicators.clone(),
                flush_interval: Duration::from_millis(self.cache.flush_interval_ms),
                ..MarketStreamConfig::new(s.symbol.clone(), s.interval)
            })
            .collect()
    }

    pub fn depth_stream_configs(&self) -> Vec<DepthStreamConfig> {
        self.depth
            .iter()
            .map(|d| DepthStreamConfig::new(d.symbol.clone(), d.depth))
            .collect()
    }
}
