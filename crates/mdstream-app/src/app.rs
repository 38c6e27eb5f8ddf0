//! Application wiring.
//!
//! Builds the shared multiplexer, REST client and cache, opens every
//! configured stream, logs a periodic summary and tears everything down
//! on Ctrl-C.

use crate::config::AppConfig;
use crate::error::AppResult;
use mdstream_facade::{DepthOutput, DepthStream, MarketStream, StreamOutput};
use mdstream_rest::{MarketDataApi, RestClient};
use mdstream_series::{CacheBackend, FileCache};
use mdstream_ws::Multiplexer;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
}

impl Application {
    /// Validate `config` and create the application.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves, then close every stream and the
    /// multiplexer.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> AppResult<()> {
        let mux = Multiplexer::connect(self.config.connection_config());
        let api: Arc<dyn MarketDataApi> = Arc::new(RestClient::new(self.config.rest_url.clone())?);
        let cache: Option<Arc<dyn CacheBackend>> = if self.config.cache.enabled {
            info!(dir = %self.config.cache.dir.display(), "Series cache enabled");
            Some(Arc::new(FileCache::new(self.config.cache.dir.clone())))
        } else {
            None
        };

        let mut streams = Vec::new();
        for stream_config in self.config.market_stream_configs() {
            let stream = MarketStream::open(stream_config, mux.clone(), api.clone(), cache.clone())?;
            info!(key = %stream.key(), "Candle stream opened");
            tokio::spawn(log_stream_updates(stream.key().to_string(), stream.watch()));
            streams.push(stream);
        }

        let mut books = Vec::new();
        for depth_config in self.config.depth_stream_configs() {
            let book = DepthStream::open(depth_config, mux.clone(), api.clone())?;
            info!(key = %book.key(), "Depth stream opened");
            tokio::spawn(log_depth_updates(book.key().to_string(), book.watch()));
            books.push(book);
        }

        let summary_period = Duration::from_millis(self.config.telemetry.summary_interval_ms.max(1));
        let mut summary = tokio::time::interval(summary_period);
        summary.tick().await;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = summary.tick() => {
                    for stream in &streams {
                        info!("{}", summarize_stream(&stream.key().to_string(), &stream.output()));
                    }
                    for book in &books {
                        info!("{}", summarize_depth(&book.key().to_string(), &book.output()));
                    }
                }
            }
        }

        info!(
            streams = streams.len(),
            books = books.len(),
            "Shutting down"
        );
        for stream in streams {
            stream.close().await;
        }
        for book in books {
            book.close().await;
        }
        mux.shutdown().await;
        info!("Shutdown complete");
        Ok(())
    }
}

async fn log_stream_updates(key: String, mut rx: watch::Receiver<StreamOutput>) {
    while rx.changed().await.is_ok() {
        let out = rx.borrow_and_update();
        debug!(
            key = %key,
            bars = out.candles.len(),
            close = ?out.last_close(),
            rsi = ?StreamOutput::last_value(&out.rsi),
            loading = out.loading,
            connected = out.connected.as_str(),
            "Stream update"
        );
    }
}

async fn log_depth_updates(key: String, mut rx: watch::Receiver<DepthOutput>) {
    while rx.changed().await.is_ok() {
        let out = rx.borrow_and_update();
        debug!(
            key = %key,
            bids = out.book.bids.len(),
            asks = out.book.asks.len(),
            synced = out.book.synced,
            connected = out.connected.as_str(),
            "Depth update"
        );
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

/// One-line human summary of a candle stream.
pub fn summarize_stream(key: &str, out: &StreamOutput) -> String {
    let mut line = format!(
        "{key}: bars={} close={} ma={} rsi={} macd={} signal={} state={}",
        out.candles.len(),
        fmt_opt(out.last_close()),
        fmt_opt(StreamOutput::last_value(&out.ma)),
        fmt_opt(StreamOutput::last_value(&out.rsi)),
        fmt_opt(StreamOutput::last_value(&out.macd)),
        fmt_opt(StreamOutput::last_value(&out.signal)),
        out.connected.as_str(),
    );
    if out.loading {
        line.push_str(" loading");
    }
    if let Some(error) = out.error.as_ref().or(out.connection_error.as_ref()) {
        line.push_str(&format!(" error=\"{error}\""));
    }
    line
}

/// One-line human summary of an order book.
pub fn summarize_depth(key: &str, out: &DepthOutput) -> String {
    let best_bid = out.book.bids.first().map(|l| l.price);
    let best_ask = out.book.asks.first().map(|l| l.price);
    let spread = match (best_bid, best_ask) {
        (Some(bid), Some(ask)) => (ask.inner() - bid.inner()).to_string(),
        _ => "-".to_string(),
    };
    let mut line = format!(
        "{key}: bid={} ask={} spread={spread} synced={} state={}",
        best_bid.map_or_else(|| "-".to_string(), |p| p.to_string()),
        best_ask.map_or_else(|| "-".to_string(), |p| p.to_string()),
        out.book.synced,
        out.connected.as_str(),
    );
    if let Some(error) = out.error.as_ref().or(out.connection_error.as_ref()) {
        line.push_str(&format!(" error=\"{error}\""));
    }
    line
}
