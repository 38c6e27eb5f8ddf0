//! Candle stream facade.
//!
//! Lifecycle of the worker task:
//! 1. restore the cached series, if any, and publish it while loading
//! 2. fetch history over REST (cancellable); a failure is reported in
//!    `error` and the stream carries on with whatever it has, refetching
//!    on the connection backoff schedule until history arrives
//! 3. subscribe to the live kline stream and route every tick through
//!    the pipeline
//! 4. after a reconnect, backfill recent bars over REST
//! 5. on close, flush the cache unconditionally

use crate::error::{FacadeError, FacadeResult};
use crate::output::{link_fields, StreamOutput};
use crate::pipeline::StreamState;
use crate::retry::RetrySchedule;
use mdstream_core::{Interval, StreamKey};
use mdstream_feed::{FeedEvent, MessageParser};
use mdstream_indicators::IndicatorConfig;
use mdstream_rest::MarketDataApi;
use mdstream_series::{CacheBackend, SeriesCache, SeriesStore};
use mdstream_telemetry::Metrics;
use mdstream_ws::{ConnectionState, LinkStatus, Multiplexer, StreamSender};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MarketStreamConfig {
    pub symbol: String,
    pub interval: Interval,
    /// Bars requested on the initial fetch.
    pub history_limit: usize,
    /// Bars requested after a reconnect.
    pub backfill_limit: usize,
    /// Maximum bars held in memory.
    pub max_len: usize,
    pub indicators: IndicatorConfig,
    pub flush_interval: Duration,
}

impl MarketStreamConfig {
    pub fn new(symbol: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            history_limit: 500,
            backfill_limit: 100,
            max_len: 1000,
            indicators: IndicatorConfig::default(),
            flush_interval: Duration::from_secs(5),
        }
    }

    fn validate(&self) -> FacadeResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(FacadeError::InvalidConfig("symbol is empty".to_string()));
        }
        if self.history_limit == 0 || self.max_len == 0 {
            return Err(FacadeError::InvalidConfig(
                "history_limit and max_len must be positive".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(FacadeError::InvalidConfig(
                "flush_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

enum Command {
    Reconfigure(IndicatorConfig, oneshot::Sender<FacadeResult<()>>),
}

/// Handle to a running candle stream.
pub struct MarketStream {
    key: StreamKey,
    mux: Multiplexer,
    output: watch::Receiver<StreamOutput>,
    commands: mpsc::UnboundedSender<Command>,
    sender: Arc<OnceLock<StreamSender>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MarketStream {
    /// Validate `config` and start the worker. Must be called inside a
    /// Tokio runtime.
    pub fn open(
        config: MarketStreamConfig,
        mux: Multiplexer,
        api: Arc<dyn MarketDataApi>,
        cache: Option<Arc<dyn CacheBackend>>,
    ) -> FacadeResult<Self> {
        config.validate()?;
        let state = StreamState::new(config.max_len, config.indicators.clone())?;
        let key = StreamKey::kline(&config.symbol, config.interval);

        let cache = cache.map(|backend| {
            SeriesCache::new(
                backend,
                &config.symbol.to_lowercase(),
                config.interval.as_str(),
                config.flush_interval,
            )
        });

        let (output_tx, output_rx) = watch::channel(StreamOutput::default());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let sender = Arc::new(OnceLock::new());
        let cancel = CancellationToken::new();
        let history_retry = RetrySchedule::new(mux.config().backoff());

        let worker = Worker {
            key: key.clone(),
            config,
            mux: mux.clone(),
            api,
            cache,
            state,
            parser: MessageParser::new(),
            output: output_tx,
            commands: command_rx,
            sender: sender.clone(),
            cancel: cancel.clone(),
            loading: true,
            error: None,
            link: LinkStatus::connecting(),
            history_retry,
        };
        info!(key = %key, "Opening market stream");
        let task = tokio::spawn(worker.run());

        Ok(Self {
            key,
            mux,
            output: output_rx,
            commands: command_tx,
            sender,
            cancel,
            task: Some(task),
        })
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Latest published output.
    pub fn output(&self) -> StreamOutput {
        self.output.borrow().clone()
    }

    /// Receiver that is notified on every publish.
    pub fn watch(&self) -> watch::Receiver<StreamOutput> {
        self.output.clone()
    }

    /// Send handle for the live connection, available once subscribed.
    pub fn sender(&self) -> Option<StreamSender> {
        self.sender.get().cloned()
    }

    /// Restart a connection that gave up.
    pub fn retry(&self) -> bool {
        self.mux.retry(&self.key)
    }

    /// Swap indicator parameters. Calculators are rebuilt and replayed.
    pub async fn reconfigure(&self, config: IndicatorConfig) -> FacadeResult<()> {
        config.validate()?;
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Reconfigure(config, tx))
            .map_err(|_| FacadeError::Closed)?;
        rx.await.map_err(|_| FacadeError::Closed)?
    }

    /// Stop the worker, release the subscription and flush the cache.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(key = %self.key, error = %e, "Market stream task failed");
            }
        }
    }
}

impl Drop for MarketStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    key: StreamKey,
    config: MarketStreamConfig,
    mux: Multiplexer,
    api: Arc<dyn MarketDataApi>,
    cache: Option<SeriesCache>,
    state: StreamState,
    parser: MessageParser,
    output: watch::Sender<StreamOutput>,
    commands: mpsc::UnboundedReceiver<Command>,
    sender: Arc<OnceLock<StreamSender>>,
    cancel: CancellationToken,
    loading: bool,
    error: Option<String>,
    link: LinkStatus,
    history_retry: RetrySchedule,
}

impl Worker {
    async fn run(mut self) {
        self.restore_cache().await;

        let fetch = self.api.fetch_klines(
            &self.config.symbol,
            self.config.interval,
            self.config.history_limit,
        );
        let history = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(key = %self.key, "Closed during history fetch");
                return;
            }
            result = fetch => result,
        };
        match history {
            Ok(bars) if bars.is_empty() => {
                warn!(key = %self.key, "History fetch returned no bars");
            }
            Ok(bars) => {
                info!(key = %self.key, bars = bars.len(), "History loaded");
                self.state.seed(bars);
                self.persist(true).await;
            }
            Err(e) => {
                let delay = self.history_retry.failed();
                warn!(
                    key = %self.key,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "History fetch failed, continuing with live data only"
                );
                self.error = Some(e.to_string());
            }
        }
        self.loading = false;
        self.publish();

        self.stream_live().await;
        self.persist(true).await;
        info!(key = %self.key, "Market stream closed");
    }

    async fn stream_live(&mut self) {
        let mut sub = self.mux.subscribe(self.key.clone());
        let _ = self.sender.set(sub.sender());

        let mut status_rx = sub.status_receiver();
        self.link = status_rx.borrow_and_update().clone();
        let mut opened_before = self.link.is_connected();
        self.publish();

        let mut flush = tokio::time::interval(self.config.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                Some(command) = self.commands.recv() => self.handle(command),

                changed = status_rx.changed() => {
                    if changed.is_err() {
                        warn!(key = %self.key, "Connection task ended");
                        break;
                    }
                    self.link = status_rx.borrow_and_update().clone();
                    self.publish();
                    if self.link.state == ConnectionState::Connected {
                        // Only Opened publishes Connected, so a second one is
                        // a new session.
                        if opened_before {
                            self.backfill().await;
                        }
                        opened_before = true;
                    }
                }

                message = sub.recv() => match message {
                    Some(message) => {
                        if self.on_payload(&message.payload) {
                            self.persist(false).await;
                            self.publish();
                        }
                    }
                    None => break,
                },

                _ = self.history_retry.wait() => {
                    self.history_retry.fire();
                    self.refetch_history().await;
                }

                _ = flush.tick() => {
                    if let Some(cache) = self.cache.as_mut() {
                        cache.flush_if_due(self.state.store()).await;
                    }
                }
            }
        }
    }

    async fn restore_cache(&mut self) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let mut store = SeriesStore::new(self.config.max_len);
        if cache.load(&mut store).await > 0 {
            info!(key = %self.key, bars = store.len(), "Restored series from cache");
            self.state.restore(store);
            self.publish();
        }
    }

    /// Returns whether the state changed.
    fn on_payload(&mut self, payload: &Value) -> bool {
        let tick = match self.parser.parse(payload) {
            Ok(Some(FeedEvent::Kline(tick))) => tick,
            Ok(Some(FeedEvent::Depth(_) | FeedEvent::Snapshot(_))) => {
                warn!(key = %self.key, "Depth payload on a kline stream");
                Metrics::message_dropped("unexpected");
                return false;
            }
            Ok(None) => return false,
            Err(_) => {
                Metrics::message_dropped("invalid");
                return false;
            }
        };

        if let Some(interval) = tick.interval.as_deref() {
            if interval != self.config.interval.as_str() {
                warn!(key = %self.key, interval, "Tick for another interval");
                Metrics::message_dropped("interval_mismatch");
                return false;
            }
        }

        let outcome = self.state.apply_tick(&tick);
        Metrics::candle_upsert(
            self.key.symbol(),
            self.config.interval.as_str(),
            outcome.upsert.as_str(),
        );
        debug!(key = %self.key, time = tick.bar.time(), action = ?outcome.action, "Tick applied");
        true
    }

    /// Retry the initial history fetch after a failure. Live bars already
    /// held are kept; fetched bars are upserted underneath them.
    async fn refetch_history(&mut self) {
        let fetch = self.api.fetch_klines(
            &self.config.symbol,
            self.config.interval,
            self.config.history_limit,
        );
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = fetch => result,
        };
        match result {
            Ok(bars) => {
                info!(
                    key = %self.key,
                    bars = bars.len(),
                    attempts = self.history_retry.failures() + 1,
                    "History loaded after retry"
                );
                self.history_retry.reset();
                self.error = None;
                if !bars.is_empty() {
                    self.state.merge_history(bars);
                    self.persist(true).await;
                }
            }
            Err(e) => {
                let delay = self.history_retry.failed();
                warn!(
                    key = %self.key,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "History refetch failed"
                );
                self.error = Some(e.to_string());
            }
        }
        self.publish();
    }

    async fn backfill(&mut self) {
        let fetch = self.api.fetch_klines(
            &self.config.symbol,
            self.config.interval,
            self.config.backfill_limit.max(1),
        );
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = fetch => result,
        };
        match result {
            Ok(bars) => {
                info!(key = %self.key, bars = bars.len(), "Backfilled after reconnect");
                self.state.merge_history(bars);
                self.persist(false).await;
                self.publish();
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Backfill after reconnect failed");
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Reconfigure(config, reply) => {
                let result = self.state.reconfigure(config);
                if result.is_ok() {
                    info!(key = %self.key, "Indicators reconfigured");
                    self.publish();
                }
                let _ = reply.send(result);
            }
        }
    }

    async fn persist(&mut self, force: bool) {
        if let Some(cache) = self.cache.as_mut() {
            cache.persist(self.state.store(), force).await;
        }
    }

    fn publish(&self) {
        let (connected, connection_error) = link_fields(&self.link);
        let mut out = StreamOutput {
            loading: self.loading,
            error: self.error.clone(),
            connected,
            connection_error,
            ..StreamOutput::default()
        };
        self.state.fill(&mut out);
        self.output.send_replace(out);
    }
}
