//! Order-book stream facade.
//!
//! Deltas only make sense on top of a snapshot, so every time the depth
//! connection (re)opens the book is marked stale and a REST snapshot is
//! fetched. Deltas that queue up during the fetch are applied afterwards;
//! those older than the snapshot are discarded by update id. A failed
//! snapshot fetch is retried on the connection backoff schedule while the
//! connection stays up.

use crate::error::{FacadeError, FacadeResult};
use crate::output::{link_fields, DepthOutput};
use crate::retry::RetrySchedule;
use mdstream_core::StreamKey;
use mdstream_feed::{ApplyOutcome, FeedEvent, MessageParser, OrderBook};
use mdstream_rest::MarketDataApi;
use mdstream_telemetry::Metrics;
use mdstream_ws::{ConnectionState, LinkStatus, Multiplexer};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DepthStreamConfig {
    pub symbol: String,
    /// Levels kept per side.
    pub depth: usize,
}

impl DepthStreamConfig {
    pub fn new(symbol: impl Into<String>, depth: usize) -> Self {
        Self {
            symbol: symbol.into(),
            depth,
        }
    }
}

pub struct DepthStream {
    key: StreamKey,
    output: watch::Receiver<DepthOutput>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DepthStream {
    pub fn open(
        config: DepthStreamConfig,
        mux: Multiplexer,
        api: Arc<dyn MarketDataApi>,
    ) -> FacadeResult<Self> {
        if config.symbol.trim().is_empty() || config.depth == 0 {
            return Err(FacadeError::InvalidConfig(format!(
                "depth stream needs a symbol and a positive depth, got {:?}",
                config
            )));
        }
        let key = StreamKey::depth(&config.symbol);
        let (output_tx, output_rx) = watch::channel(DepthOutput::default());
        let cancel = CancellationToken::new();
        let retry = RetrySchedule::new(mux.config().backoff());

        let worker = DepthWorker {
            key: key.clone(),
            book: OrderBook::new(config.depth),
            config,
            mux,
            api,
            parser: MessageParser::new(),
            output: output_tx,
            cancel: cancel.clone(),
            loading: true,
            error: None,
            link: LinkStatus::connecting(),
            retry,
        };
        info!(key = %key, "Opening depth stream");
        let task = tokio::spawn(worker.run());

        Ok(Self {
            key,
            output: output_rx,
            cancel,
            task: Some(task),
        })
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn output(&self) -> DepthOutput {
        self.output.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<DepthOutput> {
        self.output.clone()
    }

    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(key = %self.key, error = %e, "Depth stream task failed");
            }
        }
    }
}

impl Drop for DepthStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct DepthWorker {
    key: StreamKey,
    config: DepthStreamConfig,
    mux: Multiplexer,
    api: Arc<dyn MarketDataApi>,
    book: OrderBook,
    parser: MessageParser,
    output: watch::Sender<DepthOutput>,
    cancel: CancellationToken,
    loading: bool,
    error: Option<String>,
    link: LinkStatus,
    retry: RetrySchedule,
}

impl DepthWorker {
    async fn run(mut self) {
        let mut sub = self.mux.subscribe(self.key.clone());
        let mut status_rx = sub.status_receiver();
        self.link = status_rx.borrow_and_update().clone();
        self.publish();
        if self.link.is_connected() {
            self.resync().await;
        }

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                changed = status_rx.changed() => {
                    if changed.is_err() {
                        warn!(key = %self.key, "Connection task ended");
                        break;
                    }
                    self.link = status_rx.borrow_and_update().clone();
                    match self.link.state {
                        ConnectionState::Connected => self.resync().await,
                        _ => {
                            // The next Connected resyncs anyway.
                            self.retry.reset();
                            self.book.mark_stale();
                            self.publish();
                        }
                    }
                }

                message = sub.recv() => match message {
                    Some(message) => self.on_payload(&message.payload).await,
                    None => break,
                },

                _ = self.retry.wait() => {
                    self.retry.fire();
                    debug!(key = %self.key, failures = self.retry.failures(), "Retrying depth snapshot");
                    self.resync().await;
                }
            }
        }
        info!(key = %self.key, "Depth stream closed");
    }

    /// Replace the book with a fresh REST snapshot.
    async fn resync(&mut self) {
        self.book.mark_stale();
        let fetch = self.api.fetch_depth(&self.config.symbol, self.config.depth);
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = fetch => result,
        };
        match result {
            Ok(snapshot) => {
                self.book.replace_snapshot(snapshot);
                self.retry.reset();
                self.error = None;
            }
            Err(e) => {
                let delay = self.retry.failed();
                warn!(
                    key = %self.key,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Depth snapshot fetch failed, will retry"
                );
                self.error = Some(e.to_string());
            }
        }
        self.loading = false;
        self.publish();
    }

    async fn on_payload(&mut self, payload: &serde_json::Value) {
        let delta = match self.parser.parse(payload) {
            Ok(Some(FeedEvent::Depth(delta))) => delta,
            Ok(Some(FeedEvent::Snapshot(snapshot))) => {
                match self.book.apply_partial(snapshot) {
                    ApplyOutcome::Applied => {
                        self.retry.reset();
                        self.error = None;
                        self.loading = false;
                        self.publish();
                    }
                    _ => debug!(key = %self.key, "Outdated partial book dropped"),
                }
                return;
            }
            Ok(Some(FeedEvent::Kline(_))) => {
                Metrics::message_dropped("unexpected");
                return;
            }
            Ok(None) => return,
            Err(_) => {
                Metrics::message_dropped("invalid");
                return;
            }
        };

        match self.book.apply_delta(&delta) {
            ApplyOutcome::Applied => self.publish(),
            ApplyOutcome::Unsynced => {
                debug!(key = %self.key, "Delta before snapshot dropped");
                Metrics::message_dropped("unsynced");
                if !self.retry.is_pending() && self.link.is_connected() {
                    self.resync().await;
                }
            }
            ApplyOutcome::Outdated => {
                debug!(key = %self.key, "Outdated delta dropped");
            }
            ApplyOutcome::Gap => {
                Metrics::message_dropped("gap");
                self.resync().await;
            }
        }
    }

    fn publish(&self) {
        let (connected, connection_error) = link_fields(&self.link);
        self.output.send_replace(DepthOutput {
            book: self.book.snapshot(),
            loading: self.loading,
            error: self.error.clone(),
            connected,
            connection_error,
        });
    }
}
