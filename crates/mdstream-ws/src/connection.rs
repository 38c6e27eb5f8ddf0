//! Per-key connection task.
//!
//! One task owns one physical connection for its whole life: dialing,
//! the read/write loop, keep-alive probes, and the reconnect backoff. It is
//! the only writer of the connection's status.

use crate::backoff::Backoff;
use crate::error::WsError;
use crate::heartbeat::Heartbeat;
use crate::message::{parse_frame, StreamMessage};
use crate::rate_limiter::RateLimiter;
use crate::state::{ConnectionState, LinkEvent, LinkStatus};
use crate::transport::{Connector, Transport};
use futures_util::{SinkExt, StreamExt};
use mdstream_core::StreamKey;
use mdstream_telemetry::Metrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Base WebSocket URL; streams are dialed at `{url}/ws/{key}`.
    pub url: String,
    pub connect_timeout_ms: u64,
    /// Consecutive failures tolerated before giving up (0 = infinite).
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Keep-alive probe interval.
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this.
    pub heartbeat_timeout_ms: u64,
    /// How long a connection with zero subscribers lingers before closing.
    pub grace_period_ms: u64,
    /// Fan-out buffer per connection; slower consumers lose the oldest.
    pub channel_capacity: usize,
    pub max_outbound_per_sec: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: 10_000,
            max_reconnect_attempts: 20,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 120_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            grace_period_ms: 3_000,
            channel_capacity: 1_024,
            max_outbound_per_sec: 5,
        }
    }
}

impl ConnectionConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.reconnect_base_delay_ms,
            self.reconnect_max_delay_ms,
            self.max_reconnect_attempts,
        )
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// State shared between the connection task, the registry and every
/// subscription handle of one key.
pub(crate) struct Shared {
    pub(crate) key: StreamKey,
    pub(crate) fanout: broadcast::Sender<StreamMessage>,
    pub(crate) status: watch::Sender<LinkStatus>,
    pub(crate) outbound: mpsc::Sender<String>,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) ref_count: AtomicUsize,
    /// Bumped on every subscribe or manual retry.
    wake: watch::Sender<u64>,
    pub(crate) shutdown: CancellationToken,
}

impl Shared {
    pub(crate) fn wake(&self) {
        self.wake.send_modify(|n| *n = n.wrapping_add(1));
    }

    pub(crate) fn subscribers(&self) -> usize {
        self.ref_count.load(Ordering::SeqCst)
    }
}

/// Outcome of one connected session.
enum SessionEnd {
    /// Intentional close; do not reconnect.
    Closed,
    Dropped(WsError),
}

pub(crate) struct ConnectionTask {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    heartbeat: Heartbeat,
    outbound_rx: mpsc::Receiver<String>,
    wake_rx: watch::Receiver<u64>,
    state: ConnectionState,
    failures: u32,
}

impl ConnectionTask {
    /// Create the shared state for `key` and spawn its task.
    pub(crate) fn spawn(
        key: StreamKey,
        config: &ConnectionConfig,
        connector: Arc<dyn Connector>,
    ) -> (Arc<Shared>, JoinHandle<()>) {
        let (fanout, _) = broadcast::channel(config.channel_capacity.max(1));
        let (status, _) = watch::channel(LinkStatus::connecting());
        let (outbound, outbound_rx) = mpsc::channel(64);
        let (wake, wake_rx) = watch::channel(0u64);

        let shared = Arc::new(Shared {
            key,
            fanout,
            status,
            outbound,
            limiter: Arc::new(RateLimiter::per_second(config.max_outbound_per_sec.max(1))),
            ref_count: AtomicUsize::new(0),
            wake,
            shutdown: CancellationToken::new(),
        });

        let task = Self {
            shared: shared.clone(),
            connector,
            backoff: config.backoff(),
            heartbeat: Heartbeat::new(config.heartbeat_interval_ms, config.heartbeat_timeout_ms),
            outbound_rx,
            wake_rx,
            state: ConnectionState::Connecting,
            failures: 0,
        };
        Metrics::ws_state_set(shared.key.as_str(), ConnectionState::Connecting.as_str());

        let handle = tokio::spawn(task.run());
        (shared, handle)
    }

    async fn run(mut self) {
        let key = self.shared.key.clone();
        let shutdown = self.shared.shutdown.clone();

        loop {
            Metrics::ws_connect_attempt(key.as_str());
            let dial = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    self.apply(LinkEvent::Closed, None);
                    return;
                }
                dial = self.connector.connect(&key) => dial,
            };

            let reason = match dial {
                Ok(transport) => {
                    self.failures = 0;
                    self.apply(LinkEvent::Opened, None);
                    info!(key = %key, "Stream connected");
                    match self.session(transport).await {
                        SessionEnd::Closed => {
                            self.apply(LinkEvent::Closed, None);
                            info!(key = %key, "Stream closed");
                            return;
                        }
                        SessionEnd::Dropped(e) => e,
                    }
                }
                Err(e) => e,
            };

            self.failures = self.failures.saturating_add(1);
            warn!(key = %key, error = %reason, failures = self.failures, "Connection lost");
            Metrics::ws_reconnect(key.as_str(), reason.reason());
            self.apply(LinkEvent::Dropped, Some(reason.to_string()));

            if !self.wait_for_subscribers().await {
                self.apply(LinkEvent::Closed, None);
                return;
            }

            if self.backoff.exhausted(self.failures) {
                let gave_up = WsError::GaveUp {
                    attempts: self.backoff.max_attempts(),
                };
                error!(key = %key, failures = self.failures, "Reconnect attempts exhausted, giving up");
                Metrics::ws_reconnect(key.as_str(), gave_up.reason());
                self.apply(LinkEvent::GaveUp, Some(gave_up.to_string()));

                let _ = self.wake_rx.borrow_and_update();
                if !self.wait_for_wake().await {
                    self.apply(LinkEvent::Closed, None);
                    return;
                }
                info!(key = %key, "Manual retry requested");
                self.failures = 0;
                self.apply(LinkEvent::Retry, None);
                continue;
            }

            let delay = self.backoff.delay(self.failures - 1);
            warn!(
                key = %key,
                attempt = self.failures,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    self.apply(LinkEvent::Closed, None);
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            // Subscribers may have left during the backoff.
            if !self.wait_for_subscribers().await {
                self.apply(LinkEvent::Closed, None);
                return;
            }
            self.apply(LinkEvent::Retry, None);
        }
    }

    async fn session(&mut self, transport: Transport) -> SessionEnd {
        let Transport {
            mut sink,
            mut stream,
        } = transport;
        let shutdown = self.shared.shutdown.clone();

        self.heartbeat.reset(Instant::now());
        let mut ticker = tokio::time::interval(self.heartbeat.check_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        debug!(?e, "Close frame not sent");
                    }
                    return SessionEnd::Closed;
                }

                frame = stream.next() => {
                    let now = Instant::now();
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_message(now);
                            self.dispatch(&text);
                        }
                        Some(Ok(Message::Binary(data))) => {
                            self.heartbeat.record_message(now);
                            warn!(key = %self.shared.key, len = data.len(), "Dropping binary frame");
                            Metrics::message_dropped("binary");
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message(now);
                            if let Err(e) = sink.send(Message::Pong(data)).await {
                                return SessionEnd::Dropped(e);
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong(now);
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1005, "no close frame".to_string()));
                            return SessionEnd::Dropped(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return SessionEnd::Dropped(e),
                        None => {
                            return SessionEnd::Dropped(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "stream ended".to_string(),
                            });
                        }
                    }
                }

                Some(text) = self.outbound_rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        return SessionEnd::Dropped(e);
                    }
                }

                _ = ticker.tick() => {
                    let now = Instant::now();
                    if self.heartbeat.is_timed_out(now) {
                        warn!(
                            key = %self.shared.key,
                            idle_ms = self.heartbeat.idle_for(now).as_millis() as u64,
                            "Pong overdue, forcing reconnect"
                        );
                        return SessionEnd::Dropped(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_probe(now) {
                        if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                            return SessionEnd::Dropped(e);
                        }
                        self.heartbeat.record_ping(now);
                        debug!(key = %self.shared.key, "Sent keep-alive ping");
                    }
                }
            }
        }
    }

    /// Parse and fan out one text frame. Malformed frames are dropped.
    fn dispatch(&self, text: &str) {
        match parse_frame(text) {
            Ok(payload) => {
                Metrics::message_received(self.shared.key.as_str());
                // Err only means nobody is listening right now.
                let _ = self
                    .shared
                    .fanout
                    .send(StreamMessage::new(self.shared.key.clone(), payload));
            }
            Err(e) => {
                warn!(key = %self.shared.key, error = %e, "Dropping malformed message");
                Metrics::message_dropped("malformed");
            }
        }
    }

    /// Park while nobody is subscribed. Returns `false` on shutdown.
    async fn wait_for_subscribers(&mut self) -> bool {
        loop {
            let _ = self.wake_rx.borrow_and_update();
            if self.shared.subscribers() > 0 {
                return true;
            }
            debug!(key = %self.shared.key, "No subscribers, holding reconnect");
            if !self.wait_for_wake().await {
                return false;
            }
        }
    }

    /// Park until a wake newer than the last one seen. Returns `false` on
    /// shutdown.
    async fn wait_for_wake(&mut self) -> bool {
        tokio::select! {
            biased;
            () = self.shared.shutdown.cancelled() => false,
            changed = self.wake_rx.changed() => changed.is_ok(),
        }
    }

    fn apply(&mut self, event: LinkEvent, error: Option<String>) {
        let Some(next) = self.state.on(event) else {
            warn!(key = %self.shared.key, from = %self.state, ?event, "Ignoring invalid transition");
            return;
        };
        self.state = next;

        Metrics::ws_state_set(self.shared.key.as_str(), next.as_str());
        self.shared.status.send_replace(LinkStatus {
            state: next,
            attempt: self.failures,
            terminal: event == LinkEvent::GaveUp,
            error,
        });
    }
}
