//! Subscriber handle.
//!
//! Dropping a `Subscription` (or calling [`Subscription::unsubscribe`])
//! stops delivery to it immediately and releases its reference on the
//! shared connection.

use crate::message::StreamMessage;
use crate::multiplexer::Multiplexer;
use crate::sender::StreamSender;
use crate::state::LinkStatus;
use mdstream_core::StreamKey;
use mdstream_telemetry::Metrics;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tracing::warn;

pub struct Subscription {
    mux: Multiplexer,
    key: StreamKey,
    connection_id: u64,
    rx: broadcast::Receiver<StreamMessage>,
    status: watch::Receiver<LinkStatus>,
    sender: StreamSender,
    released: bool,
}

impl Subscription {
    pub(crate) fn new(
        mux: Multiplexer,
        key: StreamKey,
        connection_id: u64,
        rx: broadcast::Receiver<StreamMessage>,
        status: watch::Receiver<LinkStatus>,
        sender: StreamSender,
    ) -> Self {
        Self {
            mux,
            key,
            connection_id,
            rx,
            status,
            sender,
            released: false,
        }
    }

    /// Next message in arrival order. `None` once the connection is gone
    /// for good.
    ///
    /// A consumer that falls more than the channel capacity behind skips
    /// the oldest messages; the gap is logged and counted.
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(RecvError::Lagged(skipped)) => self.on_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<StreamMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => return Some(msg),
                Err(TryRecvError::Lagged(skipped)) => self.on_lag(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Current connection status.
    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Independent status receiver, for selecting alongside `recv`.
    pub fn status_receiver(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    pub fn sender(&self) -> StreamSender {
        self.sender.clone()
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Ask a connection that gave up to start dialing again.
    pub fn retry(&self) -> bool {
        self.mux.retry(&self.key)
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    fn on_lag(&self, skipped: u64) {
        warn!(key = %self.key, skipped, "Subscriber lagging, oldest messages skipped");
        Metrics::message_dropped("lagged");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.mux.release(&self.key, self.connection_id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}
