//! Send-capable handle handed to every subscriber.
//!
//! Writes are queued to the connection task over a channel, so the handle
//! stays valid across reconnects and never touches the socket directly.

use crate::error::{WsError, WsResult};
use crate::rate_limiter::RateLimiter;
use crate::state::{ConnectionState, LinkStatus};
use mdstream_core::StreamKey;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

#[derive(Clone)]
pub struct StreamSender {
    key: StreamKey,
    tx: mpsc::Sender<String>,
    limiter: Arc<RateLimiter>,
    status: watch::Receiver<LinkStatus>,
}

impl StreamSender {
    pub(crate) fn new(
        key: StreamKey,
        tx: mpsc::Sender<String>,
        limiter: Arc<RateLimiter>,
        status: watch::Receiver<LinkStatus>,
    ) -> Self {
        Self {
            key,
            tx,
            limiter,
            status,
        }
    }

    /// Queue a text frame.
    ///
    /// # Errors
    ///
    /// - `WsError::NotConnected`: the connection is not currently open
    /// - `WsError::RateLimitExceeded`: outbound window is full
    /// - `WsError::SendFailed`: the connection task has exited
    pub async fn send_text(&self, text: impl Into<String>) -> WsResult<()> {
        if !self.is_connected() {
            return Err(WsError::NotConnected(self.key.to_string()));
        }
        if !self.limiter.try_acquire() {
            return Err(WsError::RateLimitExceeded);
        }
        self.enqueue(text.into()).await
    }

    /// Queue a text frame, waiting for the outbound window instead of
    /// failing when it is full.
    ///
    /// # Errors
    ///
    /// - `WsError::NotConnected`: the connection is not currently open
    /// - `WsError::SendFailed`: the connection task has exited
    pub async fn send_text_paced(&self, text: impl Into<String>) -> WsResult<()> {
        if !self.is_connected() {
            return Err(WsError::NotConnected(self.key.to_string()));
        }
        self.limiter.acquire().await;
        self.enqueue(text.into()).await
    }

    pub async fn send_json<T: Serialize>(&self, value: &T) -> WsResult<()> {
        let text = serde_json::to_string(value)?;
        self.send_text(text).await
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().state == ConnectionState::Connected && !self.tx.is_closed()
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    async fn enqueue(&self, text: String) -> WsResult<()> {
        self.tx
            .send(text)
            .await
            .map_err(|_| WsError::SendFailed(format!("connection task for {} exited", self.key)))?;
        debug!(key = %self.key, "Outbound frame queued");
        Ok(())
    }
}
