//! Transport abstraction.
//!
//! The connection task only needs a frame sink and a frame stream. Dialing
//! is behind the `Connector` trait so the reconnect machinery can be driven
//! by an in-memory transport in tests.

use crate::error::{WsError, WsResult};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use mdstream_core::StreamKey;
use std::pin::Pin;
use std::time::Duration;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tracing::{debug, info};

pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = WsResult<Message>> + Send>>;

/// An open, bidirectional frame transport.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Dials one physical connection for a stream key.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, key: &StreamKey) -> WsResult<Transport>;
}

/// Dials `{base_url}/ws/{key}` over tungstenite (TLS when `wss://`).
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    base_url: String,
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            connect_timeout,
        }
    }

    pub fn url_for(&self, key: &StreamKey) -> String {
        format!("{}/ws/{}", self.base_url, key)
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, key: &StreamKey) -> WsResult<Transport> {
        let url = self.url_for(key);
        debug!(%url, "Dialing WebSocket");

        // TCP_NODELAY on: ticks are small and latency-sensitive.
        let (ws_stream, _response) = tokio::time::timeout(
            self.connect_timeout,
            connect_async_tls_with_config(url.as_str(), None, true, None),
        )
        .await
        .map_err(|_| WsError::ConnectionFailed(format!("connect to {url} timed out")))??;

        info!(%url, "WebSocket connected");
        let (write, read) = ws_stream.split();

        Ok(Transport::new(
            Box::pin(write.sink_map_err(WsError::from)),
            Box::pin(read.map(|frame| frame.map_err(WsError::from))),
        ))
    }
}
