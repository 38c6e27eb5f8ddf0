//! WebSocket error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Message parse error: {0}")]
    ParseError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Giving up after {attempts} reconnect attempts")]
    GaveUp { attempts: u32 },

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Short label for the reconnect-reason metric.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ConnectionClosed { .. } => "closed_by_server",
            Self::HeartbeatTimeout => "heartbeat",
            Self::GaveUp { .. } => "exhausted",
            _ => "error",
        }
    }
}

pub type WsResult<T> = Result<T, WsError>;
