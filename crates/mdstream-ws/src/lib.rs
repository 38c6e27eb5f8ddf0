//! Reference-counted WebSocket multiplexer for market-data streams.
//!
//! Provides:
//! - One shared physical connection per stream key, created on first subscribe
//! - Grace-period close when the last subscriber leaves
//! - Automatic reconnection with capped exponential backoff, only while
//!   subscribers remain, and a terminal give-up after too many failures
//! - Keep-alive probes with pong timeout detection
//! - Broadcast fan-out of parsed payloads and a rate-limited send handle
//! - An explicit connection state machine published through `watch`

pub mod backoff;
mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod multiplexer;
pub mod rate_limiter;
pub mod sender;
pub mod state;
pub mod subscription;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use backoff::Backoff;
pub use connection::ConnectionConfig;
pub use error::{WsError, WsResult};
pub use message::{parse_frame, StreamMessage};
pub use multiplexer::Multiplexer;
pub use sender::StreamSender;
pub use state::{ConnectionState, LinkEvent, LinkStatus};
pub use subscription::Subscription;
pub use transport::{Connector, Transport, TungsteniteConnector};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the rustls crypto provider for `wss://` endpoints.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
