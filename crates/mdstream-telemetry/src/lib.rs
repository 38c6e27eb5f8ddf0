//! Prometheus metrics and structured logging for mdstream.
//!
//! - Structured logging with `tracing` (JSON in production, pretty otherwise)
//! - Prometheus counters and gauges for connections, messages, series and cache

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
