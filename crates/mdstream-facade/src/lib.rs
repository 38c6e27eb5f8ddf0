//! Stream facades.
//!
//! `MarketStream` turns one `(symbol, interval)` into a continuously updated
//! candle series with indicator lines: history from REST (or the local
//! cache), then live ticks through the multiplexer. `DepthStream` does the
//! same for an order book. Consumers only ever see the published output
//! and the send/retry handles.

pub mod depth_stream;
pub mod error;
pub mod market_stream;
pub mod output;
pub mod pipeline;
mod retry;

pub use depth_stream::{DepthStream, DepthStreamConfig};
pub use error::{FacadeError, FacadeResult};
pub use market_stream::{MarketStream, MarketStreamConfig};
pub use output::{DepthOutput, StreamOutput};
pub use pipeline::{IndicatorLines, StreamState, TickAction, TickOutcome};
