//! Live payload parsing and order-book merging.
//!
//! Turns raw exchange payloads (kline and depth-delta shapes) into typed
//! events and keeps a bounded bid/ask book from snapshots plus deltas.

pub mod error;
pub mod order_book;
pub mod parser;
pub mod serde_helpers;

pub use error::{FeedError, FeedResult};
pub use order_book::{merge, ApplyOutcome, BookSnapshot, DepthSnapshot, OrderBook};
pub use parser::{DepthDelta, FeedEvent, KlineTick, MessageParser, ParseStats};
