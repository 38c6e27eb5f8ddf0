//! REST collaborators for the stream facades.
//!
//! - `GET /klines?symbol=&interval=&limit=` seeds the candle series
//! - `GET /depth?symbol=&limit=` seeds the order book

pub mod api;
pub mod client;
pub mod error;
pub mod parse;

#[cfg(any(test, feature = "mock"))]
pub use api::MockMarketDataApi;
pub use api::MarketDataApi;
pub use client::RestClient;
pub use error::{RestError, RestResult};
pub use parse::{parse_depth_snapshot, parse_klines};
