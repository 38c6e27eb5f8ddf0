//! Core domain types for the market-data streaming engine.
//!
//! This crate provides the vocabulary shared by every other crate:
//! - `StreamKey`, `Interval`: identify a logical exchange feed
//! - `Candle`, `Volume`, `Bar`: time-keyed series records
//! - `Price`, `Size`, `OrderBookLevel`, `BookSide`: order-book values
//! - `IndicatorPoint`: one derived indicator value on the time axis

pub mod decimal;
pub mod error;
pub mod stream_key;
pub mod types;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use stream_key::{Interval, StreamKey};
pub use types::{Bar, BookSide, Candle, Direction, IndicatorPoint, OrderBookLevel, TimeKeyed, Volume};
