//! Bounded time-keyed series.
//!
//! - `upsert`: pure insert-or-update by timestamp with single-oldest eviction
//! - `Series<T>`: ordered map keyed by time, bounded to a maximum length
//! - `SeriesStore`: candles and volumes kept in lockstep
//! - `SeriesCache`: validated restore and throttled persistence

pub mod cache;
pub mod error;
pub mod store;

pub use cache::{
    candles_key, volumes_key, CacheBackend, FileCache, MemoryCache, SeriesCache,
};
pub use error::{SeriesError, SeriesResult};
pub use store::{upsert, Series, SeriesStore, UpsertOutcome};
