//! Series storage.
//!
//! At most one record per timestamp, ascending by time, bounded by a limit.
//! A record for an existing timestamp overwrites it and never evicts. A
//! record for a new timestamp that pushes the length over the limit evicts
//! exactly one record: the one with the lowest timestamp.
//!
//! Known edge case: a never-seen timestamp older than everything stored is
//! still "new", so at the limit it is inserted and then immediately evicted
//! as the oldest, or, if something older exists, it displaces that. The
//! store does not second-guess out-of-order delivery.

use mdstream_core::{Bar, Candle, TimeKeyed, Volume};
use std::collections::BTreeMap;
use tracing::warn;

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Inserted, and the record at this time was evicted.
    Evicted(i64),
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Evicted(_) => "evicted",
        }
    }

    pub fn is_new(&self) -> bool {
        !matches!(self, Self::Updated)
    }
}

/// Upsert `record` into `series` and return the new series.
///
/// `series` may be in any order; the result is ascending by time.
pub fn upsert<T: TimeKeyed + Clone>(series: &[T], record: T, limit: usize) -> Vec<T> {
    let mut by_time: BTreeMap<i64, T> = series.iter().map(|r| (r.time(), r.clone())).collect();
    let is_new = by_time.insert(record.time(), record).is_none();
    if is_new && by_time.len() > limit {
        by_time.pop_first();
    }
    by_time.into_values().collect()
}

/// Ordered, bounded series keyed by time.
#[derive(Debug, Clone)]
pub struct Series<T> {
    records: BTreeMap<i64, T>,
    limit: usize,
}

impl<T: TimeKeyed + Clone> Series<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            limit,
        }
    }

    /// In-place equivalent of [`upsert`].
    pub fn upsert(&mut self, record: T) -> UpsertOutcome {
        let time = record.time();
        if self.records.insert(time, record).is_some() {
            return UpsertOutcome::Updated;
        }
        if self.records.len() > self.limit {
            if let Some((evicted, _)) = self.records.pop_first() {
                return UpsertOutcome::Evicted(evicted);
            }
        }
        UpsertOutcome::Inserted
    }

    /// Replace the whole series with a snapshot.
    ///
    /// Duplicate timestamps keep the last occurrence; only the newest
    /// `limit` records are kept.
    pub fn replace(&mut self, records: impl IntoIterator<Item = T>) {
        self.records = records.into_iter().map(|r| (r.time(), r)).collect();
        while self.records.len() > self.limit {
            self.records.pop_first();
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn get(&self, time: i64) -> Option<&T> {
        self.records.get(&time)
    }

    pub fn last(&self) -> Option<&T> {
        self.records.values().next_back()
    }

    pub fn first(&self) -> Option<&T> {
        self.records.values().next()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        self.records.values()
    }

    /// Fresh ascending copy.
    pub fn to_vec(&self) -> Vec<T> {
        self.records.values().cloned().collect()
    }

    pub fn times(&self) -> impl Iterator<Item = i64> + '_ {
        self.records.keys().copied()
    }
}

/// Candles and their volumes, kept with identical time keys.
#[derive(Debug, Clone)]
pub struct SeriesStore {
    candles: Series<Candle>,
    volumes: Series<Volume>,
}

impl SeriesStore {
    pub fn new(limit: usize) -> Self {
        Self {
            candles: Series::new(limit),
            volumes: Series::new(limit),
        }
    }

    pub fn upsert_bar(&mut self, bar: Bar) -> UpsertOutcome {
        let outcome = self.candles.upsert(bar.candle);
        self.volumes.upsert(bar.volume);
        outcome
    }

    pub fn replace_bars(&mut self, bars: impl IntoIterator<Item = Bar>) {
        let bars: Vec<Bar> = bars.into_iter().collect();
        self.candles.replace(bars.iter().map(|b| b.candle));
        self.volumes.replace(bars.iter().map(|b| b.volume));
    }

    /// Restore from separately persisted candles and volumes.
    ///
    /// Returns `false` (and leaves the store empty) if the two do not share
    /// the same time keys.
    pub fn restore(&mut self, candles: Vec<Candle>, volumes: Vec<Volume>) -> bool {
        let aligned = candles.len() == volumes.len()
            && candles.iter().zip(&volumes).all(|(c, v)| c.time == v.time);
        if !aligned {
            warn!(
                candles = candles.len(),
                volumes = volumes.len(),
                "Cached candles and volumes disagree, discarding both"
            );
            self.candles.clear();
            self.volumes.clear();
            return false;
        }
        self.candles.replace(candles);
        self.volumes.replace(volumes);
        true
    }

    pub fn candles(&self) -> &Series<Candle> {
        &self.candles
    }

    pub fn volumes(&self) -> &Series<Volume> {
        &self.volumes
    }

    pub fn bar(&self, time: i64) -> Option<Bar> {
        let candle = *self.candles.get(time)?;
        let volume = *self.volumes.get(time)?;
        Some(Bar { candle, volume })
    }

    pub fn last_bar(&self) -> Option<Bar> {
        self.bar(self.candles.last()?.time)
    }

    /// Closing prices, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}
