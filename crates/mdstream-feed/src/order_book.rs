//! Order-book merging.
//!
//! A book is only as good as its baseline: deltas are meaningful relative to
//! the snapshot they follow. The book therefore starts unsynced, accepts
//! deltas only after a snapshot has been applied, and goes back to unsynced
//! whenever the feed reconnects or an update-id gap is seen.

use crate::parser::DepthDelta;
use chrono::{DateTime, Utc};
use mdstream_core::{BookSide, OrderBookLevel, Price, Size};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Apply `deltas` to `current` for one side and return the new levels,
/// sorted best-first (bids descending, asks ascending) and truncated to
/// `depth`.
pub fn merge(
    current: &[OrderBookLevel],
    deltas: &[OrderBookLevel],
    side: BookSide,
    depth: usize,
) -> Vec<OrderBookLevel> {
    let mut levels: BTreeMap<Price, Size> =
        current.iter().map(|l| (l.price, l.quantity)).collect();

    for delta in deltas {
        if delta.quantity.is_zero() {
            levels.remove(&delta.price);
        } else {
            levels.insert(delta.price, delta.quantity);
        }
    }

    let to_level = |(price, quantity): (&Price, &Size)| OrderBookLevel::new(*price, *quantity);
    match side {
        BookSide::Bid => levels.iter().rev().take(depth).map(to_level).collect(),
        BookSide::Ask => levels.iter().take(depth).map(to_level).collect(),
    }
}

/// Full book snapshot, as fetched over REST.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DepthSnapshot {
    pub last_update_id: Option<u64>,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

/// Result of applying one delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// No snapshot yet (or the book was marked stale).
    Unsynced,
    /// Delta predates the snapshot.
    Outdated,
    /// Update ids skipped ahead; a fresh snapshot is needed.
    Gap,
}

/// Consumer-facing view of the book.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSnapshot {
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub synced: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Bounded bid/ask book for one symbol.
#[derive(Debug, Clone)]
pub struct OrderBook {
    depth: usize,
    bids: Vec<OrderBookLevel>,
    asks: Vec<OrderBookLevel>,
    synced: bool,
    last_update_id: Option<u64>,
    updated_at: Option<DateTime<Utc>>,
}

impl OrderBook {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            bids: Vec::new(),
            asks: Vec::new(),
            synced: false,
            last_update_id: None,
            updated_at: None,
        }
    }

    /// Replace the whole book with a fresh snapshot.
    pub fn replace_snapshot(&mut self, snapshot: DepthSnapshot) {
        self.bids = merge(&[], &snapshot.bids, BookSide::Bid, self.depth);
        self.asks = merge(&[], &snapshot.asks, BookSide::Ask, self.depth);
        self.last_update_id = snapshot.last_update_id;
        self.synced = true;
        self.updated_at = Some(Utc::now());
        debug!(
            bids = self.bids.len(),
            asks = self.asks.len(),
            last_update_id = ?self.last_update_id,
            "Order book snapshot applied"
        );
    }

    /// Merge a delta into the book.
    pub fn apply_delta(&mut self, delta: &DepthDelta) -> ApplyOutcome {
        if !self.synced {
            return ApplyOutcome::Unsynced;
        }

        if let (Some(last), Some(final_id)) = (self.last_update_id, delta.final_update_id) {
            if final_id <= last {
                return ApplyOutcome::Outdated;
            }
            if let Some(first_id) = delta.first_update_id {
                if first_id > last + 1 {
                    warn!(last, first_id, "Depth update gap, book needs a new snapshot");
                    self.mark_stale();
                    return ApplyOutcome::Gap;
                }
            }
        }

        self.bids = merge(&self.bids, &delta.bids, BookSide::Bid, self.depth);
        self.asks = merge(&self.asks, &delta.asks, BookSide::Ask, self.depth);
        if delta.final_update_id.is_some() {
            self.last_update_id = delta.final_update_id;
        }
        self.updated_at = Some(Utc::now());
        ApplyOutcome::Applied
    }

    /// Replace the book with a partial-depth frame unless it is older
    /// than what the book already reflects.
    pub fn apply_partial(&mut self, snapshot: DepthSnapshot) -> ApplyOutcome {
        if self.synced {
            if let (Some(last), Some(id)) = (self.last_update_id, snapshot.last_update_id) {
                if id <= last {
                    return ApplyOutcome::Outdated;
                }
            }
        }
        self.replace_snapshot(snapshot);
        ApplyOutcome::Applied
    }

    /// Forget the baseline; deltas are refused until the next snapshot.
    pub fn mark_stale(&mut self) {
        self.synced = false;
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn bids(&self) -> &[OrderBookLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[OrderBookLevel] {
        &self.asks
    }

    pub fn best_bid(&self) -> Option<OrderBookLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<OrderBookLevel> {
        self.asks.first().copied()
    }

    pub fn spread(&self) -> Option<Price> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    pub fn mid(&self) -> Option<Price> {
        Some(self.best_bid()?.price.mid(self.best_ask()?.price))
    }

    pub fn snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            bids: self.bids.clone(),
            asks: self.asks.clone(),
            synced: self.synced,
            updated_at: self.updated_at,
        }
    }
}
