//! Snapshot recovery state machine
//!
//! An incremental L2 stream only describes changes. Until a base state exists
//! (a snapshot restored from the store, or an in-stream record flagged
//! `is_snapshot`), every diff is dropped. Applying a diff to an unknown base
//! corrupts the book with no way to detect it later.
//!
//! ```text
//! AwaitingSnapshot ──(seeded from store | first is_snapshot record)──▶ Synced
//! ```
//!
//! The transition is one-way for the lifetime of a [`SyncedBook`].

use crate::orderbook::{BookSnapshot, OrderBook, Side};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

/// How far before the first file's date a stored snapshot may be.
pub const DEFAULT_SEED_TOLERANCE: TimeDelta = TimeDelta::minutes(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    AwaitingSnapshot,
    Synced,
}

/// Result of trying to seed a book from a stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    Seeded,
    /// Snapshot is older than the tolerance window (or after `as_of`)
    Stale,
    /// Snapshot carries no levels
    Empty,
}

/// Order book plus its recovery state. Owned by exactly one job.
#[derive(Debug)]
pub struct SyncedBook {
    book: OrderBook,
    state: SyncState,
}

impl Default for SyncedBook {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncedBook {
    pub fn new() -> Self {
        Self {
            book: OrderBook::new(),
            state: SyncState::AwaitingSnapshot,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_synced(&self) -> bool {
        self.state == SyncState::Synced
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Replay a stored snapshot into the book if it is recent enough.
    ///
    /// Accepted when `as_of - tolerance <= snapshot.time <= as_of` and the
    /// snapshot has at least one level; a stale candidate is discarded and the
    /// book keeps waiting for an in-stream snapshot.
    pub fn seed(
        &mut self,
        snapshot: &BookSnapshot,
        as_of: DateTime<Utc>,
        tolerance: TimeDelta,
    ) -> SeedOutcome {
        let age = as_of - snapshot.time;
        if age < TimeDelta::zero() || age > tolerance {
            warn!(
                market = %snapshot.market,
                snapshot_time = %snapshot.time,
                as_of = %as_of,
                "found snapshot but ignoring because it's too far from file date"
            );
            return SeedOutcome::Stale;
        }
        if snapshot.is_empty() {
            return SeedOutcome::Empty;
        }

        for level in &snapshot.bids {
            self.book.update(Side::Bid, level.price, level.size);
        }
        for level in &snapshot.asks {
            self.book.update(Side::Ask, level.price, level.size);
        }
        self.state = SyncState::Synced;
        debug!(market = %snapshot.market, timestamp = %snapshot.time, "restored recent snapshot");
        SeedOutcome::Seeded
    }

    /// Feed one record through the gate. Returns whether it reached the book.
    ///
    /// While awaiting, only a record with `is_snapshot == true` passes; it
    /// flips the state to [`SyncState::Synced`] and is itself applied.
    pub fn apply(&mut self, side: Side, price: f64, size: f64, is_snapshot: bool) -> bool {
        if self.state == SyncState::AwaitingSnapshot {
            if !is_snapshot {
                return false;
            }
            self.state = SyncState::Synced;
        }
        self.book.update(side, price, size);
        true
    }
}
