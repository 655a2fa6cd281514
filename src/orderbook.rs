//! OrderBook - BTreeMap-based L2 price level book
//!
//! Holds the current aggregated size per price level for one market.
//! No history is kept; every update replaces the level it touches.

use crate::market::Market;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bid" | "bids" | "buy" | "b" => Ok(Side::Bid),
            "ask" | "asks" | "sell" | "a" | "s" => Ok(Side::Ask),
            other => Err(format!("unknown side: {}", other)),
        }
    }
}

/// One aggregated price level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

impl PriceLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }
}

/// Full book state at a point in time, as persisted by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    pub time: DateTime<Utc>,
    pub market: Market,
    /// Best (highest) bid first
    pub bids: Vec<PriceLevel>,
    /// Best (lowest) ask first
    pub asks: Vec<PriceLevel>,
}

impl BookSnapshot {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// L2 order book keyed by the IEEE-754 bit pattern of the price.
///
/// # Key Design:
/// - For finite non-negative `f64`, `to_bits()` is monotonic in the value,
///   so asks use the raw bits (ascending, lowest price = best ask)
/// - Bids use negated keys `u64::MAX - bits` (so highest price comes first = best bid)
///
/// Callers must only pass finite, non-negative prices; the decoder rejects
/// anything else before it reaches the book.
#[derive(Debug, Default, Clone)]
pub struct OrderBook {
    /// Sell levels: price bits -> size (ascending, lowest = best)
    asks: BTreeMap<u64, f64>,
    /// Buy levels: (MAX - price bits) -> size (so highest price first)
    bids: BTreeMap<u64, f64>,
}

#[inline]
fn key_for(side: Side, price: f64) -> u64 {
    // -0.0 + 0.0 == +0.0, keeps a single key for zero
    let bits = (price + 0.0).to_bits();
    match side {
        Side::Bid => u64::MAX - bits,
        Side::Ask => bits,
    }
}

#[inline]
fn price_for(side: Side, key: u64) -> f64 {
    match side {
        Side::Bid => f64::from_bits(u64::MAX - key),
        Side::Ask => f64::from_bits(key),
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the level when `size > 0`, remove it otherwise.
    ///
    /// Removing a level that does not exist is a no-op. O(log n).
    pub fn update(&mut self, side: Side, price: f64, size: f64) {
        debug_assert!(price.is_finite() && price >= 0.0, "invalid price {price}");
        let key = key_for(side, price);
        let book = self.side_mut(side);
        if size > 0.0 {
            book.insert(key, size);
        } else {
            book.remove(&key);
        }
    }

    /// Levels of one side, best first (bids descending, asks ascending).
    pub fn levels(&self, side: Side) -> impl Iterator<Item = PriceLevel> + '_ {
        let book = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        book.iter()
            .map(move |(&key, &size)| PriceLevel::new(price_for(side, key), size))
    }

    #[inline]
    pub fn best_bid(&self) -> Option<f64> {
        self.bids
            .first_key_value()
            .map(|(&k, _)| price_for(Side::Bid, k))
    }

    #[inline]
    pub fn best_ask(&self) -> Option<f64> {
        self.asks
            .first_key_value()
            .map(|(&k, _)| price_for(Side::Ask, k))
    }

    /// Number of price levels on each side (bid_depth, ask_depth)
    #[inline]
    pub fn depth(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<u64, f64> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }
}
