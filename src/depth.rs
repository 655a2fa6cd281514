//! Depth-limited views of an [`OrderBook`]

use crate::orderbook::{OrderBook, PriceLevel, Side};

/// Default fraction of mid price kept on each side of the book.
pub const DEFAULT_DEPTH_BAND: f64 = 0.05;

/// Default ceiling on levels per side in one snapshot.
pub const DEFAULT_MAX_LEVELS: usize = 2000;

/// Depth-limited book view, best level first on each side.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthSnapshot {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub mid: f64,
}

impl OrderBook {
    /// Midpoint of best bid and best ask, `None` while either side is empty.
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Levels with `price` in `mid * (1 ± band)`, at most `max_levels` per side.
    ///
    /// Returns `None` when the book has no mid price (one side empty); no
    /// emission happens for such a book.
    pub fn snapshot_with_depth_limit(&self, band: f64, max_levels: usize) -> Option<DepthSnapshot> {
        let mid = self.mid_price()?;
        let lower = mid * (1.0 - band);
        let upper = mid * (1.0 + band);

        // Both iterators walk away from mid, so the band is a contiguous run.
        let bids = self
            .levels(Side::Bid)
            .skip_while(|l| l.price > upper)
            .take_while(|l| l.price >= lower)
            .take(max_levels)
            .collect();
        let asks = self
            .levels(Side::Ask)
            .skip_while(|l| l.price < lower)
            .take_while(|l| l.price <= upper)
            .take(max_levels)
            .collect();

        Some(DepthSnapshot { bids, asks, mid })
    }
}
