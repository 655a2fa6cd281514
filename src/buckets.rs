//! Price bucket aggregation
//!
//! Quantizes a depth-limited snapshot into fixed-width buckets measured from
//! mid price, one storable row per non-empty `(side, bucket)`.

use crate::market::Market;
use crate::orderbook::{PriceLevel, Side};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Default bucket width in quote currency.
pub const DEFAULT_BUCKET_STEP: f64 = 1.0;

/// One aggregated bucket of one emitted snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketRow {
    pub time: DateTime<Utc>,
    pub market: Market,
    pub mid_price: f64,
    pub side: Side,
    /// Signed number of `step` widths between the bucket and mid price.
    pub bucket: i64,
    pub size: f64,
}

impl BucketRow {
    /// Representative price of the bucket.
    pub fn price(&self, step: f64) -> f64 {
        self.mid_price + self.bucket as f64 * step
    }
}

#[inline]
pub fn bucket_offset(price: f64, mid: f64, step: f64) -> i64 {
    ((price - mid) / step).round() as i64
}

/// Aggregate `bids` and `asks` into rows stamped `ts`.
///
/// Output is sorted by side (bids first) then bucket offset, so the same
/// levels always produce the same rows regardless of input order.
pub fn bucketize(
    ts: DateTime<Utc>,
    market: &Market,
    mid: f64,
    step: f64,
    bids: &[PriceLevel],
    asks: &[PriceLevel],
) -> Vec<BucketRow> {
    let mut acc: BTreeMap<(Side, i64), f64> = BTreeMap::new();
    for (side, levels) in [(Side::Bid, bids), (Side::Ask, asks)] {
        for level in levels {
            *acc.entry((side, bucket_offset(level.price, mid, step)))
                .or_insert(0.0) += level.size;
        }
    }

    acc.into_iter()
        .filter(|(_, size)| *size > 0.0)
        .map(|((side, bucket), size)| BucketRow {
            time: ts,
            market: market.clone(),
            mid_price: mid,
            side,
            bucket,
            size,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn market() -> Market {
        Market::derive("binance", "btcusdt", &["USDT".to_string()]).unwrap()
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn total(rows: &[BucketRow], side: Side) -> f64 {
        rows.iter().filter(|r| r.side == side).map(|r| r.size).sum()
    }

    #[test]
    fn test_levels_in_same_bucket_accumulate() {
        let bids = [PriceLevel::new(99.6, 1.0), PriceLevel::new(99.2, 2.0)];
        let asks = [PriceLevel::new(100.4, 3.0)];

        let rows = bucketize(ts(), &market(), 100.0, 1.0, &bids, &asks);

        assert_eq!(rows.len(), 3);
        assert_eq!((rows[0].side, rows[0].bucket, rows[0].size), (Side::Bid, -1, 2.0));
        assert_eq!((rows[1].side, rows[1].bucket, rows[1].size), (Side::Bid, 0, 1.0));
        assert_eq!((rows[2].side, rows[2].bucket, rows[2].size), (Side::Ask, 0, 3.0));
        assert!(rows.iter().all(|r| r.mid_price == 100.0 && r.time == ts()));
    }

    #[test]
    fn test_sides_keep_separate_bucket_space() {
        let bids = [PriceLevel::new(100.0, 1.0)];
        let asks = [PriceLevel::new(100.0, 1.0)];

        let rows = bucketize(ts(), &market(), 100.0, 0.5, &bids, &asks);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].bucket, rows[1].bucket);
    }

    #[test]
    fn test_size_is_conserved() {
        let bids: Vec<PriceLevel> = (0..50)
            .map(|i| PriceLevel::new(1000.0 - i as f64 * 0.37, 0.25 + i as f64))
            .collect();
        let asks: Vec<PriceLevel> = (0..50)
            .map(|i| PriceLevel::new(1000.5 + i as f64 * 0.41, 1.5))
            .collect();

        let rows = bucketize(ts(), &market(), 1000.25, 2.0, &bids, &asks);

        let bid_in: f64 = bids.iter().map(|l| l.size).sum();
        let ask_in: f64 = asks.iter().map(|l| l.size).sum();
        assert!((total(&rows, Side::Bid) - bid_in).abs() < 1e-9);
        assert!((total(&rows, Side::Ask) - ask_in).abs() < 1e-9);
    }

    #[test]
    fn test_output_is_order_independent() {
        let mut bids = vec![
            PriceLevel::new(98.0, 1.0),
            PriceLevel::new(99.0, 2.0),
            PriceLevel::new(97.0, 3.0),
        ];
        let asks = vec![PriceLevel::new(101.0, 1.0)];

        let a = bucketize(ts(), &market(), 100.0, 1.0, &bids, &asks);
        bids.reverse();
        let b = bucketize(ts(), &market(), 100.0, 1.0, &bids, &asks);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_snapshot_yields_no_rows() {
        let rows = bucketize(ts(), &market(), 100.0, 1.0, &[], &[]);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_bucket_price() {
        let rows = bucketize(ts(), &market(), 100.0, 0.5, &[PriceLevel::new(98.9, 1.0)], &[]);
        assert_eq!(rows[0].bucket, -2);
        assert_eq!(rows[0].price(0.5), 99.0);
    }
}
