//! In-memory [`MarketStore`] with the same uniqueness rules as the
//! Postgres tables. Used by tests and dry runs.

use super::{FileMark, MarketStore, Trade, snapshot_from_buckets};
use crate::buckets::BucketRow;
use crate::error::StoreError;
use crate::market::{DataType, Market};
use crate::orderbook::{BookSnapshot, Side};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;

type BucketKey = (Market, DateTime<Utc>, Side, i64);

#[derive(Default)]
struct Tables {
    trades: BTreeMap<(Market, String), Trade>,
    buckets: BTreeMap<BucketKey, BucketRow>,
    marks: BTreeSet<(Market, DataType, NaiveDate)>,
}

impl Tables {
    fn mark(&mut self, done: Option<&FileMark>) {
        if let Some(m) = done {
            self.marks.insert((m.market.clone(), m.datatype, m.date));
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
    commits: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail without storing anything.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successfully committed write batches.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub async fn trade_count(&self) -> usize {
        self.tables.lock().await.trades.len()
    }

    pub async fn bucket_count(&self) -> usize {
        self.tables.lock().await.buckets.len()
    }

    pub async fn trades(&self) -> Vec<Trade> {
        self.tables.lock().await.trades.values().cloned().collect()
    }

    /// All bucket rows ordered by market, time, side and bucket.
    pub async fn buckets(&self) -> Vec<BucketRow> {
        self.tables.lock().await.buckets.values().cloned().collect()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn fetch_snapshot(
        &self,
        market: &Market,
        as_of: DateTime<Utc>,
        step: f64,
    ) -> Result<Option<BookSnapshot>, StoreError> {
        let tables = self.tables.lock().await;
        let latest = tables
            .buckets
            .values()
            .filter(|r| &r.market == market && r.time <= as_of)
            .map(|r| r.time)
            .max();
        let Some(time) = latest else {
            return Ok(None);
        };
        let levels = tables
            .buckets
            .values()
            .filter(|r| &r.market == market && r.time == time)
            .cloned();
        Ok(Some(snapshot_from_buckets(market, time, levels, step)))
    }

    async fn exists(
        &self,
        market: &Market,
        datatype: DataType,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.marks.contains(&(market.clone(), datatype, date)))
    }

    async fn write_trades(&self, rows: &[Trade], done: Option<&FileMark>) -> Result<u64, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let mut inserted = 0;
        for row in rows {
            let key = (row.market.clone(), row.trade_id.clone());
            if !tables.trades.contains_key(&key) {
                tables.trades.insert(key, row.clone());
                inserted += 1;
            }
        }
        tables.mark(done);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(inserted)
    }

    async fn write_buckets(
        &self,
        rows: &[BucketRow],
        done: Option<&FileMark>,
    ) -> Result<u64, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let mut inserted = 0;
        for row in rows {
            let key = (row.market.clone(), row.time, row.side, row.bucket);
            if !tables.buckets.contains_key(&key) {
                tables.buckets.insert(key, row.clone());
                inserted += 1;
            }
        }
        tables.mark(done);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn market() -> Market {
        Market::derive("binance", "ethusdt", &["USDT".to_string()]).unwrap()
    }

    fn trade(id: &str, ts: DateTime<Utc>) -> Trade {
        Trade {
            timestamp: ts,
            market: market(),
            price: 3000.0,
            quantity: 0.1,
            is_buyer_maker: false,
            trade_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_trade_dedup_on_market_and_id() {
        let store = MemoryStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let first = store
            .write_trades(&[trade("1", ts), trade("2", ts), trade("2", ts)], None)
            .await
            .unwrap();
        let second = store.write_trades(&[trade("1", ts)], None).await.unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 0);
        assert_eq!(store.trade_count().await, 2);
        assert_eq!(store.commits(), 2);
    }

    fn mark(datatype: DataType, date: NaiveDate) -> FileMark {
        FileMark {
            market: market(),
            datatype,
            date,
        }
    }

    #[tokio::test]
    async fn test_bucket_dedup_on_market_time_side_bucket() {
        let store = MemoryStore::new();
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let row = |side, bucket| BucketRow {
            time,
            market: market(),
            mid_price: 3000.0,
            side,
            bucket,
            size: 1.5,
        };
        let batch = vec![row(Side::Bid, -1), row(Side::Bid, -2), row(Side::Ask, 1)];

        let first = store.write_buckets(&batch, None).await.unwrap();
        let second = store.write_buckets(&batch, None).await.unwrap();

        assert_eq!(first, 3);
        assert_eq!(second, 0);
        assert_eq!(store.bucket_count().await, 3);
    }

    #[tokio::test]
    async fn test_exists_tracks_completed_files_only() {
        let store = MemoryStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();

        // rows of a file that failed part-way
        store.write_trades(&[trade("1", ts)], None).await.unwrap();
        assert!(!store.exists(&market(), DataType::Trades, day(1)).await.unwrap());

        store
            .write_trades(&[trade("2", ts)], Some(&mark(DataType::Trades, day(1))))
            .await
            .unwrap();
        assert!(store.exists(&market(), DataType::Trades, day(1)).await.unwrap());
        assert!(!store.exists(&market(), DataType::Trades, day(2)).await.unwrap());
        assert!(
            !store
                .exists(&market(), DataType::IncrementalBookL2, day(1))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_failed_write_stores_nothing() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let done = mark(DataType::Trades, ts.date_naive());
        assert!(store.write_trades(&[trade("1", ts)], Some(&done)).await.is_err());
        assert!(!store.exists(&market(), DataType::Trades, done.date).await.unwrap());
        assert_eq!(store.trade_count().await, 0);
        assert_eq!(store.commits(), 0);
    }

    #[tokio::test]
    async fn test_fetch_snapshot_uses_latest_emission_before_as_of() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 23, 58, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 3, 2, 0, 1, 0).unwrap();
        let row = |time, side, bucket| BucketRow {
            time,
            market: market(),
            mid_price: 100.0,
            side,
            bucket,
            size: 1.0,
        };
        store
            .write_buckets(
                &[
                    row(t0, Side::Bid, -9),
                    row(t1, Side::Bid, -1),
                    row(t1, Side::Ask, 1),
                    row(t2, Side::Ask, 7),
                ],
                None,
            )
            .await
            .unwrap();

        let as_of = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let snap = store
            .fetch_snapshot(&market(), as_of, 1.0)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(snap.time, t1);
        assert_eq!(snap.bids.len(), 1);
        assert_eq!(snap.bids[0].price, 99.0);
        assert_eq!(snap.asks[0].price, 101.0);

        let before_any = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert!(
            store
                .fetch_snapshot(&market(), before_any, 1.0)
                .await
                .unwrap()
                .is_none()
        );
    }
}
