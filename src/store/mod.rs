//! Persistence boundary
//!
//! The ingestion engine only needs four operations from storage. They are
//! expressed as a trait so the pipeline can run against Postgres in
//! production and against [`MemoryStore`] in tests.

pub mod memory;
pub mod postgres;

use crate::buckets::BucketRow;
use crate::decoder::TradeRecord;
use crate::error::StoreError;
use crate::market::{DataType, Market};
use crate::orderbook::{BookSnapshot, PriceLevel, Side};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

pub use memory::MemoryStore;
pub use postgres::PgMarketStore;

/// A trade row; unique per `(market, trade_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub market: Market,
    pub price: f64,
    pub quantity: f64,
    pub is_buyer_maker: bool,
    pub trade_id: String,
}

impl Trade {
    pub fn from_record(market: &Market, record: TradeRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            market: market.clone(),
            price: record.price,
            quantity: record.quantity,
            is_buyer_maker: record.is_buyer_maker,
            trade_id: record.trade_id,
        }
    }
}

/// Marks one source file `(market, datatype, date)` as fully ingested.
///
/// Committed in the same transaction as the file's last batch, and only for
/// files that were read to the end. A file that failed part-way commits its
/// rows without a mark, so the next pass retries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMark {
    pub market: Market,
    pub datatype: DataType,
    pub date: NaiveDate,
}

#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Most recent persisted book at or before `as_of`, rebuilt from its
    /// buckets with bucket width `step`.
    async fn fetch_snapshot(
        &self,
        market: &Market,
        as_of: DateTime<Utc>,
        step: f64,
    ) -> Result<Option<BookSnapshot>, StoreError>;

    /// Whether the file for `market`/`datatype` on `date` (UTC) was fully
    /// ingested. Partially committed days report `false`.
    async fn exists(
        &self,
        market: &Market,
        datatype: DataType,
        date: NaiveDate,
    ) -> Result<bool, StoreError>;

    /// Insert trades atomically, silently skipping duplicates, and record
    /// `done` in the same transaction. Returns the number of newly stored rows.
    async fn write_trades(&self, rows: &[Trade], done: Option<&FileMark>) -> Result<u64, StoreError>;

    /// Insert bucket rows atomically, silently skipping duplicates, and record
    /// `done` in the same transaction. Returns the number of newly stored rows.
    async fn write_buckets(
        &self,
        rows: &[BucketRow],
        done: Option<&FileMark>,
    ) -> Result<u64, StoreError>;
}

/// `[date 00:00, date+1 00:00)` in UTC.
pub fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + TimeDelta::days(1))
}

/// Rebuild a book from the buckets of one emission point.
///
/// Each bucket becomes one level at its representative price; buckets that
/// would land on a negative price are dropped.
pub fn snapshot_from_buckets(
    market: &Market,
    time: DateTime<Utc>,
    rows: impl IntoIterator<Item = BucketRow>,
    step: f64,
) -> BookSnapshot {
    let mut bids = Vec::new();
    let mut asks = Vec::new();
    for row in rows {
        let price = row.price(step);
        if !(price.is_finite() && price >= 0.0 && row.size > 0.0) {
            continue;
        }
        match row.side {
            Side::Bid => bids.push(PriceLevel::new(price, row.size)),
            Side::Ask => asks.push(PriceLevel::new(price, row.size)),
        }
    }
    bids.sort_by(|a, b| b.price.total_cmp(&a.price));
    asks.sort_by(|a, b| a.price.total_cmp(&b.price));
    BookSnapshot {
        time,
        market: market.clone(),
        bids,
        asks,
    }
}
