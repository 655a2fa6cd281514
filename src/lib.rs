//! l2_ingest - L2 market data archive ingestion
//!
//! Replays daily `incremental_book_L2` and `trades` archives, rebuilds a
//! price-level order book per market and stores depth-bucketed snapshots
//! and trades in PostgreSQL.
//!
//! # Modules
//!
//! - [`market`] - Market identity and dataset kinds
//! - [`orderbook`] - BTreeMap-based price-level book
//! - [`depth`] - Mid price and depth-limited snapshots
//! - [`buckets`] - Mid-relative price bucket aggregation
//! - [`recovery`] - Snapshot gate in front of the book
//! - [`decoder`] - gzip CSV archive decoding
//! - [`store`] - Persistence trait, Postgres and in-memory stores
//! - [`ingest`] - Scheduler, worker pool and per-file processing

pub mod buckets;
pub mod config;
pub mod db;
pub mod decoder;
pub mod depth;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod market;
pub mod orderbook;
pub mod recovery;
pub mod store;

// Convenient re-exports at crate root
pub use buckets::{BucketRow, bucketize};
pub use config::{AppConfig, IngestConfig};
pub use depth::DepthSnapshot;
pub use error::{ConfigError, DecodeError, IngestError, StoreError};
pub use ingest::{Ingestor, Job, Scheduler, WorkerPool};
pub use market::{DataType, Market};
pub use orderbook::{BookSnapshot, OrderBook, PriceLevel, Side};
pub use recovery::{SyncState, SyncedBook};
pub use store::{FileMark, MarketStore, MemoryStore, PgMarketStore, Trade};
