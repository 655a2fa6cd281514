//! Archive ingestion pipeline
//!
//! ```text
//! ┌───────────┐  Job   ┌──────────────┐  file  ┌──────────────┐  rows  ┌─────────┐
//! │ Scheduler │──────▶│ WorkerPool   │──────▶│ l2 / trades  │──────▶│  Store  │
//! │ (scan fs) │bounded │ (N workers)  │ sorted │ (SyncedBook) │ batch  │ (merge) │
//! └───────────┘ queue  └──────────────┘        └──────────────┘        └─────────┘
//! ```
//!
//! A file is deleted only after its rows are committed. A crash before that
//! leaves the file in place and the next pass retries it. Only a file read
//! to the end records its completion mark, and the scheduler skips marked
//! dates; a partially committed file is retried and the store's conflict
//! suppression absorbs the overlap.

pub mod l2;
pub mod scheduler;
pub mod trades;
pub mod worker;

use crate::market::{DataType, Market};
use std::path::PathBuf;

pub use l2::{L2Settings, process_l2_file};
pub use scheduler::{PassReport, Scheduler};
pub use trades::process_trades_file;
pub use worker::{Ingestor, JobReport, WorkerPool};

/// Identity of a unit of work. At most one job per key is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub exchange: String,
    pub symbol: String,
    pub datatype: DataType,
}

/// All pending files of one (exchange, symbol, datatype), oldest first.
///
/// The order is load-bearing: L2 files build on the book left by the
/// previous file.
#[derive(Debug, Clone)]
pub struct Job {
    pub datatype: DataType,
    pub exchange: String,
    pub symbol: String,
    pub market: Market,
    pub dir: PathBuf,
    pub files: Vec<String>,
}

impl Job {
    pub fn key(&self) -> JobKey {
        JobKey {
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
            datatype: self.datatype,
        }
    }

    pub fn path_of(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }
}

/// Outcome of one successfully processed file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileReport {
    /// Rows handed to the store
    pub rows: usize,
    /// Rows the store actually inserted (duplicates excluded)
    pub inserted: u64,
    /// L2 records applied to the book
    pub applied: u64,
    /// L2 records dropped while waiting for a snapshot
    pub dropped: u64,
}
