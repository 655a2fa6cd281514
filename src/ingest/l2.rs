//! `incremental_book_L2` file processing
//!
//! Decoding and book maintenance are CPU-bound and run on the blocking
//! pool; the book moves into the blocking task and back, so exactly one
//! owner touches it at any time. Rows are written in a single batch per
//! file.

use super::FileReport;
use crate::buckets::{BucketRow, bucketize};
use crate::config::IngestConfig;
use crate::decoder::{CsvSource, L2Columns, open_archive};
use crate::error::{DecodeError, IngestError};
use crate::market::Market;
use crate::recovery::SyncedBook;
use crate::store::{FileMark, MarketStore};
use chrono::{DateTime, TimeDelta, Utc};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Snapshot shaping parameters for one market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct L2Settings {
    pub depth_band: f64,
    pub max_levels: usize,
    pub bucket_step: f64,
    /// Minimum spacing between two emitted snapshots
    pub emit_interval: TimeDelta,
}

impl L2Settings {
    pub fn for_market(config: &IngestConfig, market: &Market) -> Self {
        Self {
            depth_band: config.depth_band,
            max_levels: config.max_levels,
            bucket_step: config.bucket_step_for(market),
            emit_interval: config.emit_interval(),
        }
    }
}

/// Result of replaying one file into a book.
#[derive(Debug, Default)]
pub struct Replay {
    pub rows: Vec<BucketRow>,
    pub applied: u64,
    pub dropped: u64,
    pub emissions: u64,
    /// Record-level failure that stopped the replay early. Rows emitted
    /// before it are kept.
    pub error: Option<DecodeError>,
}

/// Emits bucketed snapshots at timestamp boundaries.
///
/// The clock starts at the first applied record. When the timestamp moves
/// and at least `emit_interval` has passed since the last emission, the
/// book as of the previous timestamp is emitted before the new record is
/// applied. A book without a mid price is skipped and the clock stays put.
struct Emitter<'a> {
    market: &'a Market,
    settings: &'a L2Settings,
    last_ts: Option<DateTime<Utc>>,
    last_emit: Option<DateTime<Utc>>,
}

impl<'a> Emitter<'a> {
    fn new(market: &'a Market, settings: &'a L2Settings) -> Self {
        Self {
            market,
            settings,
            last_ts: None,
            last_emit: None,
        }
    }

    /// Called before a record stamped `ts` is applied.
    fn before_apply(&mut self, ts: DateTime<Utc>, book: &SyncedBook, out: &mut Replay) {
        let Some(prev) = self.last_ts else {
            self.last_emit = Some(ts);
            return;
        };
        let last_emit = self.last_emit.unwrap_or(prev);
        if ts != prev && ts - last_emit >= self.settings.emit_interval && self.emit(prev, book, out) {
            self.last_emit = Some(ts);
        }
    }

    fn after_apply(&mut self, ts: DateTime<Utc>) {
        self.last_ts = Some(ts);
    }

    /// Final emission at the last applied timestamp.
    fn finish(&mut self, book: &SyncedBook, out: &mut Replay) {
        if let Some(last) = self.last_ts {
            self.emit(last, book, out);
        }
    }

    fn emit(&self, ts: DateTime<Utc>, book: &SyncedBook, out: &mut Replay) -> bool {
        let s = self.settings;
        let Some(depth) = book.book().snapshot_with_depth_limit(s.depth_band, s.max_levels) else {
            debug!(market = %self.market, timestamp = %ts, "one-sided book, skipping emission");
            return false;
        };
        let rows = bucketize(ts, self.market, depth.mid, s.bucket_step, &depth.bids, &depth.asks);
        out.rows.extend(rows);
        out.emissions += 1;
        true
    }
}

/// Replay one decoded file into `book`, collecting bucket rows.
///
/// Header problems fail before any record is read. A bad record stops the
/// replay; everything emitted up to that point is returned with the error.
pub fn replay_l2<R: Read>(
    source: CsvSource<R>,
    market: &Market,
    book: &mut SyncedBook,
    settings: &L2Settings,
) -> Result<Replay, DecodeError> {
    let columns = L2Columns::resolve(source.index())?;
    if !book.is_synced() && !columns.has_snapshot_marker() {
        // nothing could ever pass the gate
        return Err(DecodeError::MissingField("is_snapshot"));
    }

    let mut out = Replay::default();
    let mut emitter = Emitter::new(market, settings);

    for record in source.records(columns) {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                out.error = Some(e);
                return Ok(out);
            }
        };

        if !book.is_synced() && !record.is_snapshot {
            out.dropped += 1;
            continue;
        }

        emitter.before_apply(record.timestamp, book, &mut out);
        book.apply(record.side, record.price, record.size, record.is_snapshot);
        emitter.after_apply(record.timestamp);
        out.applied += 1;
    }

    emitter.finish(book, &mut out);
    Ok(out)
}

/// Decode, replay and persist one L2 archive.
///
/// On success the book reflects every applied record of the file, the file
/// is marked complete and the caller may delete it. Rows emitted before a
/// decode error are still committed without the mark, then the decode error
/// is returned.
pub async fn process_l2_file<S: MarketStore + ?Sized>(
    store: &S,
    path: &Path,
    mark: &FileMark,
    book: &mut SyncedBook,
    settings: L2Settings,
) -> Result<FileReport, IngestError> {
    let market = &mark.market;
    let owned = std::mem::take(book);
    let path_buf: PathBuf = path.to_path_buf();
    let task_market = market.clone();

    // A panicking task loses the book; the replacement starts unsynced.
    let (owned, replay) = tokio::task::spawn_blocking(move || {
        let mut owned = owned;
        let replay = open_archive(&path_buf).and_then(|source| {
            replay_l2(source, &task_market, &mut owned, &settings).map_err(IngestError::from)
        });
        (owned, replay)
    })
    .await?;
    *book = owned;
    let replay = replay?;

    let done = replay.error.is_none().then_some(mark);
    let inserted = if replay.rows.is_empty() && done.is_none() {
        0
    } else {
        store.write_buckets(&replay.rows, done).await?
    };

    if replay.dropped > 0 {
        debug!(market = %market, dropped = replay.dropped, "records dropped before first snapshot");
    }

    if let Some(err) = replay.error {
        warn!(
            market = %market,
            file = %path.display(),
            committed = replay.rows.len(),
            error = %err,
            "decode failed part-way, committed rows decoded so far"
        );
        return Err(err.into());
    }

    Ok(FileReport {
        rows: replay.rows.len(),
        inserted,
        applied: replay.applied,
        dropped: replay.dropped,
    })
}
