//! `trades` file processing

use super::FileReport;
use crate::decoder::{CsvSource, TradeColumns, open_archive};
use crate::error::{DecodeError, IngestError};
use crate::market::Market;
use crate::store::{FileMark, MarketStore, Trade};
use std::io::Read;
use std::path::Path;
use tracing::warn;

/// Trades decoded from one file, plus the error that cut decoding short.
#[derive(Debug, Default)]
pub struct TradeBatch {
    pub rows: Vec<Trade>,
    pub error: Option<DecodeError>,
}

pub fn decode_trades<R: Read>(source: CsvSource<R>, market: &Market) -> Result<TradeBatch, DecodeError> {
    let columns = TradeColumns::resolve(source.index())?;
    let mut batch = TradeBatch::default();
    for record in source.records(columns) {
        match record {
            Ok(r) => batch.rows.push(Trade::from_record(market, r)),
            Err(e) => {
                batch.error = Some(e);
                break;
            }
        }
    }
    Ok(batch)
}

/// Decode and persist one trades archive in a single atomic batch.
///
/// Trades decoded before a record error are still committed, without the
/// completion mark; the error is returned afterwards so the file is kept
/// and retried.
pub async fn process_trades_file<S: MarketStore + ?Sized>(
    store: &S,
    path: &Path,
    mark: &FileMark,
) -> Result<FileReport, IngestError> {
    let market = &mark.market;
    let path_buf = path.to_path_buf();
    let task_market = market.clone();
    let batch = tokio::task::spawn_blocking(move || {
        open_archive(&path_buf)
            .and_then(|source| decode_trades(source, &task_market).map_err(IngestError::from))
    })
    .await??;

    let done = batch.error.is_none().then_some(mark);
    let inserted = if batch.rows.is_empty() && done.is_none() {
        0
    } else {
        store.write_trades(&batch.rows, done).await?
    };

    if let Some(err) = batch.error {
        warn!(
            market = %market,
            file = %path.display(),
            committed = batch.rows.len(),
            error = %err,
            "decode failed part-way, committed rows decoded so far"
        );
        return Err(err.into());
    }

    Ok(FileReport {
        rows: batch.rows.len(),
        inserted,
        ..FileReport::default()
    })
}
