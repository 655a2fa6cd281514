//! Archive row decoding
//!
//! Daily archives are gzip-compressed CSV files with a header row. Columns
//! are located by lower-cased header name, so column order and extra
//! columns do not matter; a few fields accept alternative names.

use crate::error::{DecodeError, IngestError};
use crate::orderbook::Side;
use chrono::{DateTime, NaiveDate, Utc};
use flate2::read::GzDecoder;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Suffix of every archive file the scheduler picks up.
pub const ARCHIVE_SUFFIX: &str = ".csv.gz";

const L2_SIZE_FIELDS: &[&str] = &["quantity", "amount"];
const TRADE_SIZE_FIELDS: &[&str] = &["quantity", "amount", "size"];
const TRADE_ID_FIELDS: &[&str] = &["trade_id", "id"];
const TRADE_MAKER_FIELDS: &[&str] = &["is_buyer_maker", "maker"];

/// Lower-cased header name -> column position, built once per file.
#[derive(Debug, Clone, Default)]
pub struct HeaderIndex {
    columns: FxHashMap<String, usize>,
}

impl HeaderIndex {
    pub fn new<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        let columns = headers
            .into_iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_lowercase(), i))
            .collect();
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }

    pub fn require(&self, name: &'static str) -> Result<usize, DecodeError> {
        self.get(name).ok_or(DecodeError::MissingField(name))
    }

    /// First present column among `names`, in preference order.
    pub fn first_of(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|n| self.get(n))
    }

    pub fn require_any(&self, names: &'static [&'static str]) -> Result<usize, DecodeError> {
        self.first_of(names).ok_or(DecodeError::MissingAnyField(names))
    }
}

/// Open a `.csv.gz` archive for streaming decompression.
pub fn open_archive(path: &Path) -> Result<CsvSource<GzDecoder<BufReader<File>>>, IngestError> {
    let file = File::open(path)?;
    Ok(CsvSource::new(GzDecoder::new(BufReader::new(file)))?)
}

/// Date encoded in an archive name (`2024-03-01.csv.gz`).
pub fn file_date(file_name: &str) -> Result<NaiveDate, IngestError> {
    let stem = file_name.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(file_name);
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").map_err(|_| IngestError::FileDate(file_name.to_string()))
}

/// A CSV stream whose header row has been read.
pub struct CsvSource<R: Read> {
    csv: csv::Reader<R>,
    index: HeaderIndex,
}

impl<R: Read> CsvSource<R> {
    pub fn new(reader: R) -> Result<Self, DecodeError> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let index = HeaderIndex::new(csv.headers()?.iter());
        Ok(Self { csv, index })
    }

    pub fn index(&self) -> &HeaderIndex {
        &self.index
    }

    /// Lazy, non-restartable sequence of typed records.
    pub fn records<C: RecordColumns>(self, columns: C) -> Records<R, C> {
        Records {
            csv: self.csv,
            columns,
            record: csv::StringRecord::new(),
            row: 0,
        }
    }
}

/// Resolved column layout able to decode one row into a record.
pub trait RecordColumns {
    type Record;

    fn decode(&self, record: &csv::StringRecord, row: u64) -> Result<Self::Record, DecodeError>;
}

pub struct Records<R: Read, C> {
    csv: csv::Reader<R>,
    columns: C,
    record: csv::StringRecord,
    row: u64,
}

impl<R: Read, C: RecordColumns> Iterator for Records<R, C> {
    type Item = Result<C::Record, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.csv.read_record(&mut self.record) {
            Ok(false) => None,
            Ok(true) => {
                self.row += 1;
                Some(self.columns.decode(&self.record, self.row))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

// ============================================================
// Field parsing
// ============================================================

fn field<'r>(record: &'r csv::StringRecord, col: usize, row: u64) -> Result<&'r str, DecodeError> {
    record.get(col).ok_or(DecodeError::ShortRow { row })
}

fn invalid(row: u64, field: &'static str, value: &str) -> DecodeError {
    DecodeError::InvalidValue {
        row,
        field,
        value: value.to_string(),
    }
}

/// Microseconds since the Unix epoch.
fn parse_timestamp(raw: &str, row: u64) -> Result<DateTime<Utc>, DecodeError> {
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_micros)
        .ok_or_else(|| invalid(row, "timestamp", raw))
}

/// Finite, non-negative decimal.
fn parse_amount(raw: &str, row: u64, name: &'static str) -> Result<f64, DecodeError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(invalid(row, name, raw)),
    }
}

/// Accepts the usual spellings: `1 t T true TRUE True` / `0 f F false FALSE False`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

// ============================================================
// incremental_book_L2
// ============================================================

/// One incremental L2 row.
#[derive(Debug, Clone, PartialEq)]
pub struct L2Record {
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub is_snapshot: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct L2Columns {
    timestamp: usize,
    side: usize,
    price: usize,
    size: usize,
    is_snapshot: Option<usize>,
}

impl L2Columns {
    /// Requires `timestamp`, `side`, `price` and `quantity|amount`.
    /// `is_snapshot` is optional here; the caller decides whether it needs it.
    pub fn resolve(index: &HeaderIndex) -> Result<Self, DecodeError> {
        Ok(Self {
            size: index.require_any(L2_SIZE_FIELDS)?,
            timestamp: index.require("timestamp")?,
            side: index.require("side")?,
            price: index.require("price")?,
            is_snapshot: index.get("is_snapshot"),
        })
    }

    pub fn has_snapshot_marker(&self) -> bool {
        self.is_snapshot.is_some()
    }
}

impl RecordColumns for L2Columns {
    type Record = L2Record;

    fn decode(&self, record: &csv::StringRecord, row: u64) -> Result<L2Record, DecodeError> {
        let is_snapshot = match self.is_snapshot {
            Some(col) => {
                let raw = field(record, col, row)?;
                parse_bool(raw).ok_or_else(|| invalid(row, "is_snapshot", raw))?
            }
            None => false,
        };
        let side_raw = field(record, self.side, row)?;
        Ok(L2Record {
            timestamp: parse_timestamp(field(record, self.timestamp, row)?, row)?,
            side: side_raw.parse().map_err(|_| invalid(row, "side", side_raw))?,
            price: parse_amount(field(record, self.price, row)?, row, "price")?,
            size: parse_amount(field(record, self.size, row)?, row, "amount")?,
            is_snapshot,
        })
    }
}

// ============================================================
// trades
// ============================================================

/// One trade row, before it is tagged with its market.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub quantity: f64,
    pub is_buyer_maker: bool,
    pub trade_id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TradeColumns {
    timestamp: usize,
    price: usize,
    quantity: usize,
    trade_id: usize,
    maker: Option<usize>,
}

impl TradeColumns {
    /// Requires `timestamp`, `price`, `quantity|amount|size` and `trade_id|id`.
    /// The maker flag (`is_buyer_maker|maker`) is optional and defaults to false.
    pub fn resolve(index: &HeaderIndex) -> Result<Self, DecodeError> {
        Ok(Self {
            timestamp: index.require("timestamp")?,
            price: index.require("price")?,
            quantity: index.require_any(TRADE_SIZE_FIELDS)?,
            trade_id: index.require_any(TRADE_ID_FIELDS)?,
            maker: index.first_of(TRADE_MAKER_FIELDS),
        })
    }
}

impl RecordColumns for TradeColumns {
    type Record = TradeRecord;

    fn decode(&self, record: &csv::StringRecord, row: u64) -> Result<TradeRecord, DecodeError> {
        // unparsable maker flags count as false
        let is_buyer_maker = match self.maker {
            Some(col) => record.get(col).and_then(parse_bool).unwrap_or(false),
            None => false,
        };
        Ok(TradeRecord {
            timestamp: parse_timestamp(field(record, self.timestamp, row)?, row)?,
            price: parse_amount(field(record, self.price, row)?, row, "price")?,
            quantity: parse_amount(field(record, self.quantity, row)?, row, "quantity")?,
            is_buyer_maker,
            trade_id: field(record, self.trade_id, row)?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn source(csv: &str) -> CsvSource<&[u8]> {
        CsvSource::new(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let src = source("Timestamp,SIDE,Price,Amount\n");
        assert_eq!(src.index().get("timestamp"), Some(0));
        assert_eq!(src.index().get("side"), Some(1));
        assert_eq!(src.index().first_of(&["quantity", "amount"]), Some(3));
        assert_eq!(src.index().get("quantity"), None);
    }

    #[test]
    fn test_l2_rows_decode() {
        let src = source(
            "exchange,symbol,timestamp,local_timestamp,is_snapshot,side,price,amount\n\
             binance,BTCUSDT,1709251200000000,1709251200001000,true,bid,61000.5,1.25\n\
             binance,BTCUSDT,1709251200500000,1709251200501000,false,ask,61001,0\n",
        );
        let cols = L2Columns::resolve(src.index()).unwrap();
        assert!(cols.has_snapshot_marker());

        let rows: Vec<L2Record> = src.records(cols).collect::<Result<_, _>>().unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert!(rows[0].is_snapshot);
        assert_eq!(rows[0].side, Side::Bid);
        assert_eq!(rows[0].price, 61000.5);
        assert_eq!(rows[1].side, Side::Ask);
        assert_eq!(rows[1].size, 0.0);
        assert!(!rows[1].is_snapshot);
    }

    #[test]
    fn test_l2_requires_size_column() {
        let src = source("timestamp,side,price\n");
        let err = L2Columns::resolve(src.index()).unwrap_err();
        assert!(matches!(err, DecodeError::MissingAnyField(_)));
    }

    #[test]
    fn test_l2_invalid_price_is_rejected() {
        let src = source("timestamp,side,price,amount\n1,bid,NaN,1\n");
        let cols = L2Columns::resolve(src.index()).unwrap();
        let err = src.records(cols).next().unwrap().unwrap_err();
        assert!(matches!(err, DecodeError::InvalidValue { field: "price", row: 1, .. }));
    }

    #[test]
    fn test_trades_without_maker_column_default_false() {
        let src = source("timestamp,price,amount,id\n1709251200000000,61000,0.5,42\n");
        let cols = TradeColumns::resolve(src.index()).unwrap();
        let rows: Vec<TradeRecord> = src.records(cols).collect::<Result<_, _>>().unwrap();

        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_buyer_maker);
        assert_eq!(rows[0].trade_id, "42");
        assert_eq!(rows[0].quantity, 0.5);
    }

    #[test]
    fn test_trades_maker_fallback_column() {
        let src = source("timestamp,price,size,trade_id,maker\n1,1,1,a,True\n2,1,1,b,garbage\n");
        let cols = TradeColumns::resolve(src.index()).unwrap();
        let rows: Vec<TradeRecord> = src.records(cols).collect::<Result<_, _>>().unwrap();
        assert!(rows[0].is_buyer_maker);
        assert!(!rows[1].is_buyer_maker);
    }

    #[test]
    fn test_trades_require_price() {
        let src = source("timestamp,amount,id\n");
        let err = TradeColumns::resolve(src.index()).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("price")));
    }

    #[test]
    fn test_short_row_is_an_error() {
        let src = source("timestamp,price,amount,id\n1,2\n");
        let cols = TradeColumns::resolve(src.index()).unwrap();
        let err = src.records(cols).next().unwrap().unwrap_err();
        assert!(matches!(err, DecodeError::ShortRow { row: 1 }));
    }

    #[test]
    fn test_file_date() {
        assert_eq!(
            file_date("2024-03-01.csv.gz").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert!(matches!(file_date("latest.csv.gz"), Err(IngestError::FileDate(_))));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }
}
