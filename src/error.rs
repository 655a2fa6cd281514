//! Error taxonomy for the ingestion engine
//!
//! | Layer | Type | Policy |
//! |-------|------|--------|
//! | header / record | [`DecodeError`] | flush what was decoded, then surface |
//! | persistence | [`StoreError`] | roll back, keep the source file |
//! | file / job | [`IngestError`] | log and skip, except [`IngestError::Enumerate`] |
//! | startup | [`ConfigError`] | abort |

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("missing header {0}")]
    MissingField(&'static str),

    #[error("missing one of headers {0:?}")]
    MissingAnyField(&'static [&'static str]),

    #[error("row {row}: invalid {field} value {value:?}")]
    InvalidValue {
        row: u64,
        field: &'static str,
        value: String,
    },

    #[error("row {row}: too few columns")]
    ShortRow { row: u64 },

    #[error("CSV read error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Injected store failure: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// Root or exchange directory could not be listed. Fatal for the run.
    #[error("cannot enumerate {path}: {source}")]
    Enumerate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed file date in {0}")]
    FileDate(String),

    #[error("symbol {0} is not an eligible market")]
    Ineligible(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("decoder task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IngestError {
    /// Whether the error must end the whole run instead of just the file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Enumerate { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
