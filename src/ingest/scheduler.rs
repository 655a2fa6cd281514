//! Directory scanning
//!
//! Layout: `<root>/<exchange>/<symbol>/<datatype>/<YYYY-MM-DD>.csv.gz`.
//! One pass walks the tree, drops symbols that are not eligible markets,
//! filters out files whose date is already stored and enqueues one job per
//! (exchange, symbol, datatype) with pending files.

use super::worker::{Submission, WorkerPool};
use super::{Job, JobKey};
use crate::config::IngestConfig;
use crate::decoder::{ARCHIVE_SUFFIX, file_date};
use crate::error::{ConfigError, IngestError};
use crate::market::{DataType, Market};
use crate::store::MarketStore;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters for one scan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub queued: usize,
    /// Jobs skipped because the same key is still running
    pub busy: usize,
    pub files: usize,
    /// Files skipped because their date is already stored
    pub existing: usize,
    /// Ineligible symbol directories removed
    pub removed: usize,
}

pub struct Scheduler {
    root: PathBuf,
    config: Arc<IngestConfig>,
    store: Arc<dyn MarketStore>,
    datatype: Option<DataType>,
}

/// Directory entries as `(name, is_dir)`, sorted by name.
async fn list_dir(path: &Path) -> std::io::Result<Vec<(String, bool)>> {
    let mut entries = tokio::fs::read_dir(path).await?;
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        out.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
    }
    out.sort();
    Ok(out)
}

impl Scheduler {
    pub fn new(config: Arc<IngestConfig>, store: Arc<dyn MarketStore>) -> Result<Self, ConfigError> {
        Ok(Self {
            root: PathBuf::from(&config.root),
            datatype: config.datatype_filter()?,
            config,
            store,
        })
    }

    /// Scan repeatedly until a fatal error, or once in single-pass mode.
    pub async fn run(&self, pool: &WorkerPool) -> Result<(), IngestError> {
        loop {
            let report = self.pass(pool).await?;
            info!(
                queued = report.queued,
                busy = report.busy,
                in_flight = pool.in_flight(),
                files = report.files,
                existing = report.existing,
                removed = report.removed,
                "scan pass complete"
            );
            if self.config.once {
                return Ok(());
            }
            tokio::time::sleep(self.config.rescan_interval()).await;
        }
    }

    /// One walk over the tree. Only enumeration of the root or an exchange
    /// directory is fatal; everything below is logged and skipped.
    pub async fn pass(&self, pool: &WorkerPool) -> Result<PassReport, IngestError> {
        let mut report = PassReport::default();

        let exchanges = list_dir(&self.root).await.map_err(|source| IngestError::Enumerate {
            path: self.root.clone(),
            source,
        })?;

        for (exchange, is_dir) in exchanges {
            if !is_dir || !self.config.exchange_enabled(&exchange) {
                continue;
            }
            let exchange_dir = self.root.join(&exchange);
            let symbols = list_dir(&exchange_dir).await.map_err(|source| IngestError::Enumerate {
                path: exchange_dir.clone(),
                source,
            })?;

            for (symbol, is_dir) in symbols {
                if !is_dir {
                    continue;
                }
                let symbol_dir = exchange_dir.join(&symbol);
                let market = match Market::derive(&exchange, &symbol, &self.config.quote_assets) {
                    Ok(m) => m,
                    Err(_) => {
                        self.remove_ineligible(&symbol_dir, &mut report).await;
                        continue;
                    }
                };

                for datatype in DataType::ALL {
                    if self.datatype.is_some_and(|only| only != datatype) {
                        continue;
                    }
                    let key = JobKey {
                        exchange: exchange.clone(),
                        symbol: symbol.clone(),
                        datatype,
                    };
                    if pool.is_busy(&key) {
                        debug!(market = %market, datatype = %datatype, "job still running, skipping");
                        report.busy += 1;
                        continue;
                    }

                    let dir = symbol_dir.join(datatype.as_str());
                    let Some(files) = self.pending_files(&dir, &market, datatype, &mut report).await else {
                        continue;
                    };

                    let job = Job {
                        datatype,
                        exchange: exchange.clone(),
                        symbol: symbol.clone(),
                        market: market.clone(),
                        dir,
                        files,
                    };
                    let count = job.files.len();
                    match pool.submit(job).await {
                        Submission::Queued => {
                            report.queued += 1;
                            report.files += count;
                        }
                        Submission::Busy => report.busy += 1,
                        Submission::Closed => {
                            warn!(market = %market, "worker pool closed, job not queued");
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Archive files in `dir` whose date is not stored yet, oldest first.
    /// `None` when there is nothing to do.
    async fn pending_files(
        &self,
        dir: &Path,
        market: &Market,
        datatype: DataType,
        report: &mut PassReport,
    ) -> Option<Vec<String>> {
        let entries = match list_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot list datatype directory");
                return None;
            }
        };

        let mut pending = Vec::new();
        // entries are sorted, and `YYYY-MM-DD` sorts chronologically
        for (name, is_dir) in entries {
            if is_dir || !name.ends_with(ARCHIVE_SUFFIX) {
                continue;
            }
            let date = match file_date(&name) {
                Ok(d) => d,
                Err(e) => {
                    warn!(file = %name, error = %e, "skipping file");
                    continue;
                }
            };
            match self.store.exists(market, datatype, date).await {
                Ok(false) => pending.push(name),
                Ok(true) => {
                    debug!(market = %market, datatype = %datatype, date = %date, "already stored, skipping");
                    report.existing += 1;
                }
                Err(e) => {
                    warn!(market = %market, date = %date, error = %e, "existence check failed, skipping file");
                }
            }
        }

        (!pending.is_empty()).then_some(pending)
    }

    async fn remove_ineligible(&self, dir: &Path, report: &mut PassReport) {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {
                info!(dir = %dir.display(), "removed ineligible symbol directory");
                report.removed += 1;
            }
            Err(e) => warn!(dir = %dir.display(), error = %e, "failed to remove ineligible symbol"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Ingestor;
    use crate::store::MemoryStore;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn setup(root: &Path, once: bool) -> (Scheduler, WorkerPool) {
        let config = Arc::new(IngestConfig {
            root: root.to_string_lossy().into_owned(),
            once,
            ..IngestConfig::default()
        });
        let store: Arc<dyn MarketStore> = Arc::new(MemoryStore::new());
        let pool = WorkerPool::spawn(Arc::new(Ingestor::new(store.clone(), config.clone())), 1);
        (Scheduler::new(config, store).unwrap(), pool)
    }

    #[tokio::test]
    async fn test_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, pool) = setup(&dir.path().join("missing"), true);

        let err = scheduler.pass(&pool).await.unwrap_err();
        assert!(err.is_fatal());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_ineligible_symbol_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("binance/btceur/trades/2024-03-01.csv.gz"));
        fs::create_dir_all(root.join("binance/ethusdt")).unwrap();

        let (scheduler, pool) = setup(root, true);
        let report = scheduler.pass(&pool).await.unwrap();
        pool.shutdown().await;

        assert_eq!(report.removed, 1);
        assert_eq!(report.queued, 0);
        assert!(!root.join("binance/btceur").exists());
        assert!(root.join("binance/ethusdt").exists());
    }

    #[tokio::test]
    async fn test_non_archive_and_malformed_names_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let symbol = dir.path().join("deribit/btcusd");
        touch(&symbol.join("trades/notes.txt"));
        touch(&symbol.join("trades/latest.csv.gz"));
        touch(&symbol.join("trades/2024-03-02.csv.gz"));
        touch(&symbol.join("trades/2024-03-01.csv.gz"));

        let (scheduler, pool) = setup(dir.path(), true);
        let report = scheduler.pass(&pool).await.unwrap();
        pool.shutdown().await;

        assert_eq!(report.queued, 1);
        assert_eq!(report.files, 2);
        // malformed and foreign files stay untouched
        assert!(symbol.join("trades/notes.txt").exists());
        assert!(symbol.join("trades/latest.csv.gz").exists());
    }
}
