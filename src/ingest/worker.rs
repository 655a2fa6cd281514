//! Job execution
//!
//! [`Ingestor`] runs one job: its files in order, one book per L2 job.
//! [`WorkerPool`] runs N ingestors' worth of jobs concurrently off a
//! bounded queue; a full queue blocks the scheduler.

use super::l2::{L2Settings, process_l2_file};
use super::trades::process_trades_file;
use super::{FileReport, Job, JobKey};
use crate::config::IngestConfig;
use crate::decoder::file_date;
use crate::error::IngestError;
use crate::market::DataType;
use crate::recovery::{SeedOutcome, SyncedBook};
use crate::store::{FileMark, MarketStore, day_bounds};
use dashmap::DashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

/// Totals for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Files committed and deleted
    pub processed: usize,
    /// Files that failed and were left in place
    pub failed: usize,
    pub rows: usize,
    pub inserted: u64,
}

pub struct Ingestor {
    store: Arc<dyn MarketStore>,
    config: Arc<IngestConfig>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn MarketStore>, config: Arc<IngestConfig>) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Process every file of `job` in order.
    ///
    /// A failing file is logged and kept on disk; the job moves on to the
    /// next file. Only committed files are deleted.
    pub async fn run_job(&self, job: &Job) -> JobReport {
        let mut report = JobReport::default();
        let settings = L2Settings::for_market(&self.config, &job.market);

        // L2 state lives for exactly one job
        let mut book = SyncedBook::new();
        if job.datatype == DataType::IncrementalBookL2 && self.config.seed_from_store {
            self.seed_book(job, &mut book, settings.bucket_step).await;
        }

        for file in &job.files {
            let path = job.path_of(file);
            match self.process_file(job, file, &mut book, settings).await {
                Ok(FileReport { rows, inserted, .. }) => {
                    report.processed += 1;
                    report.rows += rows;
                    report.inserted += inserted;
                    info!(file = %file, rows, inserted, "file committed");
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!(file = %path.display(), error = %e, "failed to delete committed file");
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!(file = %path.display(), error = %e, "file failed, keeping it for retry");
                }
            }
        }

        report
    }

    async fn process_file(
        &self,
        job: &Job,
        file: &str,
        book: &mut SyncedBook,
        settings: L2Settings,
    ) -> Result<FileReport, IngestError> {
        let path = job.path_of(file);
        let mark = FileMark {
            market: job.market.clone(),
            datatype: job.datatype,
            date: file_date(file)?,
        };
        match job.datatype {
            DataType::Trades => process_trades_file(self.store.as_ref(), &path, &mark).await,
            DataType::IncrementalBookL2 => {
                process_l2_file(self.store.as_ref(), &path, &mark, book, settings).await
            }
        }
    }

    /// Restore the latest stored snapshot taken shortly before the job's
    /// first file date. Failures leave the book waiting for an in-stream
    /// snapshot.
    async fn seed_book(&self, job: &Job, book: &mut SyncedBook, step: f64) {
        let Some(first) = job.files.first() else {
            return;
        };
        let Ok(date) = file_date(first) else {
            return;
        };
        let (as_of, _) = day_bounds(date);

        match self.store.fetch_snapshot(&job.market, as_of, step).await {
            Ok(Some(snapshot)) => {
                let outcome = book.seed(&snapshot, as_of, self.config.seed_tolerance());
                if outcome == SeedOutcome::Seeded {
                    info!(snapshot_time = %snapshot.time, "seeded book from store");
                } else {
                    debug!(?outcome, "stored snapshot not usable");
                }
            }
            Ok(None) => debug!(as_of = %as_of, "no stored snapshot"),
            Err(e) => warn!(error = %e, "snapshot lookup failed"),
        }
    }
}

/// Result of handing a job to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// A job with the same key is queued or running
    Busy,
    /// All workers are gone
    Closed,
}

pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    in_flight: Arc<DashSet<JobKey>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` tasks sharing one queue of capacity `workers`.
    pub fn spawn(ingestor: Arc<Ingestor>, workers: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel(workers);
        let receiver = Arc::new(Mutex::new(receiver));
        let in_flight = Arc::new(DashSet::new());
        let consumer = ingestor.config().consumer.clone();

        let handles = (0..workers)
            .map(|id| {
                let span = info_span!("worker", id, consumer = %consumer);
                tokio::spawn(
                    worker_loop(id, ingestor.clone(), receiver.clone(), in_flight.clone()).instrument(span),
                )
            })
            .collect();

        info!(workers, "worker pool started");
        Self {
            sender,
            in_flight,
            handles,
        }
    }

    pub fn is_busy(&self, key: &JobKey) -> bool {
        self.in_flight.contains(key)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Enqueue `job`, waiting while the queue is full.
    pub async fn submit(&self, job: Job) -> Submission {
        let key = job.key();
        if !self.in_flight.insert(key.clone()) {
            return Submission::Busy;
        }
        if self.sender.send(job).await.is_err() {
            self.in_flight.remove(&key);
            return Submission::Closed;
        }
        Submission::Queued
    }

    /// Stop accepting jobs and wait for queued and running ones to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
            }
        }
        info!("worker pool stopped");
    }
}

/// Span wrapping one job. Carries the worker identity so single-span log
/// formats still say which consumer and worker did the work.
pub(crate) fn job_span(job: &Job, consumer: &str, worker: usize) -> Span {
    info_span!(
        "job",
        consumer = %consumer,
        worker,
        market = %job.market,
        datatype = %job.datatype,
        files = job.files.len()
    )
}

async fn worker_loop(
    id: usize,
    ingestor: Arc<Ingestor>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    in_flight: Arc<DashSet<JobKey>>,
) {
    loop {
        // only idle workers wait on the lock
        let job = { receiver.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        let span = job_span(&job, &ingestor.config().consumer, id);
        let report = ingestor.run_job(&job).instrument(span).await;
        in_flight.remove(&job.key());

        info!(
            market = %job.market,
            datatype = %job.datatype,
            processed = report.processed,
            failed = report.failed,
            rows = report.rows,
            inserted = report.inserted,
            "job finished"
        );
    }
    debug!("worker exiting");
}
