//! l2_ingest - archive ingestion daemon
//!
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌────────────┐    ┌──────────┐
//! │  Config  │───▶│ Scheduler │───▶│ WorkerPool │───▶│ Postgres │
//! │  (YAML)  │    │ (fs scan) │    │ (N tasks)  │    │ (merge)  │
//! └──────────┘    └───────────┘    └────────────┘    └──────────┘
//! ```

use anyhow::Context;
use clap::Parser;
use l2_ingest::config::AppConfig;
use l2_ingest::db::Database;
use l2_ingest::ingest::{Ingestor, Scheduler, WorkerPool};
use l2_ingest::store::{MarketStore, PgMarketStore};
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span};

#[derive(Debug, Parser)]
#[command(name = "l2_ingest", version, about = "Ingest L2 book and trade archives into PostgreSQL")]
struct Args {
    /// Config profile, loaded from config/<env>.yaml
    #[arg(short, long, default_value = "dev")]
    env: String,

    /// Archive root directory
    #[arg(long)]
    root: Option<String>,

    /// Source tag attached to log lines
    #[arg(long)]
    consumer: Option<String>,

    /// Only ingest one datatype (trades | incremental_book_L2)
    #[arg(long)]
    datatype: Option<String>,

    /// Single pass, then exit
    #[arg(long)]
    once: bool,

    /// Number of concurrent jobs
    #[arg(long)]
    workers: Option<usize>,
}

impl Args {
    fn apply(self, config: &mut AppConfig) {
        let ingest = &mut config.ingest;
        if let Some(root) = self.root {
            ingest.root = root;
        }
        if let Some(consumer) = self.consumer {
            ingest.consumer = consumer;
        }
        if self.datatype.is_some() {
            ingest.datatype = self.datatype;
        }
        if let Some(workers) = self.workers {
            ingest.workers = workers;
        }
        ingest.once |= self.once;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let env = args.env.clone();

    let mut app_config = AppConfig::load(&env).with_context(|| format!("loading {} config", env))?;
    args.apply(&mut app_config);
    app_config.ingest.validate()?;

    let _log_guard = l2_ingest::logging::init_logging(&app_config)?;

    let ingest = Arc::new(app_config.ingest.clone());
    let span = info_span!("ingest", consumer = %ingest.consumer);

    async move {
        info!(
            env = %env,
            version = env!("CARGO_PKG_VERSION"),
            root = %ingest.root,
            workers = ingest.workers,
            once = ingest.once,
            "starting"
        );

        let db = Database::connect(&app_config.database)
            .await
            .context("connecting to database")?;
        db.health_check().await.context("database health check")?;
        db.ensure_schema().await.context("creating tables")?;

        let store: Arc<dyn MarketStore> =
            Arc::new(PgMarketStore::new(db.pool().clone(), ingest.insert_chunk));
        let ingestor = Arc::new(Ingestor::new(store.clone(), ingest.clone()));
        let pool = WorkerPool::spawn(ingestor, ingest.workers);
        let scheduler = Scheduler::new(ingest.clone(), store)?;

        let result = tokio::select! {
            r = scheduler.run(&pool) => r,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, finishing running jobs");
                Ok(())
            }
        };

        pool.shutdown().await;

        if let Err(e) = result {
            error!(error = %e, "ingestion stopped");
            return Err(e.into());
        }
        info!("done");
        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await
}
