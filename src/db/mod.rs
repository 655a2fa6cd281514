//! PostgreSQL pool and schema bootstrap

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::time::Duration;

/// Tables and uniqueness constraints the store's conflict suppression and
/// completion marks rely on. Idempotent.
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS trades (
        timestamp      TIMESTAMPTZ NOT NULL,
        market         TEXT        NOT NULL,
        price          DOUBLE PRECISION NOT NULL,
        quantity       DOUBLE PRECISION NOT NULL,
        is_buyer_maker BOOLEAN     NOT NULL DEFAULT FALSE,
        trade_id       TEXT        NOT NULL,
        UNIQUE (market, trade_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS trades_market_ts_idx ON trades (market, timestamp)",
    r#"CREATE TABLE IF NOT EXISTS orderbook_buckets (
        time      TIMESTAMPTZ NOT NULL,
        market    TEXT        NOT NULL,
        mid_price DOUBLE PRECISION NOT NULL,
        side      TEXT        NOT NULL,
        bucket    BIGINT      NOT NULL,
        size      DOUBLE PRECISION NOT NULL,
        UNIQUE (market, time, side, bucket)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS ingested_files (
        market       TEXT NOT NULL,
        datatype     TEXT NOT NULL,
        date         DATE NOT NULL,
        completed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (market, datatype, date)
    )"#,
];

pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await?;

        tracing::info!(max_connections = config.max_connections, "PostgreSQL pool ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create the trade and bucket tables when missing.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        tracing::debug!(statements = SCHEMA.len(), "schema verified");
        Ok(())
    }
}

/// Column access that logs and yields `None` instead of failing the query.
pub trait SafeRow {
    fn try_get_log<'r, T>(&'r self, column: &str) -> Option<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>;
}

impl SafeRow for PgRow {
    fn try_get_log<'r, T>(&'r self, column: &str) -> Option<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        use sqlx::Row;
        self.try_get(column)
            .map_err(|e| tracing::error!(column, error = %e, "unreadable column"))
            .ok()
    }
}
