use crate::buckets::DEFAULT_BUCKET_STEP;
use crate::depth::{DEFAULT_DEPTH_BAND, DEFAULT_MAX_LEVELS};
use crate::error::ConfigError;
use crate::logging::parse_rotation;
use crate::market::{DEFAULT_QUOTE_ASSETS, DataType, Market};
use crate::store::postgres::DEFAULT_INSERT_CHUNK;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

/// Upper bound for interval-like settings, one day.
const MAX_INTERVAL_SECS: i64 = 86_400;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Ingestion settings. Every field has a default, so the whole section may
/// be omitted.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Root of the `<exchange>/<symbol>/<datatype>/<date>.csv.gz` tree
    pub root: String,
    /// Source tag attached to every log line of a run
    pub consumer: String,
    /// Only ingest this datatype (`trades` / `incremental_book_L2`)
    pub datatype: Option<String>,
    pub once: bool,
    pub workers: usize,
    pub rescan_interval_secs: u64,
    /// Exchange allow-list; empty means every exchange directory
    pub exchanges: Vec<String>,
    pub quote_assets: Vec<String>,
    /// Fraction of mid price kept on each side of a snapshot
    pub depth_band: f64,
    pub max_levels: usize,
    /// Default bucket width in quote currency
    pub bucket_step: f64,
    /// Per-market bucket width override, keyed by `EXCHANGE:SYMBOL`
    pub bucket_steps: HashMap<String, f64>,
    pub emit_interval_ms: u64,
    /// Seed each L2 job from the latest stored snapshot
    pub seed_from_store: bool,
    pub seed_tolerance_secs: i64,
    pub insert_chunk: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root: "./data".to_string(),
            consumer: "default".to_string(),
            datatype: None,
            once: false,
            workers: 1,
            rescan_interval_secs: 60,
            exchanges: Vec::new(),
            quote_assets: DEFAULT_QUOTE_ASSETS.iter().map(|q| q.to_string()).collect(),
            depth_band: DEFAULT_DEPTH_BAND,
            max_levels: DEFAULT_MAX_LEVELS,
            bucket_step: DEFAULT_BUCKET_STEP,
            bucket_steps: HashMap::new(),
            emit_interval_ms: 500,
            seed_from_store: false,
            seed_tolerance_secs: 300,
            insert_chunk: DEFAULT_INSERT_CHUNK,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if !(self.depth_band > 0.0 && self.depth_band < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "depth_band must be in (0, 1), got {}",
                self.depth_band
            )));
        }
        if self.max_levels == 0 {
            return Err(ConfigError::Invalid("max_levels must be at least 1".to_string()));
        }
        let steps = std::iter::once(("default", self.bucket_step))
            .chain(self.bucket_steps.iter().map(|(k, v)| (k.as_str(), *v)));
        for (market, step) in steps {
            if !(step.is_finite() && step > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "bucket step for {} must be positive, got {}",
                    market, step
                )));
            }
        }
        if !(1..=MAX_INTERVAL_SECS as u64 * 1000).contains(&self.emit_interval_ms) {
            return Err(ConfigError::Invalid(format!(
                "emit_interval_ms must be in 1..={}, got {}",
                MAX_INTERVAL_SECS * 1000,
                self.emit_interval_ms
            )));
        }
        if !(0..=MAX_INTERVAL_SECS).contains(&self.seed_tolerance_secs) {
            return Err(ConfigError::Invalid(format!(
                "seed_tolerance_secs must be in 0..={}, got {}",
                MAX_INTERVAL_SECS, self.seed_tolerance_secs
            )));
        }
        if self.quote_assets.is_empty() {
            return Err(ConfigError::Invalid("quote_assets must not be empty".to_string()));
        }
        self.datatype_filter()?;
        Ok(())
    }

    pub fn datatype_filter(&self) -> Result<Option<DataType>, ConfigError> {
        self.datatype
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|d| d.parse().map_err(ConfigError::Invalid))
            .transpose()
    }

    pub fn bucket_step_for(&self, market: &Market) -> f64 {
        self.bucket_steps
            .get(market.as_str())
            .copied()
            .unwrap_or(self.bucket_step)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs)
    }

    pub fn emit_interval(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.emit_interval_ms as i64)
    }

    pub fn seed_tolerance(&self) -> TimeDelta {
        TimeDelta::seconds(self.seed_tolerance_secs)
    }

    /// Whether an exchange directory passes the allow-list.
    pub fn exchange_enabled(&self, exchange: &str) -> bool {
        self.exchanges.is_empty() || self.exchanges.iter().any(|e| e.eq_ignore_ascii_case(exchange))
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        parse_rotation(&config.rotation)?;
        config.ingest.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
log_level: "info"
log_dir: "./logs"
log_file: "ingest.log"
use_json: false
rotation: "daily"
database:
  url: "postgres://localhost/marketdata"
"#;

    #[test]
    fn test_ingest_section_defaults() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();

        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.ingest.workers, 1);
        assert_eq!(config.ingest.rescan_interval(), Duration::from_secs(60));
        assert_eq!(config.ingest.emit_interval(), TimeDelta::milliseconds(500));
        assert_eq!(config.ingest.seed_tolerance(), TimeDelta::minutes(5));
        assert_eq!(config.ingest.max_levels, 2000);
        assert_eq!(config.ingest.depth_band, 0.05);
        assert!(!config.ingest.seed_from_store);
        assert!(config.ingest.exchange_enabled("anything"));
        assert_eq!(config.ingest.datatype_filter().unwrap(), None);
    }

    #[test]
    fn test_ingest_overrides() {
        let yaml = format!(
            "{}{}",
            MINIMAL,
            r#"ingest:
  root: "/mnt/tardis"
  datatype: "trades"
  workers: 4
  exchanges: ["binance"]
  bucket_step: 0.5
  bucket_steps:
    "BINANCE:BTCUSDT": 10.0
  seed_from_store: true
"#
        );
        let config = AppConfig::from_yaml(&yaml).unwrap();
        let ingest = &config.ingest;

        assert_eq!(ingest.root, "/mnt/tardis");
        assert_eq!(ingest.workers, 4);
        assert_eq!(ingest.datatype_filter().unwrap(), Some(DataType::Trades));
        assert!(ingest.exchange_enabled("Binance"));
        assert!(!ingest.exchange_enabled("bybit"));
        assert!(ingest.seed_from_store);

        let quotes = ingest.quote_assets.clone();
        let btc = Market::derive("binance", "btcusdt", &quotes).unwrap();
        let eth = Market::derive("binance", "ethusdt", &quotes).unwrap();
        assert_eq!(ingest.bucket_step_for(&btc), 10.0);
        assert_eq!(ingest.bucket_step_for(&eth), 0.5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let zero_workers = format!("{}ingest:\n  workers: 0\n", MINIMAL);
        assert!(matches!(
            AppConfig::from_yaml(&zero_workers),
            Err(ConfigError::Invalid(_))
        ));

        let bad_datatype = format!("{}ingest:\n  datatype: \"quotes\"\n", MINIMAL);
        assert!(matches!(
            AppConfig::from_yaml(&bad_datatype),
            Err(ConfigError::Invalid(_))
        ));

        let bad_step = format!("{}ingest:\n  bucket_step: 0\n", MINIMAL);
        assert!(AppConfig::from_yaml(&bad_step).is_err());
    }

    #[test]
    fn test_interval_ranges() {
        let reject = |field: &str, value: &str| {
            let yaml = format!("{}ingest:\n  {}: {}\n", MINIMAL, field, value);
            matches!(AppConfig::from_yaml(&yaml), Err(ConfigError::Invalid(_)))
        };

        assert!(reject("emit_interval_ms", "0"));
        assert!(reject("emit_interval_ms", "18446744073709551615"));
        assert!(reject("seed_tolerance_secs", "-1"));
        assert!(reject("seed_tolerance_secs", "9223372036854775807"));

        assert!(!reject("emit_interval_ms", "86400000"));
        assert!(!reject("seed_tolerance_secs", "0"));
        assert!(!reject("seed_tolerance_secs", "86400"));
    }
}
