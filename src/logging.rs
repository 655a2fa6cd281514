//! Subscriber setup for the binary. Library code only emits `tracing`
//! events and spans; it never installs a subscriber itself.

use crate::config::AppConfig;
use crate::error::ConfigError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

pub fn parse_rotation(value: &str) -> Result<Rotation, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "minutely" => Ok(Rotation::MINUTELY),
        "hourly" => Ok(Rotation::HOURLY),
        "daily" => Ok(Rotation::DAILY),
        "never" | "" => Ok(Rotation::NEVER),
        other => Err(ConfigError::Invalid(format!("unknown log rotation {other:?}"))),
    }
}

/// JSON lines carrying the current span and the full span list, so the
/// worker span's `consumer` shows up next to the job's market.
fn json_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(writer)
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process; dropping it flushes the file writer.
pub fn init_logging(config: &AppConfig) -> Result<WorkerGuard, ConfigError> {
    let appender = RollingFileAppender::builder()
        .rotation(parse_rotation(&config.rotation)?)
        .filename_prefix(&config.log_file)
        .build(&config.log_dir)
        .map_err(|e| ConfigError::Invalid(format!("log appender: {e}")))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    // RUST_LOG wins over the configured level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        registry.with(json_layer(writer)).init();
    } else {
        let file_layer = fmt::layer().with_target(false).with_writer(writer).with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false);
        registry.with(file_layer).with(stdout_layer).init();
    }

    Ok(guard)
}
