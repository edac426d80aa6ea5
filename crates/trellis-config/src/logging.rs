//! Tracing subscriber setup.
//!
//! Console output (human-readable or JSON) plus an optional daily-rotated
//! JSON file, each with its own `EnvFilter`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::{ConfigError, LoggingConfig, Result};

/// Prefix for rotated log files.
const LOG_FILE_PREFIX: &str = "trellis.log";

/// Install the global tracing subscriber.
///
/// Returns the file writer's guard when file logging is enabled; keep it
/// alive for as long as events should reach the file. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let console_filter = parse_filter(&config.filter)?;
    let console = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(console_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(console_filter)
            .boxed()
    };

    let (file, guard) = match config.file_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(parse_filter(&config.file_filter)?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(guard)
}

fn parse_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| ConfigError::Logging(format!("bad filter '{directives}': {e}")))
}
