//! Logging system initialization
//!
//! Sets up tracing from the `[logging]` section: stdout, a plain file or a
//! daily rolling file, each behind a non-blocking writer.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;

use crate::config::LoggingConfig;
use crate::errors::{GeotrailError, Result};

const DEFAULT_LOG_NAME: &str = "geotrail.log";

fn build_writer(config: &LoggingConfig) -> Result<Box<dyn std::io::Write + Send + Sync>> {
    let Some(log_file) = config.file.as_deref().filter(|f| !f.is_empty()) else {
        return Ok(Box::new(std::io::stdout()));
    };

    if !config.enable_rotation {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|e| {
                GeotrailError::config(format!("Cannot open log file {}: {}", log_file, e))
            })?;
        return Ok(Box::new(file));
    }

    let path = Path::new(log_file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let filename = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(DEFAULT_LOG_NAME);

    let appender = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix(filename.trim_end_matches(".log"))
        .filename_suffix("log")
        .max_log_files(config.max_backups.max(1) as usize)
        .build(dir)
        .map_err(|e| GeotrailError::config(format!("Cannot create rolling log appender: {}", e)))?;
    Ok(Box::new(appender))
}

/// Initialize the global subscriber
///
/// The returned `WorkerGuard` must be held until exit so buffered lines are
/// flushed. Call once, after the configuration has been loaded.
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    let writer = build_writer(config)?;
    let to_console = config.file.as_deref().is_none_or(|f| f.is_empty());

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(writer);
    let filter = tracing_subscriber::EnvFilter::try_new(&config.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber_builder = tracing_subscriber::fmt()
        .with_writer(non_blocking_writer)
        .with_env_filter(filter)
        .with_level(true)
        .with_ansi(to_console);

    let installed = if config.format == "json" {
        subscriber_builder.json().try_init()
    } else {
        subscriber_builder.try_init()
    };
    installed.map_err(|e| GeotrailError::config(format!("Cannot install logger: {}", e)))?;

    Ok(guard)
}
