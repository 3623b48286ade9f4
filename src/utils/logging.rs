//! Logging initialization for Netherworld.
//!
//! Supports three formats:
//! - `pretty`: multi-line human-readable output
//! - `component`: compact single-line output with the event target, grep-friendly
//! - `json`: structured JSON lines for log aggregators

use std::fs::{File, OpenOptions};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Build the event filter: `RUST_LOG` when set, else `cfg.level`.
fn build_filter(cfg: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn open_log_file(path: &str) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Initialize the global tracing subscriber from config.
///
/// Call this once at startup before any tracing events are emitted. Later
/// calls are ignored. When the log file cannot be opened, logs go to stderr
/// and a warning says why.
pub fn init_logging(cfg: &LoggingConfig) {
    let filter = build_filter(cfg);

    let (file, file_error) = match cfg.file.as_deref().map(open_log_file) {
        Some(Ok(file)) => (Some(Mutex::new(file)), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match (cfg.format, file) {
        (LogFormat::Json, Some(file)) => builder.json().with_writer(file).try_init(),
        (LogFormat::Json, None) => builder.json().with_writer(std::io::stderr).try_init(),
        (LogFormat::Pretty, Some(file)) => builder.pretty().with_writer(file).try_init(),
        (LogFormat::Pretty, None) => builder.pretty().with_writer(std::io::stderr).try_init(),
        (LogFormat::Component, Some(file)) => builder
            .compact()
            .with_target(true)
            .with_ansi(false)
            .with_writer(file)
            .try_init(),
        (LogFormat::Component, None) => builder
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    if result.is_err() {
        return;
    }
    if let (Some(path), Some(e)) = (cfg.file.as_deref(), file_error) {
        tracing::warn!(path, error = %e, "Could not open log file; logging to stderr");
    }
}
