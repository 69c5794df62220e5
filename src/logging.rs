//! Logging initialization for brandscout.
//!
//! Session runs (`start`, `resume`): logs to `<session>/logs/brandscout-{datetime}.log`
//! Other commands: logs to stderr

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Result of logging initialization
pub struct LoggingHandle {
    /// Flushes buffered log lines when dropped; keep it alive until exit
    pub _guard: Option<WorkerGuard>,

    /// Set when logging to a session's logs folder
    pub log_file_path: Option<PathBuf>,
}

/// Log level, with `--debug` winning over the configured level
pub fn effective_level(config: &Config, debug_override: bool) -> String {
    if debug_override {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    }
}

/// `brandscout-20261017T101500Z.log`
pub fn log_file_name(now: DateTime<Utc>) -> String {
    format!("brandscout-{}.log", now.format("%Y%m%dT%H%M%SZ"))
}

/// Initialize the global subscriber.
///
/// With `logs_dir` set and `logging.to_file` enabled, output goes to a
/// timestamped file there; otherwise to stderr. `RUST_LOG` overrides the
/// level either way.
pub fn init_logging(
    config: &Config,
    logs_dir: Option<&Path>,
    debug_override: bool,
) -> Result<LoggingHandle> {
    let level = effective_level(config, debug_override);
    let filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or(level));

    match logs_dir {
        Some(logs_dir) if config.logging.to_file => {
            std::fs::create_dir_all(logs_dir)
                .with_context(|| format!("Failed to create {}", logs_dir.display()))?;

            let log_filename = log_file_name(Utc::now());
            let log_file_path = logs_dir.join(&log_filename);

            let file_appender = tracing_appender::rolling::never(logs_dir, &log_filename);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false) // No ANSI codes in log files
                        .with_writer(non_blocking),
                )
                .init();

            Ok(LoggingHandle {
                _guard: Some(guard),
                log_file_path: Some(log_file_path),
            })
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                )
                .init();

            Ok(LoggingHandle {
                _guard: None,
                log_file_path: None,
            })
        }
    }
}
