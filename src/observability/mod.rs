//! Structured logging setup.
//!
//! Every component logs through `tracing` with key/value fields; this module
//! only installs the subscriber.
//!
//! # Environment Configuration
//!
//! ```bash
//! # Component-specific levels
//! RUST_LOG=starkex_sync=debug,sqlx=warn starkex-sync run
//!
//! # JSON output for log aggregation
//! LOG_JSON=true starkex-sync run
//!
//! # Additional JSON log file with daily rotation
//! LOG_FILE=./logs/sync.log starkex-sync run
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor an explicit level is given.
pub const DEFAULT_FILTER: &str = "starkex_sync=info,warn";

/// Picks the filter directive: `RUST_LOG`, then `log_level`, then
/// [`DEFAULT_FILTER`].
#[must_use]
pub fn filter_directive(rust_log: Option<String>, log_level: Option<String>) -> String {
    rust_log
        .filter(|value| !value.is_empty())
        .or(log_level)
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Initialize the tracing subscriber.
///
/// * `log_level` - Level override used when `RUST_LOG` is unset.
/// * `log_file` - Optional path for an additional JSON log, rotated daily.
/// * `json_output` - JSON console output instead of the pretty format.
///
/// The returned guard flushes the file writer and must be held for the
/// lifetime of the process.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a subscriber
/// is already installed.
pub fn init_tracing(
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    json_output: bool,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_new(filter_directive(std::env::var("RUST_LOG").ok(), log_level))?;

    let console_layer = if json_output {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().pretty().with_target(true).with_thread_names(true).boxed()
    };

    let (file_layer, guard) = match log_file.as_deref() {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(directory)?;
            let file_appender = tracing_appender::rolling::daily(
                directory,
                path.file_name().unwrap_or_else(|| OsStr::new("starkex-sync.log")),
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(json_output, file_logging = log_file.is_some(), "Tracing initialized");
    Ok(guard)
}

/// Test subscriber writing through the test harness.
///
/// Output is visible with `cargo test -- --nocapture`.
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
