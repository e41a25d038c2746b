//! Structured logging for cachepulse.
//!
//! Uses `tracing` with configurable output formats:
//!
//! - **Pretty format**: human-friendly output for interactive use
//! - **JSON format**: machine-parseable JSON lines for ops pipelines
//!
//! The `RUST_LOG` environment variable overrides the configured level,
//! e.g. `RUST_LOG=cachepulse_core=debug`.

use std::sync::OnceLock;

use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Global flag to track if logging has been initialized.
static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Error type for logging initialization.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize the global logging subscriber.
///
/// Call once at startup; subsequent calls return
/// `Err(LogError::AlreadyInitialized)`.
pub fn init_logging(level: &str, format: LogFormat) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Pretty => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_span_events(FmtSpan::NONE),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .flatten_event(true),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let _ = LOGGING_INITIALIZED.set(true);

    tracing::info!(log_level = %level, log_format = ?format, "Logging initialized");
    Ok(())
}

/// Check if logging has been initialized.
pub fn is_logging_initialized() -> bool {
    LOGGING_INITIALIZED.get().is_some()
}
