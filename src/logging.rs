//! Logging Module
//!
//! Initializes the tracing subscriber with a compact console layer and an
//! optional daily-rotated application log file.

use crate::config::LoggingConfig;
use crate::{ManagerError, Result};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize application logging.
///
/// Returns a guard that must be kept alive for the lifetime of the process
/// when file logging is enabled; dropping it flushes the non-blocking
/// writer.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    // Config log level is the default; RUST_LOG env var takes precedence
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
        .compact();

    let (file_layer, guard) = match &config.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir).map_err(|e| {
                ManagerError::IoError(format!(
                    "Failed to create log directory: path={:?}, error={}",
                    log_dir, e
                ))
            })?;

            let file_appender =
                RollingFileAppender::new(Rotation::DAILY, log_dir, "tiermover.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);

            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .compact();

            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // Don't fail if a subscriber is already set (happens under test harnesses)
    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    match result {
        Ok(()) => {
            if let Some(log_dir) = &config.log_dir {
                info!("Application logs will be written to: {:?}", log_dir);
            }
        }
        Err(_) => {
            debug!("Tracing subscriber already initialized, skipping");
        }
    }

    Ok(guard)
}
