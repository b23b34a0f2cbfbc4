//! Logging setup for feel-flow
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` takes precedence over
//! the configured level when set.

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Telemetry error types
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to install the subscriber
    #[error("Failed to initialize tracing: {0}")]
    Init(String),

    /// Unsupported log format
    #[error("Unsupported log format: {0}")]
    Format(String),
}

/// Map a configured level name to a tracing level
///
/// Unknown names fall back to `info`.
pub fn parse_level(log_level: &str) -> Level {
    match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize the global tracing subscriber
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let level = parse_level(&config.level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    match config.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| TelemetryError::Init(e.to_string())),
        "pretty" => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| TelemetryError::Init(e.to_string())),
        other => Err(TelemetryError::Format(other.to_string())),
    }
}
