//! feel-flow - Authentication and access-control core for a mood journal API
//!
//! This is the main entry point for the feel-flow application.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;

use feel_flow::auth::{AuthConfig, AuthManager, RateLimitConfig, RateLimiter};
use feel_flow::config::Config;
use feel_flow::database::SqliteDatabase;
use feel_flow::error::AppError;
use feel_flow::server::{AppState, Server};
use feel_flow::telemetry::init_tracing;

/// feel-flow - Authentication and access-control core for a mood journal API
#[derive(Parser, Debug)]
#[command(name = "feel-flow")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "FEEL_FLOW_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;

    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.server.env,
        "Starting feel-flow"
    );

    let database = Arc::new(
        SqliteDatabase::new(&config.database.path)
            .await
            .map_err(AppError::from)?,
    );
    info!(path = %config.database.path, "Database initialized");

    let auth_manager = Arc::new(AuthManager::new(
        Arc::clone(&database),
        AuthConfig::from(&config.auth),
    ));

    let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::from(&config.rate_limit)));
    let sweeper = rate_limiter.spawn_sweeper();
    info!(
        enabled = config.rate_limit.enabled,
        requests_per_second = config.rate_limit.requests_per_second,
        burst = config.rate_limit.burst,
        "Rate limiter initialized"
    );

    let state = AppState {
        auth_manager,
        rate_limiter,
        environment: config.server.env.clone(),
    };

    let server = Server::new(config.server.clone(), state).with_cors(config.cors.clone());
    let result = server.run(shutdown_signal()).await;

    // Stop the sweeper whether or not the server exited cleanly
    sweeper.shutdown().await;

    info!("feel-flow shutdown complete");

    result.map_err(Into::into)
}

/// Load and validate configuration from file or environment
fn load_config(args: &Args) -> Result<Config, AppError> {
    let config = match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path)
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env()
        }
    }
    .map_err(|e| AppError::Config(e.to_string()))?;

    config
        .validate()
        .map_err(|e| AppError::Config(e.to_string()))?;
    Ok(config)
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
