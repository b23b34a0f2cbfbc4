//! HTTP server components for feel-flow
//!
//! This module provides the HTTP server infrastructure including:
//! - Router configuration and route handlers
//! - Rate limiting, authentication and logging middleware
//! - Server lifecycle management

pub mod middleware;
pub mod router;

pub use middleware::ApiError;
pub use router::{build_router, AppState, HealthResponse};

use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;

use axum::{
    http::{header, HeaderValue, Method},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{CorsConfig, ServerConfig};
use crate::database::Database;

/// HTTP Server for feel-flow
///
/// Manages the axum server lifecycle, including:
/// - Binding to configured address
/// - Applying middleware layers
/// - Graceful shutdown handling
pub struct Server<D: Database + 'static> {
    config: ServerConfig,
    cors: CorsConfig,
    state: AppState<D>,
}

impl<D: Database + 'static> Server<D> {
    /// Create a new server instance
    pub fn new(config: ServerConfig, state: AppState<D>) -> Self {
        Self {
            config,
            cors: CorsConfig::default(),
            state,
        }
    }

    /// Allow cross-origin requests from the configured trusted origins
    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.cors = cors;
        self
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.config.host.parse().unwrap_or([0, 0, 0, 0].into()),
            self.config.port,
        )
    }

    /// Build the full application with every middleware layer applied
    ///
    /// From the outside in: panic recovery, CORS, request tracing, rate
    /// limiting, authentication, routes.
    pub fn app(&self) -> Result<Router, ServerError> {
        let app = build_router(self.state.clone())
            .layer(axum::middleware::from_fn(middleware::logging_middleware))
            .layer(TraceLayer::new_for_http());

        let app = match cors_layer(&self.cors)? {
            Some(cors) => app.layer(cors),
            None => app,
        };

        Ok(app.layer(CatchPanicLayer::custom(handle_panic)))
    }

    /// Run the server until shutdown signal is received
    ///
    /// # Arguments
    ///
    /// * `shutdown` - Future that resolves when the server should shut down
    ///
    /// # Returns
    ///
    /// Ok(()) if server shuts down gracefully, Err if there was an error
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.bind_addr();
        let app = self.app()?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        tracing::info!(address = %addr, environment = %self.config.env, "Server listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// CORS policy for the trusted origins, or `None` when there are none
pub fn cors_layer(config: &CorsConfig) -> Result<Option<CorsLayer>, ServerError> {
    if config.trusted_origins.is_empty() {
        return Ok(None);
    }

    let origins = config
        .trusted_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| ServerError::Config(format!("invalid trusted origin: {}", origin)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::OPTIONS, Method::PUT, Method::PATCH, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
    ))
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    tracing::error!(panic = %detail, "Handler panicked");
    let mut response = ApiError::server_error().into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind to address: {0}")]
    Bind(String),

    /// Failed to serve requests
    #[error("Server error: {0}")]
    Serve(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
