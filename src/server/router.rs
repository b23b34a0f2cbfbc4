//! HTTP router for feel-flow
//!
//! This module defines the axum router that handles all HTTP requests.
//! It provides routes for:
//! - Health check
//! - Registration and activation
//! - Authentication token issuance
//! - Self-service profile updates

use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    http::{Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, patch, post, put, MethodRouter},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::auth::{require_activated_user, AuthManager, RateLimiter};
use crate::database::Database;
use crate::models::{Identity, RegisterUser, UpdateUser};

use super::middleware::{authenticate_middleware, rate_limit_middleware, ApiError};

/// Shared application state
pub struct AppState<D: Database> {
    /// Authentication manager
    pub auth_manager: Arc<AuthManager<D>>,

    /// Per-client rate limiter
    pub rate_limiter: Arc<RateLimiter>,

    /// Deployment environment reported by the health check
    pub environment: String,
}

impl<D: Database> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            auth_manager: Arc::clone(&self.auth_manager),
            rate_limiter: Arc::clone(&self.rate_limiter),
            environment: self.environment.clone(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub system_info: SystemInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemInfo {
    pub environment: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct ActivateInput {
    #[serde(default)]
    token: String,
}

#[derive(Debug, Deserialize)]
struct LoginInput {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

/// Build the main application router
///
/// Rate limiting runs before authentication, so rejected clients never
/// reach storage.
pub fn build_router<D: Database + 'static>(state: AppState<D>) -> Router {
    Router::new()
        .route("/v1/healthcheck", route(get(healthcheck_handler::<D>)))
        .route("/v1/users", route(post(register_user_handler::<D>)))
        .route(
            "/v1/users/activated",
            route(put(activate_user_handler::<D>)),
        )
        .route("/v1/users/:id", route(patch(update_user_handler::<D>)))
        .route(
            "/v1/tokens/authentication",
            route(post(create_authentication_token_handler::<D>)),
        )
        .fallback(not_found_handler)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.auth_manager),
            authenticate_middleware::<D>,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.rate_limiter),
            rate_limit_middleware,
        ))
        .with_state(state)
}

fn route<S: Clone + Send + Sync + 'static>(method_router: MethodRouter<S>) -> MethodRouter<S> {
    method_router.fallback(method_not_allowed_handler)
}

async fn not_found_handler() -> ApiError {
    ApiError::not_found()
}

async fn method_not_allowed_handler(method: Method) -> ApiError {
    ApiError::method_not_allowed(&method)
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

// =============================================================================
// Handlers
// =============================================================================

async fn healthcheck_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    Json(HealthResponse {
        status: "available".to_string(),
        system_info: SystemInfo {
            environment: state.environment.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    })
}

/// Register a new account; the activation token goes to the notifier
async fn register_user_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    body: Result<Json<RegisterUser>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let input = json_body(body)?;
    let registration = state.auth_manager.register(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": registration.user })),
    ))
}

async fn activate_user_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    body: Result<Json<ActivateInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let input = json_body(body)?;
    let user = state.auth_manager.activate(&input.token).await?;

    Ok(Json(json!({ "user": user })))
}

async fn create_authentication_token_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    body: Result<Json<LoginInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let input = json_body(body)?;
    let token = state
        .auth_manager
        .login(&input.email, &input.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "authentication_token": token })),
    ))
}

/// Update the caller's own profile
///
/// The caller must be activated and must own the target record. Gates run
/// before the body is looked at.
async fn update_user_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Extension(identity): Extension<Identity>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<UpdateUser>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = require_activated_user(&identity)?;
    let Path(id) = id.map_err(|_| ApiError::not_found())?;
    if id < 1 {
        return Err(ApiError::not_found());
    }
    let input = json_body(body)?;

    let user = state.auth_manager.update_profile(caller, id, input).await?;

    Ok(Json(json!({ "user": user })))
}
