//! HTTP middleware for feel-flow
//!
//! This module provides middleware layers for:
//! - Per-client rate limiting
//! - Bearer token authentication
//! - Request/response logging
//!
//! It also owns [`ApiError`], the JSON error envelope every handler and
//! middleware answers with.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::{AuthManager, RateLimiter};
use crate::database::Database;
use crate::error::AuthError;

const SERVER_ERROR_MESSAGE: &str =
    "the server encountered a problem and could not process your request";

/// Error response rendered as `{"error": ...}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: Value,
    challenge: bool,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<Value>) -> Self {
        Self {
            status,
            message: message.into(),
            challenge: false,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn not_found() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "the requested resource could not be found",
        )
    }

    pub fn method_not_allowed(method: &Method) -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("the {} method is not supported for this resource", method),
        )
    }

    pub fn server_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_MESSAGE)
    }

    pub fn unavailable() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, SERVER_ERROR_MESSAGE)
    }

    fn invalid_token() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: Value::from("invalid or missing authentication token"),
            challenge: true,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidToken | AuthError::MalformedAuthorization => Self::invalid_token(),
            AuthError::InvalidCredentials => Self::new(
                StatusCode::UNAUTHORIZED,
                "invalid authentication credentials",
            ),
            AuthError::AuthenticationRequired => Self::new(
                StatusCode::UNAUTHORIZED,
                "you must be authenticated to access this resource",
            ),
            AuthError::InactiveAccount => Self::new(
                StatusCode::FORBIDDEN,
                "your user account must be activated to access this resource",
            ),
            AuthError::NotPermitted => Self::new(
                StatusCode::FORBIDDEN,
                "you are not permitted to perform this action",
            ),
            AuthError::EditConflict => Self::new(
                StatusCode::CONFLICT,
                "unable to update the record due to an edit conflict, please try again",
            ),
            AuthError::DuplicateEmail => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "email": "a user with this email address already exists" }),
            ),
            AuthError::RateLimited => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
            }
            AuthError::Validation(errors) => match serde_json::to_value(&errors) {
                Ok(body) => Self::new(StatusCode::UNPROCESSABLE_ENTITY, body),
                Err(_) => Self::server_error(),
            },
            AuthError::Unavailable => {
                tracing::warn!(error = %error, "Request failed on unavailable storage");
                Self::unavailable()
            }
            AuthError::MalformedCredential | AuthError::Internal(_) => {
                tracing::error!(error = %error, "Request failed");
                Self::server_error()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(json!({ "error": self.message }))).into_response();
        if self.challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Rate limiting middleware function
///
/// Admits or rejects each request by the client's IP before any other work
/// is done for it.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !limiter.admit(addr.ip()) {
        tracing::warn!(client_ip = %addr.ip(), path = %request.uri().path(), "Rate limit exceeded");
        return Err(AuthError::RateLimited.into());
    }

    Ok(next.run(request).await)
}

/// Authentication middleware function
///
/// This middleware:
/// 1. Extracts the Authorization header
/// 2. Resolves a bearer token to its user, or marks the caller anonymous
/// 3. Adds the resulting [`Identity`](crate::models::Identity) to the request
///    extensions
///
/// Route gates are applied later by the handlers themselves.
pub async fn authenticate_middleware<D: Database + 'static>(
    State(auth_manager): State<Arc<AuthManager<D>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|value| value.to_str().map(str::to_string));

    let identity = match auth_header {
        Some(Ok(header)) => auth_manager.authenticate(Some(&header)).await,
        Some(Err(_)) => Err(AuthError::MalformedAuthorization),
        None => auth_manager.authenticate(None).await,
    };

    let mut response = match identity {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => ApiError::from(e).into_response(),
    };
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

/// Logging middleware function
///
/// Logs request and response details including:
/// - Method and path
/// - Status code
/// - Response time
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        path = %uri.path(),
        status = %status.as_u16(),
        duration_ms = %elapsed.as_millis(),
        "Request completed"
    );

    response
}
