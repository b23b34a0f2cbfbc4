//! Application error types for feel-flow
//!
//! This module defines the error taxonomy of the authentication core.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

use crate::validator::ValidationErrors;

/// Authentication and access-control errors
///
/// Variants are coarse: a caller can tell which category an
/// outcome belongs to, never which individual check failed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// Unknown, expired, wrong-scope or syntactically invalid token
    #[error("Invalid token")]
    InvalidToken,

    /// Authorization header present but not of the form `Bearer <token>`
    #[error("Malformed authorization header")]
    MalformedAuthorization,

    /// Unknown email or wrong password at login
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Anonymous caller on a route that needs an identity
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Authenticated caller whose account is not activated
    #[error("Account not activated")]
    InactiveAccount,

    /// Authenticated caller acting on a record it does not own
    #[error("Not permitted")]
    NotPermitted,

    /// Version mismatch on a conditional update
    #[error("Edit conflict")]
    EditConflict,

    /// Email already used by another user
    #[error("Duplicate email")]
    DuplicateEmail,

    /// Storage deadline exceeded or connection failure
    #[error("Storage unavailable")]
    Unavailable,

    /// Stored credential hash is corrupted
    #[error("Malformed stored credential")]
    MalformedCredential,

    /// Request denied by the rate limiter
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Input failed validation
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Unclassified server fault
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection to the database worker failed or was closed
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Unique constraint violation
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Conditional update matched no row at the expected version
    #[error("Edit conflict")]
    EditConflict,

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<tokio_rusqlite::Error> for DbError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(code, message))
                if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                DbError::DuplicateKey(message.unwrap_or_else(|| code.to_string()))
            }
            tokio_rusqlite::Error::Rusqlite(e) => DbError::Sqlite(e),
            tokio_rusqlite::Error::ConnectionClosed => {
                DbError::Connection("connection closed".to_string())
            }
            other => DbError::Connection(other.to_string()),
        }
    }
}

/// Credential hashing errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CredentialError {
    /// Stored hash cannot be parsed or verified
    #[error("Malformed credential hash: {0}")]
    Malformed(String),

    /// Hashing failed
    #[error("Hash failed: {0}")]
    HashFailed(String),
}

/// Errors raised while constructing an identity
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IdentityError {
    /// A user cannot exist without a credential hash
    #[error("Missing credential hash")]
    MissingCredentialHash,
}

impl From<CredentialError> for AuthError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Malformed(_) => AuthError::MalformedCredential,
            CredentialError::HashFailed(msg) => AuthError::Internal(msg),
        }
    }
}

impl From<IdentityError> for AuthError {
    fn from(err: IdentityError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<DbError> for AuthError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Connection(_) => AuthError::Unavailable,
            DbError::EditConflict => AuthError::EditConflict,
            other => AuthError::Internal(other.to_string()),
        }
    }
}

/// Application-level error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for AuthError {
    fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Unavailable | AuthError::EditConflict)
    }
}

impl RetryableError for DbError {
    fn is_retryable(&self) -> bool {
        matches!(self, DbError::Connection(_) | DbError::EditConflict)
    }
}
