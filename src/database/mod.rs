//! Database layer for feel-flow
//!
//! This module defines the database trait and SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{NewUser, Token, TokenScope, User};

/// Database trait for data persistence
///
/// This trait defines all database operations needed by the application.
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // User operations
    // =========================================================================

    /// Insert a new user
    ///
    /// Returns the stored user with its assigned id, creation time and
    /// initial version. A taken email is [`DbError::DuplicateKey`].
    async fn insert_user(&self, user: &NewUser) -> Result<User, DbError>;

    /// Get a user by email
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError>;

    /// Conditionally update a user
    ///
    /// The write only happens if the stored version still equals
    /// `user.version`; the stored version is then incremented and returned.
    /// A version mismatch or a missing row is [`DbError::EditConflict`].
    async fn update_user(&self, user: &User) -> Result<i64, DbError>;

    // =========================================================================
    // Token operations
    // =========================================================================

    /// Store a token record
    async fn insert_token(&self, token: &Token) -> Result<(), DbError>;

    /// Find the owner of a token with this hash and scope that is still
    /// usable at `now`
    async fn get_user_for_token(
        &self,
        hash: &str,
        scope: TokenScope,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, DbError>;

    /// Delete every token of `scope` belonging to `user_id`
    ///
    /// Returns the number of deleted records
    async fn delete_tokens_for_user(&self, scope: TokenScope, user_id: i64)
        -> Result<u64, DbError>;
}
