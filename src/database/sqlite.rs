//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::debug;

use super::migrations::CREATE_SCHEMA;
use super::Database;
use crate::error::DbError;
use crate::models::{Credential, NewUser, Token, TokenScope, User};

const USER_COLUMNS: &str =
    "users.id, users.created_at, users.name, users.email, users.password_hash, users.activated, users.version";

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // User operations
    // =========================================================================

    async fn insert_user(&self, user: &NewUser) -> Result<User, DbError> {
        let name = user.name.clone();
        let email = user.email.clone();
        let credential = user.credential.clone();
        let activated = user.activated;
        let created_at = Utc::now();

        let (id, version) = self
            .conn
            .call({
                let name = name.clone();
                let email = email.clone();
                let hash = credential.hash().to_string();
                move |conn| {
                    let row = conn.query_row(
                        r#"
                        INSERT INTO users (created_at, name, email, password_hash, activated)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        RETURNING id, version
                        "#,
                        rusqlite::params![created_at.to_rfc3339(), name, email, hash, activated],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                    )?;
                    Ok(row)
                }
            })
            .await?;

        debug!(user_id = id, "Inserted user");

        Ok(User {
            id,
            created_at,
            name,
            email,
            credential,
            activated,
            version,
        })
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let email = email.to_string();

        self.conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        &format!("SELECT {} FROM users WHERE users.email = ?1", USER_COLUMNS),
                        [&email],
                        row_to_user,
                    )
                    .optional()?;
                Ok(user)
            })
            .await
            .map_err(Into::into)
    }

    async fn update_user(&self, user: &User) -> Result<i64, DbError> {
        let id = user.id;
        let expected_version = user.version;
        let name = user.name.clone();
        let email = user.email.clone();
        let hash = user.credential.hash().to_string();
        let activated = user.activated;

        let new_version = self
            .conn
            .call(move |conn| {
                let version = conn
                    .query_row(
                        r#"
                        UPDATE users
                        SET name = ?1, email = ?2, password_hash = ?3, activated = ?4,
                            version = version + 1
                        WHERE id = ?5 AND version = ?6
                        RETURNING version
                        "#,
                        rusqlite::params![name, email, hash, activated, id, expected_version],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?;
                Ok(version)
            })
            .await?;

        new_version.ok_or(DbError::EditConflict)
    }

    // =========================================================================
    // Token operations
    // =========================================================================

    async fn insert_token(&self, token: &Token) -> Result<(), DbError> {
        let hash = token.hash.clone();
        let user_id = token.user_id;
        let expiry = token.expiry.timestamp_millis();
        let scope = token.scope.as_str();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO tokens (hash, user_id, expiry, scope) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![hash, user_id, expiry, scope],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn get_user_for_token(
        &self,
        hash: &str,
        scope: TokenScope,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, DbError> {
        let hash = hash.to_string();
        let scope = scope.as_str();
        let now = now.timestamp_millis();

        self.conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        &format!(
                            r#"
                            SELECT {}
                            FROM users
                            INNER JOIN tokens ON users.id = tokens.user_id
                            WHERE tokens.hash = ?1 AND tokens.scope = ?2 AND tokens.expiry > ?3
                            "#,
                            USER_COLUMNS
                        ),
                        rusqlite::params![hash, scope, now],
                        row_to_user,
                    )
                    .optional()?;
                Ok(user)
            })
            .await
            .map_err(Into::into)
    }

    async fn delete_tokens_for_user(
        &self,
        scope: TokenScope,
        user_id: i64,
    ) -> Result<u64, DbError> {
        let scope = scope.as_str();

        self.conn
            .call(move |conn| {
                let count = conn.execute(
                    "DELETE FROM tokens WHERE scope = ?1 AND user_id = ?2",
                    rusqlite::params![scope, user_id],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Into::into)
    }
}

// =========================================================================
// Helper functions
// =========================================================================

/// Map a row selected with `USER_COLUMNS` to a User
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let created_at: String = row.get(1)?;
    let hash: String = row.get(4)?;

    Ok(User {
        id: row.get(0)?,
        created_at: parse_datetime(&created_at)
            .ok_or_else(|| conversion_error(1, format!("bad timestamp: {}", created_at)))?,
        name: row.get(2)?,
        email: row.get(3)?,
        credential: Credential::from_hash(hash)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        activated: row.get(5)?,
        version: row.get(6)?,
    })
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

/// Parse datetime string from SQLite
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            // Try parsing SQLite's datetime format
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.and_utc())
        })
}
