//! Database migrations for feel-flow
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Users table
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash TEXT NOT NULL CHECK (password_hash <> ''),
    activated INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 1
);

-- Tokens table: only hashes are stored, expiry is unix millis
CREATE TABLE IF NOT EXISTS tokens (
    hash TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    expiry INTEGER NOT NULL,
    scope TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tokens_hash_scope ON tokens(hash, scope);
CREATE INDEX IF NOT EXISTS idx_tokens_user_scope ON tokens(user_id, scope);
"#;
