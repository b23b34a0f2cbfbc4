//! Token-related domain models
//!
//! Only the hash of a token is ever stored. The plaintext exists once, inside
//! the [`IssuedToken`] returned to the caller that asked for it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a token may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenScope {
    /// Bearer token for API requests
    Authentication,
    /// One-shot token proving ownership of the email address
    Activation,
}

impl TokenScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Authentication => "authentication",
            TokenScope::Activation => "activation",
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authentication" => Ok(TokenScope::Authentication),
            "activation" => Ok(TokenScope::Activation),
            other => Err(format!("unknown token scope: {}", other)),
        }
    }
}

/// Token record as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Hex-encoded SHA-256 of the plaintext
    pub hash: String,

    /// Owning user
    pub user_id: i64,

    /// Absolute expiry; the token is usable strictly before this instant
    pub expiry: DateTime<Utc>,

    pub scope: TokenScope,
}

impl Token {
    /// Whether the token can still be presented at `now`
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expiry
    }
}

/// A freshly issued token, carrying its plaintext
#[derive(Clone, Serialize)]
pub struct IssuedToken {
    #[serde(rename = "token")]
    pub plaintext: String,

    pub expiry: DateTime<Utc>,

    #[serde(skip)]
    pub record: Token,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("plaintext", &"<redacted>")
            .field("expiry", &self.expiry)
            .field("record", &self.record)
            .finish()
    }
}
