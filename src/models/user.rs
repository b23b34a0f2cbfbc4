//! User and identity models
//!
//! A [`User`] is the persisted account record. An [`Identity`] is what a
//! request is acting as: either anonymous or a resolved user.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::password::{hash_password, verify_password};
use crate::error::{CredentialError, IdentityError};

/// A user's password credential
///
/// The durable part is the PHC hash string. The plaintext is only present on
/// a credential that was just produced by [`Credential::set`], is never
/// persisted and is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    plaintext: Option<String>,
    hash: String,
}

impl Credential {
    /// Hash `plaintext` with a fresh salt
    pub fn set(plaintext: &str) -> Result<Self, CredentialError> {
        let hash = hash_password(plaintext)?;
        Ok(Self {
            plaintext: Some(plaintext.to_string()),
            hash,
        })
    }

    /// Rebuild a credential from a stored hash
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MissingCredentialHash`] for an empty hash.
    pub fn from_hash(hash: impl Into<String>) -> Result<Self, IdentityError> {
        let hash = hash.into();
        if hash.is_empty() {
            return Err(IdentityError::MissingCredentialHash);
        }
        Ok(Self {
            plaintext: None,
            hash,
        })
    }

    /// Check `plaintext` against the stored hash
    ///
    /// A stored hash that cannot be parsed is an error, not a mismatch.
    pub fn matches(&self, plaintext: &str) -> Result<bool, CredentialError> {
        verify_password(&self.hash, plaintext)
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Plaintext, only available right after [`Credential::set`]
    pub fn plaintext(&self) -> Option<&str> {
        self.plaintext.as_deref()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("plaintext", &self.plaintext.as_ref().map(|_| "<redacted>"))
            .field("hash", &"<redacted>")
            .finish()
    }
}

/// Persisted user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Storage-assigned id
    pub id: i64,

    pub created_at: DateTime<Utc>,

    pub name: String,

    /// Unique across all users
    pub email: String,

    #[serde(skip)]
    pub credential: Credential,

    pub activated: bool,

    /// Incremented by storage on every successful update
    pub version: i64,
}

/// A user that has not been stored yet
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub credential: Credential,
    pub activated: bool,
}

/// Registration input
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Partial profile update guarded by the version the caller last read
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub expected_version: i64,
}

/// Who a request is acting as
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Authenticated(User),
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    /// The resolved user, if any
    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Anonymous => None,
            Identity::Authenticated(user) => Some(user),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_user(id: i64, email: &str, activated: bool) -> User {
    User {
        id,
        created_at: Utc::now(),
        name: format!("user-{}", id),
        email: email.to_string(),
        credential: Credential::from_hash("$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaA")
            .unwrap(),
        activated,
        version: 1,
    }
}
