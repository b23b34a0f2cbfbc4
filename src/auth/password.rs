//! Password hashing and verification
//!
//! Passwords are hashed with Argon2id using a fresh random salt and stored as
//! PHC strings, so the parameters travel with the hash.

use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;

use crate::error::CredentialError;

/// Hash a password using Argon2id
///
/// # Returns
///
/// The Argon2id hash string (PHC format)
///
/// # Errors
///
/// Returns [`CredentialError::HashFailed`] if hashing fails (should not
/// happen in normal operation)
///
/// # Example
///
/// ```
/// use feel_flow::auth::password::hash_password;
///
/// let hash = hash_password("pa55word!").unwrap();
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_password(plaintext: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CredentialError::HashFailed(e.to_string()))
}

/// Verify a password against a stored hash
///
/// Comparison is constant-time inside the argon2 verifier.
///
/// # Returns
///
/// `Ok(true)` on a match, `Ok(false)` on a mismatch
///
/// # Errors
///
/// A stored hash that does not parse, or any verifier failure other than a
/// mismatch, is [`CredentialError::Malformed`]. It is never reported as a
/// plain mismatch.
pub fn verify_password(hash: &str, plaintext: &str) -> Result<bool, CredentialError> {
    let parsed = PasswordHash::new(hash).map_err(|e| CredentialError::Malformed(e.to_string()))?;

    match Argon2::default().verify_password(plaintext.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CredentialError::Malformed(e.to_string())),
    }
}
