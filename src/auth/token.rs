//! Token generation and hashing
//!
//! Tokens are 16 random bytes from the OS CSPRNG encoded as unpadded
//! RFC 4648 base-32, which always yields 26 uppercase characters. Storage only
//! ever sees the hex-encoded SHA-256 of a token.

use data_encoding::BASE32_NOPAD;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Length of the random part of the token in bytes
const TOKEN_RANDOM_BYTES: usize = 16;

/// Length of an encoded token in characters
pub const TOKEN_LENGTH: usize = 26;

/// Generate a new opaque token
///
/// The plaintext should be handed to the user exactly once.
///
/// # Example
///
/// ```
/// use feel_flow::auth::token::{generate_token, is_valid_token_format};
///
/// let token = generate_token();
/// assert_eq!(token.len(), 26);
/// assert!(is_valid_token_format(&token));
/// ```
pub fn generate_token() -> String {
    let mut random_bytes = [0u8; TOKEN_RANDOM_BYTES];
    OsRng.fill_bytes(&mut random_bytes);
    BASE32_NOPAD.encode(&random_bytes)
}

/// Hash a token for storage and lookup
///
/// Unsalted and deterministic: lookup is an equality match on this value.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Check if a token has the correct format
///
/// Valid tokens are exactly 26 characters of the base-32 alphabet.
pub fn is_valid_token_format(token: &str) -> bool {
    token.len() == TOKEN_LENGTH
        && token
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
}
