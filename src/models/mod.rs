//! Domain models for feel-flow
//!
//! This module contains the account and token models shared by storage,
//! the authentication core and the HTTP layer.

pub mod token;
pub mod user;

// Re-export commonly used types
pub use token::{IssuedToken, Token, TokenScope};
pub use user::{Credential, Identity, NewUser, RegisterUser, UpdateUser, User};
