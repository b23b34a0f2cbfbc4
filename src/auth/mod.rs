//! Authentication system for feel-flow
//!
//! This module provides authentication and authorization functionality:
//! - Password hashing and verification
//! - Scoped opaque token generation and resolution
//! - Per-client rate limiting with background eviction
//! - Access gates for authenticated and activated users

pub mod access;
pub mod manager;
pub mod notifier;
pub mod password;
pub mod ratelimit;
pub mod token;

pub use access::{require_activated_user, require_authenticated_user, require_owner};
pub use manager::{AuthConfig, AuthManager, Registration};
pub use notifier::{ActivationNotifier, LogNotifier};
pub use password::{hash_password, verify_password};
pub use ratelimit::{RateLimitConfig, RateLimiter, SweeperHandle};
pub use token::{generate_token, hash_token, is_valid_token_format, TOKEN_LENGTH};
