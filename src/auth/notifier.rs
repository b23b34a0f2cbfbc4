//! Delivery of activation tokens to new users
//!
//! Outbound email is not part of this crate. Registration hands each
//! activation token to an [`ActivationNotifier`]; deployments plug in their
//! own delivery behind the trait.

use async_trait::async_trait;
use tracing::info;

use crate::error::AuthError;
use crate::models::{IssuedToken, User};

/// Sink for freshly issued activation tokens
#[async_trait]
pub trait ActivationNotifier: Send + Sync {
    /// Deliver `token` to `user`
    ///
    /// Called from a background task after registration has already been
    /// answered; failures are logged and otherwise ignored.
    async fn send_activation(&self, user: &User, token: &IssuedToken) -> Result<(), AuthError>;
}

/// Notifier that only records that a token was issued
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl ActivationNotifier for LogNotifier {
    async fn send_activation(&self, user: &User, token: &IssuedToken) -> Result<(), AuthError> {
        info!(
            user_id = user.id,
            expiry = %token.expiry,
            "Activation token issued, no delivery configured"
        );
        Ok(())
    }
}
