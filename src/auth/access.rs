//! Access gates applied after authentication
//!
//! These run once an [`Identity`] is known and decide whether it may reach a
//! handler.

use crate::error::AuthError;
use crate::models::{Identity, User};

/// Require a resolved user
pub fn require_authenticated_user(identity: &Identity) -> Result<&User, AuthError> {
    match identity {
        Identity::Anonymous => Err(AuthError::AuthenticationRequired),
        Identity::Authenticated(user) => Ok(user),
    }
}

/// Require a resolved user whose account is activated
///
/// Anonymous callers get [`AuthError::AuthenticationRequired`] before the
/// activation check is considered.
pub fn require_activated_user(identity: &Identity) -> Result<&User, AuthError> {
    let user = require_authenticated_user(identity)?;
    if !user.activated {
        return Err(AuthError::InactiveAccount);
    }
    Ok(user)
}

/// Require that `user` owns the record identified by `owner_id`
pub fn require_owner(user: &User, owner_id: i64) -> Result<(), AuthError> {
    if user.id != owner_id {
        return Err(AuthError::NotPermitted);
    }
    Ok(())
}
