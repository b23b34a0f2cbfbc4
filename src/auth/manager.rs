//! Authentication manager
//!
//! This module provides the main authentication interface for the application.
//! It issues and resolves scoped tokens, classifies callers, applies
//! version-guarded identity updates and runs the account flows built on them.
//!
//! Every storage round-trip is bounded by the configured storage timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::database::Database;
use crate::error::{AuthError, DbError, RetryableError};
use crate::models::{
    Credential, Identity, IssuedToken, NewUser, RegisterUser, Token, TokenScope, UpdateUser, User,
};
use crate::validator::{
    validate_email, validate_name, validate_password_plaintext, ValidationErrors,
};

use super::access::require_owner;
use super::notifier::{ActivationNotifier, LogNotifier};
use super::token::{generate_token, hash_token, is_valid_token_format};

/// Configuration for the authentication manager
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Lifetime of bearer tokens issued at login
    pub authentication_ttl: chrono::Duration,

    /// Lifetime of activation tokens issued at registration
    pub activation_ttl: chrono::Duration,

    /// Deadline for a single storage round-trip
    pub storage_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authentication_ttl: chrono::Duration::hours(24),
            activation_ttl: chrono::Duration::hours(72),
            storage_timeout: Duration::from_secs(3),
        }
    }
}

impl AuthConfig {
    /// Token lifetime for `scope`
    pub fn ttl_for(&self, scope: TokenScope) -> chrono::Duration {
        match scope {
            TokenScope::Authentication => self.authentication_ttl,
            TokenScope::Activation => self.activation_ttl,
        }
    }
}

/// Outcome of a successful registration
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    pub activation_token: IssuedToken,
}

/// Authentication manager
///
/// Provides methods for authenticating requests and managing identities.
pub struct AuthManager<D: Database> {
    db: Arc<D>,
    config: AuthConfig,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn ActivationNotifier>,
}

impl<D: Database> AuthManager<D> {
    /// Create a new authentication manager
    pub fn new(db: Arc<D>, config: AuthConfig) -> Self {
        Self {
            db,
            config,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Replace the wall clock used for token expiry
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the activation token sink
    pub fn with_notifier(mut self, notifier: Arc<dyn ActivationNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    /// Issue a token for `user_id` with the configured lifetime of `scope`
    pub async fn issue_token(
        &self,
        user_id: i64,
        scope: TokenScope,
    ) -> Result<IssuedToken, AuthError> {
        self.issue_token_with_ttl(user_id, self.config.ttl_for(scope), scope)
            .await
    }

    /// Issue a token for `user_id` that expires `ttl` from now
    ///
    /// Only the hash is persisted. The returned [`IssuedToken`] is the only
    /// place the plaintext ever exists.
    pub async fn issue_token_with_ttl(
        &self,
        user_id: i64,
        ttl: chrono::Duration,
        scope: TokenScope,
    ) -> Result<IssuedToken, AuthError> {
        let plaintext = generate_token();
        let expiry = self.clock.now() + ttl;
        let record = Token {
            hash: hash_token(&plaintext),
            user_id,
            expiry,
            scope,
        };

        self.storage("insert_token", self.db.insert_token(&record))
            .await?;

        debug!(user_id, scope = %scope, %expiry, "Issued token");

        Ok(IssuedToken {
            plaintext,
            expiry,
            record,
        })
    }

    /// Resolve a presented token to the user that owns it
    ///
    /// Malformed, unknown, expired and wrong-scope tokens all produce the
    /// same [`AuthError::InvalidToken`]. Malformed tokens never reach storage.
    pub async fn resolve_token(&self, scope: TokenScope, plaintext: &str) -> Result<User, AuthError> {
        if !is_valid_token_format(plaintext) {
            return Err(AuthError::InvalidToken);
        }

        let hash = hash_token(plaintext);
        let now = self.clock.now();

        match self
            .storage(
                "get_user_for_token",
                self.db.get_user_for_token(&hash, scope, now),
            )
            .await?
        {
            Some(user) => {
                debug!(user_id = user.id, scope = %scope, "Resolved token");
                Ok(user)
            }
            None => Err(AuthError::InvalidToken),
        }
    }

    /// Delete every token of `scope` owned by `user_id`
    pub async fn revoke_all_for_scope(
        &self,
        user_id: i64,
        scope: TokenScope,
    ) -> Result<u64, AuthError> {
        let deleted = self
            .storage(
                "delete_tokens_for_user",
                self.db.delete_tokens_for_user(scope, user_id),
            )
            .await?;
        debug!(user_id, scope = %scope, deleted, "Revoked tokens");
        Ok(deleted)
    }

    // =========================================================================
    // Access control
    // =========================================================================

    /// Classify a caller from its `Authorization` header
    ///
    /// A missing or empty header is anonymous. Anything other than exactly
    /// `Bearer <token>` is rejected outright rather than downgraded.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<Identity, AuthError> {
        let header = match header {
            None => return Ok(Identity::Anonymous),
            Some(h) if h.is_empty() => return Ok(Identity::Anonymous),
            Some(h) => h,
        };

        let parts: Vec<&str> = header.split(' ').collect();
        if parts.len() != 2 || parts[0] != "Bearer" {
            return Err(AuthError::MalformedAuthorization);
        }

        let user = self
            .resolve_token(TokenScope::Authentication, parts[1])
            .await?;
        Ok(Identity::Authenticated(user))
    }

    // =========================================================================
    // Version-guarded updates
    // =========================================================================

    /// Persist `user` if the stored version still equals `expected_version`
    ///
    /// On success the new version is written back into `user` and returned;
    /// on failure `user` is left as it was. A concurrent writer that got there first yields
    /// [`AuthError::EditConflict`] and nothing is written.
    pub async fn update_identity(
        &self,
        user: &mut User,
        expected_version: i64,
    ) -> Result<i64, AuthError> {
        let previous_version = user.version;
        user.version = expected_version;

        match self
            .storage_user_write("update_user", self.db.update_user(user))
            .await
        {
            Ok(new_version) => {
                user.version = new_version;
                Ok(new_version)
            }
            Err(e) => {
                user.version = previous_version;
                if e == AuthError::EditConflict {
                    info!(user_id = user.id, expected_version, "Edit conflict");
                }
                Err(e)
            }
        }
    }

    // =========================================================================
    // Account flows
    // =========================================================================

    /// Register a new, not yet activated user
    ///
    /// The activation token is handed to the notifier in the background and
    /// also returned to the caller. A retryable delivery failure gets one
    /// more attempt.
    pub async fn register(&self, input: RegisterUser) -> Result<Registration, AuthError> {
        let mut v = ValidationErrors::new();
        validate_name(&mut v, &input.name);
        validate_email(&mut v, &input.email);
        validate_password_plaintext(&mut v, &input.password);
        v.into_result().map_err(AuthError::Validation)?;

        let credential = hash_in_background(input.password).await?;
        let new_user = NewUser {
            name: input.name,
            email: input.email,
            credential,
            activated: false,
        };

        let user = self
            .storage_user_write("insert_user", self.db.insert_user(&new_user))
            .await?;

        let activation_token = self.issue_token(user.id, TokenScope::Activation).await?;

        let notifier = Arc::clone(&self.notifier);
        let notify_user = user.clone();
        let notify_token = activation_token.clone();
        tokio::spawn(async move {
            let mut result = notifier.send_activation(&notify_user, &notify_token).await;
            if matches!(&result, Err(e) if e.is_retryable()) {
                warn!(user_id = notify_user.id, "Retrying activation token delivery");
                result = notifier.send_activation(&notify_user, &notify_token).await;
            }
            if let Err(e) = result {
                error!(user_id = notify_user.id, error = %e, "Failed to deliver activation token");
            }
        });

        info!(user_id = user.id, "Registered user");

        Ok(Registration {
            user,
            activation_token,
        })
    }

    /// Activate the account owning an activation token
    ///
    /// Bad or expired tokens are reported as a validation failure on the
    /// `token` field. All activation tokens of the user are revoked after
    /// the update succeeds.
    pub async fn activate(&self, plaintext: &str) -> Result<User, AuthError> {
        let mut v = ValidationErrors::new();
        v.check(!plaintext.is_empty(), "token", "must be provided");
        v.check(
            is_valid_token_format(plaintext),
            "token",
            "must be 26 bytes long",
        );
        v.into_result().map_err(AuthError::Validation)?;

        let mut user = match self.resolve_token(TokenScope::Activation, plaintext).await {
            Ok(user) => user,
            Err(AuthError::InvalidToken) => {
                let mut v = ValidationErrors::new();
                v.add_error("token", "invalid or expired activation token");
                return Err(AuthError::Validation(v));
            }
            Err(e) => return Err(e),
        };

        user.activated = true;
        let version = user.version;
        self.update_identity(&mut user, version).await?;

        self.revoke_all_for_scope(user.id, TokenScope::Activation)
            .await?;

        info!(user_id = user.id, "Activated user");
        Ok(user)
    }

    /// Exchange email and password for an authentication token
    ///
    /// Unknown email and wrong password are indistinguishable. A stored
    /// hash that cannot be verified is a server fault, never a wrong
    /// password.
    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedToken, AuthError> {
        let mut v = ValidationErrors::new();
        validate_email(&mut v, email);
        validate_password_plaintext(&mut v, password);
        v.into_result().map_err(AuthError::Validation)?;

        let user = self
            .storage("get_user_by_email", self.db.get_user_by_email(email))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        match verify_in_background(user.credential.clone(), password.to_string()).await {
            Ok(true) => {}
            Ok(false) => return Err(AuthError::InvalidCredentials),
            Err(AuthError::MalformedCredential) => {
                error!(user_id = user.id, "Stored credential hash is malformed");
                return Err(AuthError::MalformedCredential);
            }
            Err(e) => return Err(e),
        }

        self.issue_token(user.id, TokenScope::Authentication).await
    }

    /// Apply a partial profile update on behalf of `caller`
    ///
    /// Only the owner may update a profile. The write is guarded by
    /// `input.expected_version`, which must also match the version of the
    /// `caller` snapshot the changes are applied to.
    pub async fn update_profile(
        &self,
        caller: &User,
        target_id: i64,
        input: UpdateUser,
    ) -> Result<User, AuthError> {
        require_owner(caller, target_id)?;

        if caller.version != input.expected_version {
            info!(
                user_id = caller.id,
                snapshot_version = caller.version,
                expected_version = input.expected_version,
                "Edit conflict"
            );
            return Err(AuthError::EditConflict);
        }

        let mut v = ValidationErrors::new();
        if let Some(name) = &input.name {
            validate_name(&mut v, name);
        }
        if let Some(email) = &input.email {
            validate_email(&mut v, email);
        }
        if let Some(password) = &input.password {
            validate_password_plaintext(&mut v, password);
        }
        v.into_result().map_err(AuthError::Validation)?;

        let mut user = caller.clone();
        if let Some(name) = input.name {
            user.name = name;
        }
        if let Some(email) = input.email {
            user.email = email;
        }
        if let Some(password) = input.password {
            user.credential = hash_in_background(password).await?;
        }

        self.update_identity(&mut user, input.expected_version)
            .await?;

        info!(user_id = user.id, version = user.version, "Updated profile");
        Ok(user)
    }

    /// Run one storage call under the storage deadline
    async fn storage<T, F>(&self, operation: &'static str, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        self.storage_with(operation, fut, AuthError::from).await
    }

    /// Like [`storage`](Self::storage), for writes to the users table where a
    /// key collision can only be the email
    async fn storage_user_write<T, F>(
        &self,
        operation: &'static str,
        fut: F,
    ) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        self.storage_with(operation, fut, |e| match e {
            DbError::DuplicateKey(_) => AuthError::DuplicateEmail,
            other => AuthError::from(other),
        })
        .await
    }

    async fn storage_with<T, F>(
        &self,
        operation: &'static str,
        fut: F,
        classify: impl FnOnce(DbError) -> AuthError,
    ) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        match tokio::time::timeout(self.config.storage_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let err = classify(e);
                match &err {
                    AuthError::Internal(detail) => {
                        error!(operation, error = %detail, "Storage error")
                    }
                    AuthError::Unavailable => warn!(operation, "Storage unavailable"),
                    _ => {}
                }
                Err(err)
            }
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.config.storage_timeout.as_millis() as u64,
                    "Storage deadline exceeded"
                );
                Err(AuthError::Unavailable)
            }
        }
    }
}

/// Hash a password off the async workers
async fn hash_in_background(password: String) -> Result<Credential, AuthError> {
    tokio::task::spawn_blocking(move || Credential::set(&password))
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?
        .map_err(AuthError::from)
}

/// Verify a password off the async workers
async fn verify_in_background(credential: Credential, password: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || credential.matches(&password))
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?
        .map_err(AuthError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use crate::clock::ManualClock;
    use crate::database::MockDatabase;
    use crate::models::user::test_user;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use mockall::predicate::eq;
    use parking_lot::Mutex;

    fn create_test_manager(db: MockDatabase) -> AuthManager<MockDatabase> {
        AuthManager::new(Arc::new(db), AuthConfig::default())
    }

    fn user_with_password(id: i64, password: &str, activated: bool) -> User {
        let mut user = test_user(id, "alice@example.com", activated);
        user.credential = Credential::from_hash(hash_password(password).unwrap()).unwrap();
        user
    }

    /// Notifier that remembers what it was given
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl ActivationNotifier for RecordingNotifier {
        async fn send_activation(
            &self,
            user: &User,
            token: &IssuedToken,
        ) -> Result<(), AuthError> {
            self.sent.lock().push((user.id, token.plaintext.clone()));
            Ok(())
        }
    }

    /// Database whose every call hangs forever
    struct StalledDatabase;

    #[async_trait]
    impl Database for StalledDatabase {
        async fn insert_user(&self, _: &NewUser) -> Result<User, DbError> {
            std::future::pending().await
        }
        async fn get_user_by_email(&self, _: &str) -> Result<Option<User>, DbError> {
            std::future::pending().await
        }
        async fn update_user(&self, _: &User) -> Result<i64, DbError> {
            std::future::pending().await
        }
        async fn insert_token(&self, _: &Token) -> Result<(), DbError> {
            std::future::pending().await
        }
        async fn get_user_for_token(
            &self,
            _: &str,
            _: TokenScope,
            _: DateTime<Utc>,
        ) -> Result<Option<User>, DbError> {
            std::future::pending().await
        }
        async fn delete_tokens_for_user(&self, _: TokenScope, _: i64) -> Result<u64, DbError> {
            std::future::pending().await
        }
    }

    // Test 1: issue_token stores only the hash with the scope TTL
    #[tokio::test]
    async fn test_issue_token_stores_hash() {
        let clock = ManualClock::default();
        let start = clock.now();

        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_insert_token()
            .withf(move |token| {
                token.user_id == 7
                    && token.scope == TokenScope::Authentication
                    && token.expiry == start + chrono::Duration::hours(24)
                    && token.hash.len() == 64
            })
            .times(1)
            .returning(|_| Ok(()));

        let manager = create_test_manager(mock_db).with_clock(Arc::new(clock));
        let issued = manager
            .issue_token(7, TokenScope::Authentication)
            .await
            .unwrap();

        assert_eq!(issued.plaintext.len(), 26);
        assert_eq!(issued.record.hash, hash_token(&issued.plaintext));
        assert_ne!(issued.record.hash, issued.plaintext);
    }

    // Test 2: activation tokens get the 72h lifetime
    #[tokio::test]
    async fn test_issue_activation_token_ttl() {
        let clock = ManualClock::default();
        let start = clock.now();

        let mut mock_db = MockDatabase::new();
        mock_db.expect_insert_token().returning(|_| Ok(()));

        let manager = create_test_manager(mock_db).with_clock(Arc::new(clock));
        let issued = manager.issue_token(1, TokenScope::Activation).await.unwrap();

        assert_eq!(issued.expiry, start + chrono::Duration::hours(72));
    }

    // Test 3: malformed tokens never reach storage
    #[tokio::test]
    async fn test_resolve_token_bad_format_skips_storage() {
        let mut mock_db = MockDatabase::new();
        mock_db.expect_get_user_for_token().never();

        let manager = create_test_manager(mock_db);
        for bad in ["", "short", "abcdefghijklmnopqrstuvwxyz", "ABCDEFGHIJKLMNOPQRSTUVWXYZA"] {
            assert_eq!(
                manager
                    .resolve_token(TokenScope::Authentication, bad)
                    .await
                    .unwrap_err(),
                AuthError::InvalidToken
            );
        }
    }

    // Test 4: resolve_token looks up by hash, scope and current time
    #[tokio::test]
    async fn test_resolve_token_success() {
        let clock = ManualClock::default();
        let now = clock.now();
        let token = generate_token();
        let expected_hash = hash_token(&token);

        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_get_user_for_token()
            .withf(move |hash, scope, at| {
                hash == expected_hash && *scope == TokenScope::Authentication && *at == now
            })
            .returning(|_, _, _| Ok(Some(test_user(3, "c@example.com", true))));

        let manager = create_test_manager(mock_db).with_clock(Arc::new(clock));
        let user = manager
            .resolve_token(TokenScope::Authentication, &token)
            .await
            .unwrap();
        assert_eq!(user.id, 3);
    }

    // Test 5: storage miss is InvalidToken
    #[tokio::test]
    async fn test_resolve_token_not_found() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_get_user_for_token()
            .returning(|_, _, _| Ok(None));

        let manager = create_test_manager(mock_db);
        let result = manager
            .resolve_token(TokenScope::Activation, &generate_token())
            .await;
        assert_eq!(result.unwrap_err(), AuthError::InvalidToken);
    }

    // Test 6: authenticate without a header is anonymous and touches nothing
    #[tokio::test]
    async fn test_authenticate_anonymous() {
        let mut mock_db = MockDatabase::new();
        mock_db.expect_get_user_for_token().never();

        let manager = create_test_manager(mock_db);
        assert_eq!(manager.authenticate(None).await.unwrap(), Identity::Anonymous);
        assert_eq!(
            manager.authenticate(Some("")).await.unwrap(),
            Identity::Anonymous
        );
    }

    // Test 7: authorization headers not of the form "Bearer <token>" are rejected
    #[tokio::test]
    async fn test_authenticate_malformed_header() {
        let mut mock_db = MockDatabase::new();
        mock_db.expect_get_user_for_token().never();

        let manager = create_test_manager(mock_db);
        let token = generate_token();
        for header in [
            format!("Basic {}", token),
            format!("bearer {}", token),
            format!("Bearer  {}", token),
            format!("Bearer {} extra", token),
            token.clone(),
        ] {
            assert_eq!(
                manager.authenticate(Some(&header)).await.unwrap_err(),
                AuthError::MalformedAuthorization,
                "header {:?}",
                header
            );
        }
    }

    // Test 8: authenticate resolves a bearer token in authentication scope
    #[tokio::test]
    async fn test_authenticate_bearer() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_get_user_for_token()
            .withf(|_, scope, _| *scope == TokenScope::Authentication)
            .returning(|_, _, _| Ok(Some(test_user(5, "e@example.com", false))));

        let manager = create_test_manager(mock_db);
        let header = format!("Bearer {}", generate_token());
        let identity = manager.authenticate(Some(&header)).await.unwrap();

        assert_eq!(identity.user().map(|u| u.id), Some(5));
    }

    // Test 9: update_identity writes back the new version
    #[tokio::test]
    async fn test_update_identity_success() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_update_user()
            .withf(|user| user.version == 4)
            .returning(|_| Ok(5));

        let manager = create_test_manager(mock_db);
        let mut user = test_user(1, "a@example.com", true);
        let version = manager.update_identity(&mut user, 4).await.unwrap();

        assert_eq!(version, 5);
        assert_eq!(user.version, 5);
    }

    // Test 10: update_identity reports conflicts and keeps the old version
    #[tokio::test]
    async fn test_update_identity_conflict() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_update_user()
            .returning(|_| Err(DbError::EditConflict));

        let manager = create_test_manager(mock_db);
        let mut user = test_user(1, "a@example.com", true);
        let result = manager.update_identity(&mut user, 1).await;

        assert_eq!(result.unwrap_err(), AuthError::EditConflict);
        assert_eq!(user.version, 1);
    }

    // Test 11: duplicate email on update surfaces as DuplicateEmail
    #[tokio::test]
    async fn test_update_identity_duplicate_email() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_update_user()
            .returning(|_| Err(DbError::DuplicateKey("users.email".to_string())));

        let manager = create_test_manager(mock_db);
        let mut user = test_user(1, "a@example.com", true);
        assert_eq!(
            manager.update_identity(&mut user, 1).await.unwrap_err(),
            AuthError::DuplicateEmail
        );
    }

    // Test 12: storage deadline maps to Unavailable
    #[tokio::test(start_paused = true)]
    async fn test_storage_timeout_is_unavailable() {
        let manager = AuthManager::new(Arc::new(StalledDatabase), AuthConfig::default());

        let result = manager
            .resolve_token(TokenScope::Authentication, &generate_token())
            .await;
        assert_eq!(result.unwrap_err(), AuthError::Unavailable);

        let mut user = test_user(1, "a@example.com", true);
        assert_eq!(
            manager.update_identity(&mut user, 1).await.unwrap_err(),
            AuthError::Unavailable
        );
    }

    // Test 13: connection failure maps to Unavailable
    #[tokio::test]
    async fn test_connection_failure_is_unavailable() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_get_user_for_token()
            .returning(|_, _, _| Err(DbError::Connection("closed".to_string())));

        let manager = create_test_manager(mock_db);
        let result = manager
            .resolve_token(TokenScope::Authentication, &generate_token())
            .await;
        assert_eq!(result.unwrap_err(), AuthError::Unavailable);
    }

    // Test 14: register validates before touching storage
    #[tokio::test]
    async fn test_register_validation() {
        let mut mock_db = MockDatabase::new();
        mock_db.expect_insert_user().never();

        let manager = create_test_manager(mock_db);
        let result = manager
            .register(RegisterUser {
                name: String::new(),
                email: "not-an-email".to_string(),
                password: "short".to_string(),
            })
            .await;

        match result {
            Err(AuthError::Validation(v)) => {
                assert_eq!(v.get("name"), Some("must be provided"));
                assert_eq!(v.get("email"), Some("must be a valid email address"));
                assert_eq!(v.get("password"), Some("must be at least 8 bytes long"));
            }
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    // Test 15: register stores a hashed password, issues and delivers an activation token
    #[tokio::test]
    async fn test_register_success() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_insert_user()
            .withf(|new_user| {
                !new_user.activated && new_user.credential.hash().starts_with("$argon2id$")
            })
            .returning(|new_user| {
                Ok(User {
                    id: 11,
                    created_at: Utc::now(),
                    name: new_user.name.clone(),
                    email: new_user.email.clone(),
                    credential: new_user.credential.clone(),
                    activated: false,
                    version: 1,
                })
            });
        mock_db
            .expect_insert_token()
            .withf(|token| token.scope == TokenScope::Activation && token.user_id == 11)
            .returning(|_| Ok(()));

        let notifier = Arc::new(RecordingNotifier::default());
        let manager = create_test_manager(mock_db).with_notifier(notifier.clone());

        let registration = manager
            .register(RegisterUser {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                password: "pa55word!".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(registration.user.id, 11);
        assert!(!registration.user.activated);

        // Delivery runs in the background
        for _ in 0..50 {
            if !notifier.sent.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let sent = notifier.sent.lock().clone();
        assert_eq!(
            sent,
            vec![(11, registration.activation_token.plaintext.clone())]
        );
    }

    // Test 16: duplicate email at registration
    #[tokio::test]
    async fn test_register_duplicate_email() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_insert_user()
            .returning(|_| Err(DbError::DuplicateKey("users.email".to_string())));
        mock_db.expect_insert_token().never();

        let manager = create_test_manager(mock_db);
        let result = manager
            .register(RegisterUser {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                password: "pa55word!".to_string(),
            })
            .await;
        assert_eq!(result.unwrap_err(), AuthError::DuplicateEmail);
    }

    // Test 17: activate flips the flag, bumps the version and revokes activation tokens
    #[tokio::test]
    async fn test_activate_success() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_get_user_for_token()
            .withf(|_, scope, _| *scope == TokenScope::Activation)
            .returning(|_, _, _| Ok(Some(test_user(2, "b@example.com", false))));
        mock_db
            .expect_update_user()
            .withf(|user| user.activated && user.version == 1)
            .returning(|_| Ok(2));
        mock_db
            .expect_delete_tokens_for_user()
            .with(eq(TokenScope::Activation), eq(2i64))
            .times(1)
            .returning(|_, _| Ok(1));

        let manager = create_test_manager(mock_db);
        let user = manager.activate(&generate_token()).await.unwrap();

        assert!(user.activated);
        assert_eq!(user.version, 2);
    }

    // Test 18: unknown or expired activation token is a validation failure on "token"
    #[tokio::test]
    async fn test_activate_invalid_token() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_get_user_for_token()
            .returning(|_, _, _| Ok(None));
        mock_db.expect_update_user().never();

        let manager = create_test_manager(mock_db);
        match manager.activate(&generate_token()).await {
            Err(AuthError::Validation(v)) => {
                assert_eq!(v.get("token"), Some("invalid or expired activation token"))
            }
            other => panic!("Expected validation error, got {:?}", other),
        }

        match manager.activate("bogus").await {
            Err(AuthError::Validation(v)) => {
                assert_eq!(v.get("token"), Some("must be 26 bytes long"))
            }
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    // Test 19: activation conflict leaves activation tokens in place
    #[tokio::test]
    async fn test_activate_conflict() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_get_user_for_token()
            .returning(|_, _, _| Ok(Some(test_user(2, "b@example.com", false))));
        mock_db
            .expect_update_user()
            .returning(|_| Err(DbError::EditConflict));
        mock_db.expect_delete_tokens_for_user().never();

        let manager = create_test_manager(mock_db);
        assert_eq!(
            manager.activate(&generate_token()).await.unwrap_err(),
            AuthError::EditConflict
        );
    }

    // Test 20: login issues an authentication token for the right password
    #[tokio::test]
    async fn test_login_success() {
        let user = user_with_password(4, "pa55word!", true);

        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_get_user_by_email()
            .with(eq("alice@example.com"))
            .returning(move |_| Ok(Some(user.clone())));
        mock_db
            .expect_insert_token()
            .withf(|token| token.scope == TokenScope::Authentication && token.user_id == 4)
            .returning(|_| Ok(()));

        let manager = create_test_manager(mock_db);
        let issued = manager.login("alice@example.com", "pa55word!").await.unwrap();
        assert!(is_valid_token_format(&issued.plaintext));
    }

    // Test 21: wrong password and unknown email look the same
    #[tokio::test]
    async fn test_login_invalid_credentials() {
        let user = user_with_password(4, "pa55word!", true);

        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_get_user_by_email()
            .returning(move |email| {
                if email == "alice@example.com" {
                    Ok(Some(user.clone()))
                } else {
                    Ok(None)
                }
            });
        mock_db.expect_insert_token().never();

        let manager = create_test_manager(mock_db);
        assert_eq!(
            manager
                .login("alice@example.com", "wrong-password")
                .await
                .unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            manager
                .login("nobody@example.com", "pa55word!")
                .await
                .unwrap_err(),
            AuthError::InvalidCredentials
        );
    }

    // Test 22: a corrupted stored hash is a server fault, not a wrong password
    #[tokio::test]
    async fn test_login_malformed_credential() {
        let mut user = test_user(4, "alice@example.com", true);
        user.credential = Credential::from_hash("garbage").unwrap();

        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_get_user_by_email()
            .returning(move |_| Ok(Some(user.clone())));
        mock_db.expect_insert_token().never();

        let manager = create_test_manager(mock_db);
        assert_eq!(
            manager
                .login("alice@example.com", "pa55word!")
                .await
                .unwrap_err(),
            AuthError::MalformedCredential
        );
    }

    // Test 23: update_profile is owner-only
    #[tokio::test]
    async fn test_update_profile_not_owner() {
        let mut mock_db = MockDatabase::new();
        mock_db.expect_update_user().never();

        let manager = create_test_manager(mock_db);
        let caller = test_user(1, "a@example.com", true);
        let result = manager
            .update_profile(
                &caller,
                2,
                UpdateUser {
                    name: Some("Mallory".to_string()),
                    email: None,
                    password: None,
                    expected_version: 1,
                },
            )
            .await;
        assert_eq!(result.unwrap_err(), AuthError::NotPermitted);
    }

    // Test 24: update_profile applies changes at the expected version
    #[tokio::test]
    async fn test_update_profile_success() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_update_user()
            .withf(|user| user.name == "Alicia" && user.version == 3)
            .returning(|_| Ok(4));

        let manager = create_test_manager(mock_db);
        let mut caller = test_user(1, "a@example.com", true);
        caller.version = 3;
        let updated = manager
            .update_profile(
                &caller,
                1,
                UpdateUser {
                    name: Some("Alicia".to_string()),
                    email: None,
                    password: None,
                    expected_version: 3,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Alicia");
        assert_eq!(updated.version, 4);
        assert_eq!(updated.email, "a@example.com");
    }

    // Test 25: config TTL lookup by scope
    #[test]
    fn test_auth_config_defaults() {
        let config = AuthConfig::default();
        assert_eq!(
            config.ttl_for(TokenScope::Authentication),
            chrono::Duration::hours(24)
        );
        assert_eq!(
            config.ttl_for(TokenScope::Activation),
            chrono::Duration::hours(72)
        );
        assert_eq!(config.storage_timeout, Duration::from_secs(3));
    }

    /// Notifier that is unavailable on its first call
    #[derive(Default)]
    struct FlakyNotifier {
        attempts: Mutex<u32>,
    }

    #[async_trait]
    impl ActivationNotifier for FlakyNotifier {
        async fn send_activation(&self, _: &User, _: &IssuedToken) -> Result<(), AuthError> {
            let mut attempts = self.attempts.lock();
            *attempts += 1;
            if *attempts == 1 {
                Err(AuthError::Unavailable)
            } else {
                Ok(())
            }
        }
    }

    // Test 26: a retryable delivery failure is attempted once more
    #[tokio::test]
    async fn test_register_retries_unavailable_notifier() {
        let mut mock_db = MockDatabase::new();
        mock_db.expect_insert_user().returning(|new_user| {
            Ok(User {
                id: 12,
                created_at: Utc::now(),
                name: new_user.name.clone(),
                email: new_user.email.clone(),
                credential: new_user.credential.clone(),
                activated: false,
                version: 1,
            })
        });
        mock_db.expect_insert_token().returning(|_| Ok(()));

        let notifier = Arc::new(FlakyNotifier::default());
        let manager = create_test_manager(mock_db).with_notifier(notifier.clone());

        manager
            .register(RegisterUser {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                password: "pa55word!".to_string(),
            })
            .await
            .unwrap();

        for _ in 0..50 {
            if *notifier.attempts.lock() >= 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(*notifier.attempts.lock(), 2);
    }

    // Test 27: a snapshot older than the expected version is a conflict
    #[tokio::test]
    async fn test_update_profile_stale_snapshot() {
        let mut mock_db = MockDatabase::new();
        mock_db.expect_update_user().never();

        let manager = create_test_manager(mock_db);
        let caller = test_user(1, "a@example.com", true);
        let result = manager
            .update_profile(
                &caller,
                1,
                UpdateUser {
                    name: None,
                    email: Some("b@example.com".to_string()),
                    password: None,
                    expected_version: 2,
                },
            )
            .await;
        assert_eq!(result.unwrap_err(), AuthError::EditConflict);
    }

    // Test 28: a token hash collision is a server fault, not a duplicate email
    #[tokio::test]
    async fn test_token_key_collision_is_internal() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_insert_token()
            .returning(|_| Err(DbError::DuplicateKey("tokens.hash".to_string())));

        let manager = create_test_manager(mock_db);
        let result = manager.issue_token(7, TokenScope::Authentication).await;
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }
}
