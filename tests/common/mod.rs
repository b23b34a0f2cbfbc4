//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use feel_flow::auth::{ActivationNotifier, AuthConfig, AuthManager, RateLimitConfig, RateLimiter};
use feel_flow::clock::ManualClock;
use feel_flow::config::ServerConfig;
use feel_flow::database::{Database, SqliteDatabase};
use feel_flow::error::AuthError;
use feel_flow::models::{IssuedToken, RegisterUser, User};
use feel_flow::server::{AppState, Server};

pub const TEST_PASSWORD: &str = "pa55word1234";

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// Notifier that keeps every activation token it is handed
#[derive(Default)]
pub struct RecordingNotifier {
    tokens: Mutex<HashMap<i64, String>>,
}

impl RecordingNotifier {
    pub fn token_for(&self, user_id: i64) -> Option<String> {
        self.tokens.lock().get(&user_id).cloned()
    }

    /// Wait for the background delivery of `user_id`'s activation token
    pub async fn wait_for_token(&self, user_id: i64) -> String {
        for _ in 0..100 {
            if let Some(token) = self.token_for(user_id) {
                return token;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("No activation token delivered for user {}", user_id);
    }
}

#[async_trait]
impl ActivationNotifier for RecordingNotifier {
    async fn send_activation(&self, user: &User, token: &IssuedToken) -> Result<(), AuthError> {
        self.tokens.lock().insert(user.id, token.plaintext.clone());
        Ok(())
    }
}

/// Authentication manager wired to a manual clock and a recording notifier
pub struct TestAuth<D: Database> {
    pub manager: Arc<AuthManager<D>>,
    pub clock: ManualClock,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn create_test_auth_manager<D: Database>(db: Arc<D>) -> TestAuth<D> {
    let clock = ManualClock::default();
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = AuthManager::new(db, AuthConfig::default())
        .with_clock(Arc::new(clock.clone()))
        .with_notifier(Arc::clone(&notifier) as Arc<dyn ActivationNotifier>);

    TestAuth {
        manager: Arc::new(manager),
        clock,
        notifier,
    }
}

pub fn registration(name: &str, email: &str) -> RegisterUser {
    RegisterUser {
        name: name.to_string(),
        email: email.to_string(),
        password: TEST_PASSWORD.to_string(),
    }
}

/// Register and activate a user, returning the activated record
pub async fn create_activated_user<D: Database>(
    manager: &AuthManager<D>,
    name: &str,
    email: &str,
) -> User {
    let registration = manager
        .register(registration(name, email))
        .await
        .expect("Failed to register user");
    manager
        .activate(&registration.activation_token.plaintext)
        .await
        .expect("Failed to activate user")
}

/// Create a test application state with rate limiting disabled
pub fn create_test_state<D: Database>(auth_manager: Arc<AuthManager<D>>) -> AppState<D> {
    create_test_state_with_rate_limit(
        auth_manager,
        RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        },
    )
}

pub fn create_test_state_with_rate_limit<D: Database>(
    auth_manager: Arc<AuthManager<D>>,
    rate_limit: RateLimitConfig,
) -> AppState<D> {
    AppState {
        auth_manager,
        rate_limiter: Arc::new(RateLimiter::new(rate_limit)),
        environment: "testing".to_string(),
    }
}

/// Create a test server configuration with a random port
pub fn create_test_server_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    }
}

/// Run a test server in the background and return the address
/// The server will be shut down when the returned shutdown sender is dropped or sent
pub async fn run_test_server<D: Database + 'static>(
    state: AppState<D>,
) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let app = Server::new(create_test_server_config(), state)
        .app()
        .expect("Failed to build application");

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await
        .expect("Server error");
    });

    (addr, shutdown_tx)
}
