//! Configuration management for feel-flow
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::auth;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "FEEL_FLOW_";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Token and storage deadline configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Per-client rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Cross-origin request policy
    #[serde(default)]
    pub cors: CorsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix FEEL_FLOW_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // Server config from env
        if let Some(host) = env_var("SERVER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse("SERVER_PORT")? {
            config.server.port = port;
        }
        if let Some(env) = env_var("SERVER_ENV") {
            config.server.env = env;
        }

        // Database config from env
        if let Some(path) = env_var("DATABASE_PATH") {
            config.database.path = path;
        }

        // Auth config from env
        if let Some(hours) = env_parse("AUTH_AUTHENTICATION_TOKEN_TTL_HOURS")? {
            config.auth.authentication_token_ttl_hours = hours;
        }
        if let Some(hours) = env_parse("AUTH_ACTIVATION_TOKEN_TTL_HOURS")? {
            config.auth.activation_token_ttl_hours = hours;
        }
        if let Some(ms) = env_parse("AUTH_STORAGE_TIMEOUT_MS")? {
            config.auth.storage_timeout_ms = ms;
        }

        // Rate limit config from env
        if let Some(enabled) = env_parse("RATE_LIMIT_ENABLED")? {
            config.rate_limit.enabled = enabled;
        }
        if let Some(rps) = env_parse("RATE_LIMIT_RPS")? {
            config.rate_limit.requests_per_second = rps;
        }
        if let Some(burst) = env_parse("RATE_LIMIT_BURST")? {
            config.rate_limit.burst = burst;
        }

        // Space separated list of origins
        if let Some(origins) = env_var("CORS_TRUSTED_ORIGINS") {
            config.cors.trusted_origins = origins.split_whitespace().map(String::from).collect();
        }

        // Logging config from env
        if let Some(level) = env_var("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = env_var("LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Check values that deserialize fine but cannot work at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rps = self.rate_limit.requests_per_second;
        if !(rps > 0.0 && rps.is_finite()) {
            return Err(ConfigError::InvalidValue(
                "rate_limit.requests_per_second must be a positive finite number".to_string(),
            ));
        }
        if self.rate_limit.burst == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limit.burst must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limit.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.auth.storage_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "auth.storage_timeout_ms must be positive".to_string(),
            ));
        }
        if self.auth.authentication_token_ttl_hours == 0 || self.auth.activation_token_ttl_hours == 0
        {
            return Err(ConfigError::InvalidValue(
                "token lifetimes must be positive".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidValue(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            )));
        }
        if self.database.path.is_empty() {
            return Err(ConfigError::MissingRequired("database.path".to_string()));
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deployment environment label (development, staging, production)
    #[serde(default = "default_env")]
    pub env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            env: default_env(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_env() -> String {
    "development".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "feel-flow.db".to_string()
}

/// Token lifetime and storage deadline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Lifetime of authentication tokens in hours
    #[serde(default = "default_authentication_ttl")]
    pub authentication_token_ttl_hours: u32,

    /// Lifetime of activation tokens in hours
    #[serde(default = "default_activation_ttl")]
    pub activation_token_ttl_hours: u32,

    /// Deadline for a single storage round-trip in milliseconds
    #[serde(default = "default_storage_timeout")]
    pub storage_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authentication_token_ttl_hours: default_authentication_ttl(),
            activation_token_ttl_hours: default_activation_ttl(),
            storage_timeout_ms: default_storage_timeout(),
        }
    }
}

fn default_authentication_ttl() -> u32 {
    24
}

fn default_activation_ttl() -> u32 {
    72
}

fn default_storage_timeout() -> u64 {
    3000
}

impl From<&AuthConfig> for auth::AuthConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            authentication_ttl: chrono::Duration::hours(config.authentication_token_ttl_hours as i64),
            activation_ttl: chrono::Duration::hours(config.activation_token_ttl_hours as i64),
            storage_timeout: Duration::from_millis(config.storage_timeout_ms),
        }
    }
}

/// Per-client rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,

    /// Steady-state requests per second per client
    #[serde(default = "default_rps")]
    pub requests_per_second: f64,

    /// Burst capacity per client
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Interval between idle-entry sweeps in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Idle time after which a client entry is evicted, in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            requests_per_second: default_rps(),
            burst: default_burst(),
            sweep_interval_secs: default_sweep_interval(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_rps() -> f64 {
    2.0
}

fn default_burst() -> u32 {
    4
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_idle_timeout() -> u64 {
    180
}

impl From<&RateLimitConfig> for auth::RateLimitConfig {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            requests_per_second: config.requests_per_second,
            burst: config.burst,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }
}

/// Cross-origin request policy
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CorsConfig {
    /// Origins allowed to make cross-origin requests; empty disables CORS
    #[serde(default)]
    pub trusted_origins: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, suffix)).ok()
}

fn env_parse<T: FromStr>(suffix: &str) -> Result<Option<T>, ConfigError> {
    match env_var(suffix) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            ConfigError::Parse(format!("Invalid value for {}{}: {}", ENV_PREFIX, suffix, raw))
        }),
    }
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
