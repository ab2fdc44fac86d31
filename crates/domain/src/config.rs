//! Configuration structures for the request core
//!
//! Every section deserializes with defaults so a config file only has to name
//! `api.base_url`. Loading from environment or disk lives in
//! `keel-infra::config`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BASE_BACKOFF_MS, DEFAULT_FAILURE_THRESHOLD, DEFAULT_HALF_OPEN_MAX_CALLS,
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_RETRIES, DEFAULT_REFRESH_PATH, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_RESET_TIMEOUT_MS, DEFAULT_RETRY_STATUSES,
};
use crate::errors::{KeelError, Result};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Configuration with defaults for everything except the base URL
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            api: ApiConfig::new(base_url),
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Check cross-field constraints that serde cannot express
    ///
    /// # Errors
    /// Returns `KeelError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(KeelError::Config("api.base_url must not be empty".into()));
        }
        if self.api.timeout_ms == 0 {
            return Err(KeelError::Config("api.timeout_ms must be greater than 0".into()));
        }
        if !self.api.refresh_path.starts_with('/') {
            return Err(KeelError::Config("api.refresh_path must start with '/'".into()));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(KeelError::Config(
                "circuit_breaker.failure_threshold must be greater than 0".into(),
            ));
        }
        if self.circuit_breaker.half_open_max_calls == 0 {
            return Err(KeelError::Config(
                "circuit_breaker.half_open_max_calls must be greater than 0".into(),
            ));
        }
        if let Some(status) = self.retry.retry_statuses.iter().find(|s| !(100..=599).contains(*s))
        {
            return Err(KeelError::Config(format!(
                "retry.retry_statuses contains invalid HTTP status {status}"
            )));
        }
        Ok(())
    }
}

/// Upstream API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL every request path is appended to (e.g. `https://api.example.com/v1`)
    pub base_url: String,
    /// Per-attempt timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Path of the session refresh endpoint, relative to `base_url`
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            user_agent: None,
        }
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u64,
    pub reset_timeout_ms: u64,
    pub half_open_max_calls: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout_ms: DEFAULT_RESET_TIMEOUT_MS,
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
        }
    }
}

impl CircuitBreakerSettings {
    pub const fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Transient retry policy for idempotent requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry
    pub base_backoff_ms: u64,
    /// Status codes treated as transient
    pub retry_statuses: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetrySettings {
    pub const fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: DEFAULT_LOG_LEVEL.to_string(), json: false }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_refresh_path() -> String {
    DEFAULT_REFRESH_PATH.to_string()
}
