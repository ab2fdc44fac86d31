//! Configuration loader
//!
//! Loads client configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `KEEL_API_BASE_URL` is unset or a value is invalid, falls back to a file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `KEEL_API_BASE_URL`: Upstream base URL (required)
//! - `KEEL_API_TIMEOUT_MS`: Per-attempt request timeout
//! - `KEEL_API_REFRESH_PATH`: Session refresh endpoint path
//! - `KEEL_API_USER_AGENT`: User agent sent with every request
//! - `KEEL_CB_FAILURE_THRESHOLD`: Consecutive failures before the circuit opens
//! - `KEEL_CB_RESET_TIMEOUT_MS`: Cool-down before a recovery probe
//! - `KEEL_CB_HALF_OPEN_MAX_CALLS`: Concurrent recovery probes
//! - `KEEL_RETRY_MAX_RETRIES`: Transient retries for idempotent requests
//! - `KEEL_RETRY_BASE_BACKOFF_MS`: First retry delay (doubles per retry)
//! - `KEEL_RETRY_STATUSES`: Comma-separated transient status codes
//! - `KEEL_LOG_LEVEL`: Default log filter when `RUST_LOG` is unset
//! - `KEEL_LOG_JSON`: Emit JSON log lines (true/false)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./keel.json` or `./keel.toml` (current working directory)
//! 2. `./config.json` or `./config.toml` (current working directory)
//! 3. The same names in the parent and grandparent directories
//! 4. Relative to executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use keel_domain::{
    ApiConfig, CircuitBreakerSettings, Config, KeelError, LoggingConfig, Result, RetrySettings,
};

use crate::errors::InfraError;

const CONFIG_FILE_NAMES: [&str; 4] = ["keel.json", "keel.toml", "config.json", "config.toml"];

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If that fails,
/// falls back to loading from a config file.
///
/// # Errors
/// Returns `KeelError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - Validation fails
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// Only `KEEL_API_BASE_URL` is required; every other variable falls back
/// to its default.
///
/// # Errors
/// Returns `KeelError::Config` if the base URL is missing, a value cannot be
/// parsed, or the resulting configuration is invalid.
pub fn load_from_env() -> Result<Config> {
    let defaults = Config::with_base_url(env_var("KEEL_API_BASE_URL")?);

    let api = ApiConfig {
        timeout_ms: env_parse("KEEL_API_TIMEOUT_MS", defaults.api.timeout_ms)?,
        refresh_path: env_opt("KEEL_API_REFRESH_PATH").unwrap_or(defaults.api.refresh_path),
        user_agent: env_opt("KEEL_API_USER_AGENT"),
        base_url: defaults.api.base_url,
    };

    let circuit_breaker = CircuitBreakerSettings {
        failure_threshold: env_parse(
            "KEEL_CB_FAILURE_THRESHOLD",
            defaults.circuit_breaker.failure_threshold,
        )?,
        reset_timeout_ms: env_parse(
            "KEEL_CB_RESET_TIMEOUT_MS",
            defaults.circuit_breaker.reset_timeout_ms,
        )?,
        half_open_max_calls: env_parse(
            "KEEL_CB_HALF_OPEN_MAX_CALLS",
            defaults.circuit_breaker.half_open_max_calls,
        )?,
    };

    let retry = RetrySettings {
        max_retries: env_parse("KEEL_RETRY_MAX_RETRIES", defaults.retry.max_retries)?,
        base_backoff_ms: env_parse("KEEL_RETRY_BASE_BACKOFF_MS", defaults.retry.base_backoff_ms)?,
        retry_statuses: match env_opt("KEEL_RETRY_STATUSES") {
            Some(list) => parse_status_list(&list)?,
            None => defaults.retry.retry_statuses,
        },
    };

    let logging = LoggingConfig {
        level: env_opt("KEEL_LOG_LEVEL").unwrap_or(defaults.logging.level),
        json: env_bool("KEEL_LOG_JSON", defaults.logging.json),
    };

    let config = Config { api, circuit_breaker, retry, logging };
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Arguments
/// * `path` - Optional path to config file. If `None`, uses
///   [`probe_config_paths`].
///
/// # Errors
/// Returns `KeelError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - Validation fails
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(KeelError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            KeelError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| KeelError::Config(format!("Failed to read config file: {}", e)))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents).map_err(|e| InfraError::from(e).into()),
        "json" => serde_json::from_str(contents)
            .map_err(|e| KeelError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(KeelError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.extend([exe_dir.to_path_buf(), exe_dir.join(".."), exe_dir.join("../..")]);
        }
    }

    roots
        .iter()
        .flat_map(|root| CONFIG_FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

/// Get required environment variable
fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| KeelError::Config(format!("Missing required environment variable: {}", key)))
}

/// Optional environment variable; blank values count as unset
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse an optional environment variable, falling back to `default`
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| KeelError::Config(format!("Invalid value for {}: {}", key, e))),
        None => Ok(default),
    }
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn parse_status_list(raw: &str) -> Result<Vec<u16>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>()
                .map_err(|e| KeelError::Config(format!("Invalid status code '{}': {}", s, e)))
        })
        .collect()
}
