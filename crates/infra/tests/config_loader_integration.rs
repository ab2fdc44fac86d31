//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading configuration from files.

use std::io::Write;
use std::time::Duration;

use keel_infra::config;
use tempfile::NamedTempFile;

fn write_config(contents: &str, extension: &str) -> std::path::PathBuf {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file.write_all(contents.as_bytes()).expect("Failed to write to temp file");

    let path = temp_file.path().with_extension(extension);
    std::fs::copy(temp_file.path(), &path).expect("Failed to copy file");
    path
}

#[test]
fn test_load_full_config_from_json_file() {
    let path = write_config(
        r#"{
            "api": {
                "base_url": "https://api.example.com/v1",
                "timeout_ms": 10000,
                "refresh_path": "/session/refresh",
                "user_agent": "keel-integration"
            },
            "circuit_breaker": {
                "failure_threshold": 3,
                "reset_timeout_ms": 10000,
                "half_open_max_calls": 2
            },
            "retry": {
                "max_retries": 1,
                "base_backoff_ms": 100,
                "retry_statuses": [502, 503]
            },
            "logging": { "level": "warn", "json": true }
        }"#,
        "json",
    );

    let config = config::load_from_file(Some(path.clone())).expect("JSON config should load");

    assert_eq!(config.api.base_url, "https://api.example.com/v1");
    assert_eq!(config.api.timeout(), Duration::from_secs(10));
    assert_eq!(config.api.refresh_path, "/session/refresh");
    assert_eq!(config.api.user_agent.as_deref(), Some("keel-integration"));
    assert_eq!(config.circuit_breaker.failure_threshold, 3);
    assert_eq!(config.circuit_breaker.reset_timeout(), Duration::from_secs(10));
    assert_eq!(config.circuit_breaker.half_open_max_calls, 2);
    assert_eq!(config.retry.retry_statuses, vec![502, 503]);
    assert_eq!(config.logging.level, "warn");
    assert!(config.logging.json);

    std::fs::remove_file(path).ok();
}

#[test]
fn test_load_minimal_config_from_toml_file() {
    let path = write_config(
        r#"
[api]
base_url = "https://api.example.com"
"#,
        "toml",
    );

    let config = config::load_from_file(Some(path.clone())).expect("TOML config should load");

    assert_eq!(config, keel_domain::Config::with_base_url("https://api.example.com"));

    std::fs::remove_file(path).ok();
}

#[test]
fn test_missing_base_url_is_rejected() {
    let path = write_config(r#"{ "retry": { "max_retries": 1 } }"#, "json");

    let result = config::load_from_file(Some(path.clone()));
    assert!(matches!(result, Err(keel_domain::KeelError::Config(_))));

    std::fs::remove_file(path).ok();
}
