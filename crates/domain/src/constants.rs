//! Default values for the request core
//!
//! Centralized location for the defaults shared by configuration structures
//! and the loader.

// API transport
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const HEALTH_CHECK_TIMEOUT_MS: u64 = 5_000;

// Circuit breaker
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 5;
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u64 = 1;

// Transient retry (idempotent requests only)
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 200;
/// Request timeout, rate limited, and the transient 5xx family
pub const DEFAULT_RETRY_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

// Logging
pub const DEFAULT_LOG_LEVEL: &str = "info";
