//! API-specific error types
//!
//! Provides the caller-facing error taxonomy of the dispatcher with retry
//! metadata.

use std::time::Duration;

use keel_common::error::{ErrorClassification, ErrorSeverity};
use keel_common::resilience::CircuitBreakerStats;
use keel_domain::KeelError;
use thiserror::Error;

use super::normalize::NormalizedError;

/// Categories of API errors for branching and retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCategory {
    /// Circuit open, call rejected before reaching the network
    CircuitOpen,
    /// Session expired and could not be recovered
    Authentication,
    /// Rate limiting errors (429)
    RateLimit,
    /// Server errors (5xx)
    Server,
    /// Client errors (4xx except auth), caller-actionable
    Client,
    /// Network/connection errors and timeouts
    Network,
    /// Malformed request or response payloads
    Payload,
    /// Configuration errors
    Config,
}

/// API operation errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Circuit breaker open after {} consecutive failures", .stats.failure_count)]
    CircuitBreakerOpen { stats: CircuitBreakerStats, retry_after: Option<Duration> },

    #[error("Authentication failed: {0}")]
    Authentication(NormalizedError),

    #[error("Upstream error: {0}")]
    Upstream(NormalizedError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// Map a transport-layer failure, attaching the per-attempt timeout that
    /// elapsed when the cause was a timeout
    pub fn from_transport(err: KeelError, timeout: Duration) -> Self {
        match err {
            KeelError::Timeout(_) => Self::Timeout(timeout),
            KeelError::Network(msg) => Self::Network(msg),
            KeelError::Config(msg) => Self::Config(msg),
            KeelError::InvalidInput(msg) | KeelError::Internal(msg) => Self::InvalidRequest(msg),
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ApiErrorCategory {
        match self {
            Self::CircuitBreakerOpen { .. } => ApiErrorCategory::CircuitOpen,
            Self::Authentication(_) => ApiErrorCategory::Authentication,
            Self::Upstream(err) => match err.http_status {
                Some(429) => ApiErrorCategory::RateLimit,
                Some(status) if status >= 500 => ApiErrorCategory::Server,
                _ => ApiErrorCategory::Client,
            },
            Self::Network(_) | Self::Timeout(_) => ApiErrorCategory::Network,
            Self::InvalidRequest(_) | Self::Decode(_) => ApiErrorCategory::Payload,
            Self::Config(_) => ApiErrorCategory::Config,
        }
    }

    /// HTTP status of the failed exchange, if a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication(err) | Self::Upstream(err) => err.http_status,
            _ => None,
        }
    }

    /// Machine-readable code reported by the upstream
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Authentication(err) | Self::Upstream(err) => err.error_code.as_deref(),
            _ => None,
        }
    }

    /// Normalized upstream error, for the variants that carry one
    pub fn normalized(&self) -> Option<&NormalizedError> {
        match self {
            Self::Authentication(err) | Self::Upstream(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the caller should treat this as "service temporarily unavailable"
    pub fn is_unavailable(&self) -> bool {
        matches!(self.category(), ApiErrorCategory::CircuitOpen | ApiErrorCategory::Network)
    }
}

impl ErrorClassification for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream(err) => matches!(err.http_status, Some(408 | 429) | Some(500..=599)),
            _ => matches!(
                self.category(),
                ApiErrorCategory::CircuitOpen | ApiErrorCategory::Network
            ),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ApiErrorCategory::Client | ApiErrorCategory::Payload => ErrorSeverity::Info,
            ApiErrorCategory::CircuitOpen
            | ApiErrorCategory::RateLimit
            | ApiErrorCategory::Server => ErrorSeverity::Warning,
            ApiErrorCategory::Authentication
            | ApiErrorCategory::Network
            | ApiErrorCategory::Config => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitBreakerOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
