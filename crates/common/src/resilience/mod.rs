//! Resilience patterns for fault tolerance
//!
//! This module provides the **circuit breaker** used by the request core to
//! stop sending traffic to an upstream that keeps failing, together with the
//! [`Clock`] abstraction that makes its cool-down window testable.
//!
//! Retry of transient failures is a transport concern and lives next to the
//! HTTP client in `keel-infra`; the breaker only sees the final outcome of
//! each call.

pub mod circuit_breaker;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerStats, CircuitState, Clock, ConfigError, ConfigResult, MockClock, SystemClock,
};
