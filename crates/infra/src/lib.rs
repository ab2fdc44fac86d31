//! # Keel Infrastructure
//!
//! Impure side of the request core.
//!
//! This crate contains:
//! - HTTP transport with transient retry (`http`)
//! - The resilient API dispatcher, credentials and session store (`api`)
//! - Configuration loading from environment and files (`config`)
//! - Tracing subscriber setup (`observability`)
//!
//! ## Architecture
//! - Uses the circuit breaker from `keel-common`
//! - Converts third-party errors into `keel-domain` errors at the boundary
//! - Contains all I/O

pub mod api;
pub mod config;
pub mod errors;
pub mod http;
pub mod observability;

/// Serialises tests that read or write process environment variables
#[cfg(test)]
pub(crate) static ENV_LOCK: once_cell::sync::Lazy<std::sync::Mutex<()>> =
    once_cell::sync::Lazy::new(|| std::sync::Mutex::new(()));

// Re-export commonly used items
pub use api::{
    shared_circuit_breaker, Anonymous, ApiClient, ApiClientBuilder, ApiError, ApiErrorCategory,
    ApiRequest, ApiResponse, CredentialProvider, NormalizedError, SessionStore, TokenPair,
};
pub use errors::InfraError;
pub use http::{HttpClient, HttpClientBuilder, RetryPolicy};
pub use observability::init_tracing;
