//! Resilient API client for the upstream service
//!
//! # Architecture
//!
//! - [`ApiClient`] is the single choke point for outbound calls
//! - Circuit breaker from `keel-common` guards the upstream
//! - Transport retry lives in [`crate::http`]; only idempotent methods retry
//! - Expired sessions are renewed once per call through a shared refresh
//! - Failed exchanges are normalized into [`NormalizedError`]

pub mod auth;
pub mod client;
pub mod errors;
pub mod normalize;
pub mod refresh;
pub mod request;
pub mod session;

pub use auth::{Anonymous, CredentialProvider};
pub use client::{shared_circuit_breaker, ApiClient, ApiClientBuilder};
pub use errors::{ApiError, ApiErrorCategory};
pub use normalize::NormalizedError;
pub use refresh::RefreshCoordinator;
pub use request::{ApiRequest, ApiResponse};
pub use session::{SessionStore, TokenPair};
