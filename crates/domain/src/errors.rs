//! Error types used throughout the workspace

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain-level error for Keel
///
/// Infrastructure code converts third-party errors (reqwest, serde, I/O)
/// into this type at the boundary; the API layer maps it onto its own
/// caller-facing taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum KeelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeelError {
    /// Whether this error happened before any response was received
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// Result type alias for Keel operations
pub type Result<T> = std::result::Result<T, KeelError>;
