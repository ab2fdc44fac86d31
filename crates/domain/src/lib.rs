//! # Keel Domain
//!
//! Pure data types for the Keel request core.
//!
//! This crate contains:
//! - Configuration structures
//! - Domain error types and Result definitions
//! - Default constants
//!
//! ## Architecture
//! - No dependencies on other Keel crates
//! - Only external dependencies allowed
//! - No I/O

pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
