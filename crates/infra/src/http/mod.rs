//! HTTP transport with per-attempt timeout and transient retry

pub mod client;

pub use client::{is_idempotent, HttpClient, HttpClientBuilder, RetryPolicy};
