//! Credential provider seam
//!
//! The dispatcher only ever reads the current access token and asks for a
//! refresh. Writing credentials belongs to the provider.

use async_trait::async_trait;

/// Source of bearer credentials for the dispatcher
///
/// This trait allows dependency injection and testing with mock providers.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current access token, if a session exists
    async fn access_token(&self) -> Option<String>;

    /// Renew the session
    ///
    /// Returns `true` once a new access token is installed and `false` when
    /// the session cannot be renewed (e.g. the refresh token expired).
    async fn refresh(&self) -> bool;

    /// Tear the session down
    async fn logout(&self);
}

/// Provider without a session; requests go out without a bearer header
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl CredentialProvider for Anonymous {
    async fn access_token(&self) -> Option<String> {
        None
    }

    async fn refresh(&self) -> bool {
        false
    }

    async fn logout(&self) {}
}
