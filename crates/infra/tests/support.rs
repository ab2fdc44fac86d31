use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use keel_domain::{ApiConfig, RetrySettings};
use keel_infra::CredentialProvider;
use wiremock::MockServer;

/// Scripted credential provider that counts refresh and logout calls.
pub struct MockCredentials {
    token: Mutex<Option<String>>,
    refreshed_token: Option<String>,
    refresh_outcome: bool,
    refresh_delay: Duration,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl MockCredentials {
    /// Provider holding `token` whose refresh fails.
    pub fn new(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
            refreshed_token: None,
            refresh_outcome: false,
            refresh_delay: Duration::ZERO,
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        }
    }

    /// Refresh succeeds and installs `new_token`.
    pub fn refreshing_to(mut self, new_token: &str) -> Self {
        self.refreshed_token = Some(new_token.to_string());
        self.refresh_outcome = true;
        self
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn current_token(&self) -> Option<String> {
        self.token.lock().expect("token mutex poisoned").clone()
    }
}

#[async_trait]
impl CredentialProvider for MockCredentials {
    async fn access_token(&self) -> Option<String> {
        self.current_token()
    }

    async fn refresh(&self) -> bool {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        if self.refresh_outcome {
            *self.token.lock().expect("token mutex poisoned") = self.refreshed_token.clone();
        }
        self.refresh_outcome
    }

    async fn logout(&self) {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        *self.token.lock().expect("token mutex poisoned") = None;
    }
}

/// API settings pointing at the mock server.
pub fn api_config(server: &MockServer) -> ApiConfig {
    ApiConfig::new(server.uri())
}

/// Retry policy with near-zero backoff so tests stay fast.
pub fn fast_retry(max_retries: u32) -> RetrySettings {
    RetrySettings { max_retries, base_backoff_ms: 1, ..RetrySettings::default() }
}
