use std::time::Duration;

use keel_domain::{KeelError, RetrySettings};
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::errors::InfraError;

/// Transient-failure retry policy applied by [`HttpClient::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_backoff: Duration,
    retry_statuses: Vec<StatusCode>,
}

impl RetryPolicy {
    /// Build a policy from configuration, skipping status codes reqwest
    /// cannot represent.
    pub fn from_settings(settings: &RetrySettings) -> Self {
        let retry_statuses =
            settings.retry_statuses.iter().filter_map(|s| StatusCode::from_u16(*s).ok()).collect();

        Self { max_retries: settings.max_retries, base_backoff: settings.base_backoff(), retry_statuses }
    }

    /// Policy that never retries.
    pub fn disabled() -> Self {
        Self { max_retries: 0, base_backoff: Duration::ZERO, retry_statuses: Vec::new() }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether `status` is on the transient allow-list.
    pub fn is_transient_status(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Total attempts allowed for a request with this method.
    fn attempts_for(&self, method: &Method) -> u32 {
        if is_idempotent(method) {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    fn backoff_delay(&self, retry_number: u32) -> Duration {
        let shift = retry_number.saturating_sub(1).min(8);
        self.base_backoff.saturating_mul(1u32 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

/// Methods safe to replay without the caller's knowledge.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
    )
}

/// HTTP client with per-attempt timeout and transient retry.
///
/// Idempotent requests are retried on transport failures and on the
/// configured transient status codes; other methods get exactly one attempt.
#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    retry: RetryPolicy,
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self, KeelError> {
        Self::builder().build()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Create a request builder using the underlying reqwest client.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Execute the provided request builder with retry semantics.
    ///
    /// Returns the last response received, whatever its status; only
    /// transport failures become errors.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, KeelError> {
        let request = builder.build().map_err(|err| KeelError::from(InfraError::from(err)))?;
        let method = request.method().clone();
        let url = request.url().clone();
        let attempts = self.retry.attempts_for(&method);

        for attempt in 1..=attempts {
            let attempt_request = request.try_clone().ok_or_else(|| {
                KeelError::Internal(
                    "request body cannot be cloned; buffer the body to enable retries".into(),
                )
            })?;

            debug!(attempt, %method, %url, "sending HTTP request");

            match self.client.execute(attempt_request).await {
                Ok(response) => {
                    let status = response.status();
                    debug!(attempt, %method, %url, %status, "received HTTP response");

                    if attempt < attempts && self.retry.is_transient_status(status) {
                        warn!(attempt, %method, %url, %status, "transient status, retrying");
                        self.sleep_with_backoff(attempt).await;
                        continue;
                    }

                    return Ok(response);
                }
                Err(err) => {
                    debug!(attempt, %method, %url, error = %err, "HTTP request failed");

                    if attempt < attempts && should_retry_error(&err) {
                        warn!(attempt, %method, %url, error = %err, "transport failure, retrying");
                        self.sleep_with_backoff(attempt).await;
                        continue;
                    }

                    return Err(InfraError::from(err).into());
                }
            }
        }

        Err(KeelError::Internal("http client exhausted retries without producing a result".into()))
    }

    async fn sleep_with_backoff(&self, retry_number: u32) {
        let delay = self.retry.backoff_delay(retry_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    retry: RetryPolicy,
    user_agent: Option<String>,
    default_headers: Option<reqwest::header::HeaderMap>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            user_agent: None,
            default_headers: None,
        }
    }
}

impl HttpClientBuilder {
    /// Per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn default_headers(mut self, headers: reqwest::header::HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    pub fn build(self) -> Result<HttpClient, KeelError> {
        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder.build().map_err(|err| KeelError::from(InfraError::from(err)))?;

        Ok(HttpClient { client, retry: self.retry })
    }
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
