//! Request dispatcher with circuit breaker, retry and session recovery
//!
//! Every authenticated outbound call goes through [`ApiClient::send`]:
//!
//! 1. admission check against the circuit breaker (fast-fail when open)
//! 2. bearer token from the [`CredentialProvider`]
//! 3. transport with transient retry for idempotent methods
//! 4. on 401, one shared session refresh and one replay of the request
//! 5. breaker bookkeeping and error normalization
//!
//! 4xx answers other than 401 count as breaker successes: the upstream is
//! healthy, the request was wrong. 5xx answers, network errors and timeouts
//! count as breaker failures. A 401 is never a breaker failure.
//!
//! Admission hands out a [`CallPermit`] that is settled exactly once per call.
//! Calls that end without an upstream verdict (the caller dropped the future,
//! the request could not be built, the session could not be renewed) release
//! their slot without recording an outcome.

use std::sync::Arc;
use std::time::Duration;

use keel_common::resilience::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats,
};
use keel_domain::constants::HEALTH_CHECK_TIMEOUT_MS;
use keel_domain::{ApiConfig, CircuitBreakerSettings, Config, RetrySettings};
use once_cell::sync::OnceCell;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::auth::{Anonymous, CredentialProvider};
use super::errors::ApiError;
use super::normalize::NormalizedError;
use super::refresh::RefreshCoordinator;
use super::request::{endpoint_url, ApiRequest, ApiResponse};
use crate::errors::InfraError;
use crate::http::{HttpClient, RetryPolicy};

static SHARED_BREAKER: OnceCell<Arc<CircuitBreaker>> = OnceCell::new();

/// Process-wide circuit breaker for the upstream API
///
/// Built from `settings` on first use; later calls return the same handle
/// and ignore their argument.
///
/// # Errors
///
/// Returns `ApiError::Config` if the first caller passes invalid settings.
pub fn shared_circuit_breaker(
    settings: &CircuitBreakerSettings,
) -> Result<Arc<CircuitBreaker>, ApiError> {
    SHARED_BREAKER
        .get_or_try_init(|| {
            let config = breaker_config(settings)?;
            let breaker = CircuitBreaker::new(config)
                .map_err(|e| ApiError::Config(format!("Failed to create circuit breaker: {e}")))?;
            info!(
                failure_threshold = settings.failure_threshold,
                reset_timeout_ms = settings.reset_timeout_ms,
                "Created shared circuit breaker"
            );
            Ok(Arc::new(breaker))
        })
        .cloned()
}

fn breaker_config(settings: &CircuitBreakerSettings) -> Result<CircuitBreakerConfig, ApiError> {
    CircuitBreakerConfig::builder()
        .failure_threshold(settings.failure_threshold)
        .reset_timeout(settings.reset_timeout())
        .half_open_max_calls(settings.half_open_max_calls)
        .build()
        .map_err(|e| ApiError::Config(format!("Invalid circuit breaker settings: {e}")))
}

/// API client with resilience patterns
#[derive(Clone)]
pub struct ApiClient {
    http: HttpClient,
    credentials: Arc<dyn CredentialProvider>,
    circuit_breaker: Arc<CircuitBreaker>,
    refresh: Arc<RefreshCoordinator>,
    base_url: String,
    timeout: Duration,
}

impl ApiClient {
    /// Create a builder for fluent configuration
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Production wiring: validated config, process-wide breaker
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Config` if the configuration is invalid or the
    /// HTTP client cannot be built.
    pub fn from_config(
        config: &Config,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ApiError> {
        config.validate().map_err(|e| ApiError::Config(e.to_string()))?;

        Self::builder()
            .config(config.api.clone())
            .retry(config.retry.clone())
            .credentials(credentials)
            .circuit_breaker(shared_circuit_breaker(&config.circuit_breaker)?)
            .build()
    }

    /// Snapshot of the breaker guarding this client
    pub fn circuit_breaker_stats(&self) -> CircuitBreakerStats {
        self.circuit_breaker.stats()
    }

    /// Force the breaker closed (operator recovery)
    pub fn reset_circuit_breaker(&self) {
        self.circuit_breaker.reset();
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send an authenticated request
    ///
    /// # Errors
    ///
    /// - `CircuitBreakerOpen` when admission is denied (no network I/O)
    /// - `Authentication` when the session is expired and cannot be renewed
    /// - `Upstream` for any other non-2xx response
    /// - `Network` / `Timeout` for transport failures after retries
    #[instrument(skip(self, request), fields(method = %request.method(), path = %request.path()))]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = endpoint_url(&self.base_url, request.path())?;
        let permit = self.admit()?;

        let token = self.credentials.access_token().await;
        let response = match self.dispatch(&request, &url, token.as_deref()).await {
            Ok(response) => response,
            Err(e) => return Err(transport_failed(permit, e)),
        };

        if response.status() == StatusCode::UNAUTHORIZED {
            return self.recover_session(permit, &request, &url, token, response).await;
        }

        settle(permit, response)
    }

    /// Send a request without credentials and without the 401 interceptor
    ///
    /// Still subject to breaker admission and bookkeeping. A 401 surfaces
    /// directly as `ApiError::Authentication`.
    ///
    /// # Errors
    ///
    /// Same as [`ApiClient::send`], without the refresh path.
    #[instrument(skip(self, request), fields(method = %request.method(), path = %request.path()))]
    pub async fn send_unauthenticated(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = endpoint_url(&self.base_url, request.path())?;
        let permit = self.admit()?;

        match self.dispatch(&request, &url, None).await {
            Ok(response) => settle(permit, response),
            Err(e) => Err(transport_failed(permit, e)),
        }
    }

    /// Send a request and decode the JSON payload
    ///
    /// # Errors
    ///
    /// Everything [`ApiClient::send`] returns, plus `ApiError::Decode`.
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        self.send(request).await?.json()
    }

    /// Execute a GET request
    ///
    /// # Errors
    ///
    /// Returns error if request fails or response cannot be deserialized
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(ApiRequest::get(path)).await
    }

    /// Execute a POST request with a JSON body
    ///
    /// # Errors
    ///
    /// Returns error if request fails or response cannot be deserialized
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(ApiRequest::post(path).json(body)?).await
    }

    /// Execute a PUT request with a JSON body
    ///
    /// # Errors
    ///
    /// Returns error if request fails or response cannot be deserialized
    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(ApiRequest::put(path).json(body)?).await
    }

    /// Execute a PATCH request with a JSON body
    ///
    /// # Errors
    ///
    /// Returns error if request fails or response cannot be deserialized
    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(ApiRequest::patch(path).json(body)?).await
    }

    /// Execute a DELETE request
    ///
    /// # Errors
    ///
    /// Returns error if request fails or response cannot be deserialized
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(ApiRequest::delete(path)).await
    }

    /// Health check for API
    ///
    /// Unauthenticated `GET /health` with a short timeout. Does not consult
    /// or update the circuit breaker.
    ///
    /// # Returns
    ///
    /// `true` if the API answered 2xx, `false` for any other status
    ///
    /// # Errors
    ///
    /// Returns error if the API could not be reached
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<bool, ApiError> {
        let url = endpoint_url(&self.base_url, "/health")?;
        let timeout = Duration::from_millis(HEALTH_CHECK_TIMEOUT_MS);

        debug!(url = %url, "Health check");

        let request = self.http.request(Method::GET, url).timeout(timeout);
        match self.http.send(request).await {
            Ok(resp) if resp.status().is_success() => {
                info!("API is healthy");
                Ok(true)
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "API returned non-success status");
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "Health check failed");
                Err(ApiError::from_transport(e, timeout))
            }
        }
    }

    fn admit(&self) -> Result<CallPermit, ApiError> {
        if let Some(permit) = self.circuit_breaker.try_acquire() {
            return Ok(permit);
        }

        let stats = self.circuit_breaker.stats();
        warn!(
            state = %stats.state,
            failure_count = stats.failure_count,
            "Circuit breaker open, rejecting request"
        );
        Err(ApiError::CircuitBreakerOpen {
            stats,
            retry_after: self.circuit_breaker.remaining_open_time(),
        })
    }

    /// Single 401 recovery: one (shared) refresh, one replay
    async fn recover_session(
        &self,
        permit: CallPermit,
        request: &ApiRequest,
        url: &Url,
        used_token: Option<String>,
        unauthorized: ApiResponse,
    ) -> Result<ApiResponse, ApiError> {
        let current = self.credentials.access_token().await;
        let renewed = if current.is_some() && current != used_token {
            debug!("Session already renewed by a concurrent request");
            true
        } else {
            self.refresh.refresh(self.credentials.clone()).await
        };

        if !renewed {
            warn!("Session refresh failed, clearing session");
            return Err(self.end_session(permit, &unauthorized).await);
        }

        let token = self.credentials.access_token().await;
        let replayed = match self.dispatch(request, url, token.as_deref()).await {
            Ok(response) => response,
            Err(e) => return Err(transport_failed(permit, e)),
        };

        if replayed.status() == StatusCode::UNAUTHORIZED {
            warn!("Request rejected again after session refresh, clearing session");
            return Err(self.end_session(permit, &replayed).await);
        }

        debug!("Request succeeded after session refresh");
        settle(permit, replayed)
    }

    /// Terminal authentication failure
    ///
    /// An unrenewable session says nothing about upstream health, so neither
    /// outcome is recorded: the permit is released, which hands a half-open
    /// probe slot back instead of closing or reopening the circuit.
    async fn end_session(&self, permit: CallPermit, unauthorized: &ApiResponse) -> ApiError {
        permit.release();
        self.credentials.logout().await;
        ApiError::Authentication(NormalizedError::from_response(
            unauthorized.status().as_u16(),
            unauthorized.body(),
        ))
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        url: &Url,
        token: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let mut builder = self.http.request(request.method().clone(), url.clone());

        if !request.query_pairs().is_empty() {
            builder = builder.query(request.query_pairs());
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.json_body() {
            builder = builder.json(body);
        }

        let response =
            self.http.send(builder).await.map_err(|e| ApiError::from_transport(e, self.timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::from_transport(InfraError::from(e).into(), self.timeout))?;

        Ok(ApiResponse::new(status, headers, body.to_vec()))
    }
}

/// Record the breaker outcome for a received response
fn settle(permit: CallPermit, response: ApiResponse) -> Result<ApiResponse, ApiError> {
    let status = response.status();

    if status.is_success() {
        permit.record_success();
        return Ok(response);
    }

    let normalized = NormalizedError::from_response(status.as_u16(), response.body());

    if status.is_server_error() {
        permit.record_failure();
        warn!(%status, message = %normalized.message, "Upstream server error");
        return Err(ApiError::Upstream(normalized));
    }

    permit.record_success();
    debug!(%status, message = %normalized.message, "Upstream rejected request");

    if status == StatusCode::UNAUTHORIZED {
        Err(ApiError::Authentication(normalized))
    } else {
        Err(ApiError::Upstream(normalized))
    }
}

/// Settle a call that produced no response
///
/// Network errors and timeouts are breaker failures. Errors raised while
/// building the request never reached the upstream and only release the slot.
fn transport_failed(permit: CallPermit, error: ApiError) -> ApiError {
    match error {
        ApiError::Network(_) | ApiError::Timeout(_) => {
            permit.record_failure();
            warn!(error = %error, "Request failed before a response was received");
        }
        _ => {
            permit.release();
            warn!(error = %error, "Request could not be sent");
        }
    }
    error
}

/// Builder for API client
#[derive(Default)]
pub struct ApiClientBuilder {
    config: Option<ApiConfig>,
    retry: Option<RetrySettings>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    http_client: Option<HttpClient>,
}

impl ApiClientBuilder {
    /// Set the API configuration
    pub fn config(mut self, config: ApiConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the transient retry policy (ignored when an HTTP client is supplied)
    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the credential provider; defaults to [`Anonymous`]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Share an existing breaker; defaults to a fresh one with default settings
    pub fn circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    /// Use a pre-built transport
    pub fn http_client(mut self, http_client: HttpClient) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Build the API client
    ///
    /// # Errors
    ///
    /// Returns error if the API configuration is missing or client creation fails
    pub fn build(self) -> Result<ApiClient, ApiError> {
        let config =
            self.config.ok_or_else(|| ApiError::Config("API configuration not set".to_string()))?;
        let timeout = config.timeout();

        // Fail on a malformed base URL here rather than on first use.
        endpoint_url(&config.base_url, "/")?;

        let http = match self.http_client {
            Some(http) => http,
            None => {
                let retry = RetryPolicy::from_settings(&self.retry.unwrap_or_default());
                let mut builder = HttpClient::builder().timeout(timeout).retry_policy(retry);
                if let Some(agent) = &config.user_agent {
                    builder = builder.user_agent(agent.clone());
                }
                builder
                    .build()
                    .map_err(|e| ApiError::Config(format!("Failed to build HttpClient: {e}")))?
            }
        };

        let circuit_breaker = match self.circuit_breaker {
            Some(breaker) => breaker,
            None => Arc::new(CircuitBreaker::default()),
        };

        Ok(ApiClient {
            http,
            credentials: self.credentials.unwrap_or_else(|| Arc::new(Anonymous)),
            circuit_breaker,
            refresh: Arc::new(RefreshCoordinator::new()),
            base_url: config.base_url,
            timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use keel_common::resilience::CircuitState;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[derive(Clone)]
    struct MockAuthProvider {
        token: String,
        refreshes: Arc<AtomicUsize>,
    }

    impl MockAuthProvider {
        fn new(token: &str) -> Self {
            Self { token: token.to_string(), refreshes: Arc::new(AtomicUsize::new(0)) }
        }
    }

    #[async_trait]
    impl CredentialProvider for MockAuthProvider {
        async fn access_token(&self) -> Option<String> {
            Some(self.token.clone())
        }

        async fn refresh(&self) -> bool {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            false
        }

        async fn logout(&self) {}
    }

    #[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
    struct TestResponse {
        message: String,
    }

    #[derive(Debug, serde::Serialize)]
    struct TestRequest {
        data: String,
    }

    fn fast_retry() -> RetrySettings {
        RetrySettings { base_backoff_ms: 1, ..RetrySettings::default() }
    }

    fn client_for(server: &MockServer, auth: MockAuthProvider) -> ApiClient {
        ApiClient::builder()
            .config(ApiConfig::new(server.uri()))
            .retry(fast_retry())
            .credentials(Arc::new(auth))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server, MockAuthProvider::new("test-token"));

        let result = client.health_check().await;
        assert!(result.is_ok());
        assert!(result.unwrap());
    }

    #[tokio::test]
    async fn test_health_check_failure_does_not_touch_breaker() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server, MockAuthProvider::new("test-token"));

        let result = client.health_check().await;
        assert!(!result.unwrap()); // Unhealthy but no error
        assert_eq!(client.circuit_breaker_stats().failure_count, 0);
    }

    #[tokio::test]
    async fn test_builder_defaults_to_anonymous() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/public"))
            .respond_with(ResponseTemplate::new(200).set_body_json(TestResponse {
                message: "hi".into(),
            }))
            .mount(&mock_server)
            .await;

        let client =
            ApiClient::builder().config(ApiConfig::new(mock_server.uri())).build().unwrap();
        let result: TestResponse = client.get("/public").await.unwrap();
        assert_eq!(result.message, "hi");

        let received = mock_server.received_requests().await.unwrap();
        assert!(received[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_builder_missing_config() {
        let result = ApiClient::builder().build();
        assert!(matches!(result, Err(ApiError::Config(_))));

        let result = ApiClient::builder().config(ApiConfig::new("not a url")).build();
        assert!(matches!(result, Err(ApiError::Config(_))));
    }

    #[tokio::test]
    async fn test_builder_keeps_base_url_and_timeout() {
        let config = ApiConfig { timeout_ms: 1_500, ..ApiConfig::new("http://localhost:9000") };
        let client = ApiClient::builder().config(config).build().unwrap();

        assert_eq!(client.base_url(), "http://localhost:9000");
        assert_eq!(client.timeout, Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn test_get_with_json_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/test"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(TestResponse { message: "success".to_string() }),
            )
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server, MockAuthProvider::new("test-token"));

        let result: Result<TestResponse, ApiError> = client.get("/test").await;
        assert_eq!(result.unwrap().message, "success");
        assert_eq!(client.circuit_breaker_stats().success_count, 1);
    }

    #[tokio::test]
    async fn test_query_parameters_are_sent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/reports"))
            .and(query_param("page", "2"))
            .and(query_param("status", "active"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server, MockAuthProvider::new("test-token"));

        let request = ApiRequest::get("/reports").query("page", 2).query("status", "active");
        let rows: Vec<serde_json::Value> = client.execute(request).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_get_with_204_no_content() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/no-content"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server, MockAuthProvider::new("test-token"));

        // () should deserialize from null successfully
        let result: Result<(), ApiError> = client.get("/no-content").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_get_with_205_reset_content() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/reset"))
            .respond_with(ResponseTemplate::new(205))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server, MockAuthProvider::new("test-token"));

        let result: Result<(), ApiError> = client.get("/reset").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_post_with_json_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/create"))
            .and(body_json(serde_json::json!({"data": "test"})))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(TestResponse { message: "created".to_string() }),
            )
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server, MockAuthProvider::new("test-token"));

        let request = TestRequest { data: "test".to_string() };
        let result: Result<TestResponse, ApiError> = client.post("/create", &request).await;
        assert_eq!(result.unwrap().message, "created");
    }

    #[tokio::test]
    async fn test_put_patch_delete_round_trip() {
        let mock_server = MockServer::start().await;

        for verb in ["PUT", "PATCH", "DELETE"] {
            Mock::given(method(verb))
                .and(path("/items/1"))
                .respond_with(ResponseTemplate::new(204))
                .expect(1)
                .mount(&mock_server)
                .await;
        }

        let client = client_for(&mock_server, MockAuthProvider::new("test-token"));
        let body = TestRequest { data: "x".into() };

        let _: () = client.put("/items/1", &body).await.unwrap();
        let _: () = client.patch("/items/1", &body).await.unwrap();
        let _: () = client.delete("/items/1").await.unwrap();
    }

    #[tokio::test]
    async fn test_404_is_normalized_and_counts_as_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/notfound"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"detail": "Account not found", "error_code": "NOT_FOUND"})),
            )
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server, MockAuthProvider::new("test-token"));

        let err = client.get::<TestResponse>("/notfound").await.unwrap_err();
        match &err {
            ApiError::Upstream(normalized) => {
                assert_eq!(normalized.message, "Account not found");
                assert_eq!(normalized.http_status, Some(404));
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
        assert_eq!(err.error_code(), Some("NOT_FOUND"));

        let stats = client.circuit_breaker_stats();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 1);
    }

    #[tokio::test]
    async fn test_500_after_retries_counts_as_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/error"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal server error"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server, MockAuthProvider::new("test-token"));

        let err = client.get::<TestResponse>("/error").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.to_string(), "Upstream error: Request failed with status 500");
        assert_eq!(client.circuit_breaker_stats().failure_count, 1);
    }

    #[tokio::test]
    async fn test_post_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server, MockAuthProvider::new("test-token"));

        let err = client
            .post::<_, TestResponse>("/submit", &TestRequest { data: "x".into() })
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn test_unauthenticated_send_skips_credentials_and_refresh() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;

        let auth = MockAuthProvider::new("test-token");
        let refreshes = auth.refreshes.clone();
        let client = client_for(&mock_server, auth);

        let err = client.send_unauthenticated(ApiRequest::get("/me")).await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);

        let received = mock_server.received_requests().await.unwrap();
        assert!(received[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast_and_reset_recovers() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(TestResponse {
                message: "ok".into(),
            }))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server, MockAuthProvider::new("test-token"));
        for _ in 0..5 {
            client.circuit_breaker().record_failure();
        }

        let err = client.get::<TestResponse>("/data").await.unwrap_err();
        match err {
            ApiError::CircuitBreakerOpen { stats, retry_after } => {
                assert_eq!(stats.state, CircuitState::Open);
                assert_eq!(stats.failure_count, 5);
                assert!(retry_after.is_some());
            }
            other => panic!("expected open circuit, got {other:?}"),
        }

        client.reset_circuit_breaker();
        let result: TestResponse = client.get("/data").await.unwrap();
        assert_eq!(result.message, "ok");
    }

    #[test]
    fn test_shared_breaker_is_a_singleton() {
        let first = shared_circuit_breaker(&CircuitBreakerSettings::default()).unwrap();
        let second = shared_circuit_breaker(&CircuitBreakerSettings {
            failure_threshold: 99,
            ..CircuitBreakerSettings::default()
        })
        .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }
}
