//! In-memory session store
//!
//! Holds the access/refresh token pair and renews it against the refresh
//! endpoint. Refresh calls go straight to the transport, never through the
//! dispatcher, so a 401 from the refresh endpoint cannot recurse into another
//! refresh.

use async_trait::async_trait;
use keel_domain::ApiConfig;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use super::auth::CredentialProvider;
use super::errors::ApiError;
use super::request::endpoint_url;
use crate::http::{HttpClient, RetryPolicy};

/// Access token plus the refresh token that renews it
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self { access_token: access_token.into(), refresh_token }
    }
}

// Tokens are secrets; keep them out of logs.
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// [`CredentialProvider`] backed by an in-memory token pair
pub struct SessionStore {
    http: HttpClient,
    refresh_url: Url,
    tokens: RwLock<Option<TokenPair>>,
}

impl SessionStore {
    /// Create an empty store that refreshes against `config.refresh_path`
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Config` if the refresh URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let mut builder =
            HttpClient::builder().timeout(config.timeout()).retry_policy(RetryPolicy::disabled());
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let http = builder
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to build HttpClient: {e}")))?;

        let refresh_url = endpoint_url(&config.base_url, &config.refresh_path)?;
        Ok(Self::with_http_client(http, refresh_url))
    }

    pub fn with_http_client(http: HttpClient, refresh_url: Url) -> Self {
        Self { http, refresh_url, tokens: RwLock::new(None) }
    }

    /// Install tokens obtained from a login flow
    pub async fn install(&self, tokens: TokenPair) {
        *self.tokens.write().await = Some(tokens);
        info!("Session installed");
    }

    pub async fn is_authenticated(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    /// Current token pair, if any
    pub async fn tokens(&self) -> Option<TokenPair> {
        self.tokens.read().await.clone()
    }

    async fn request_new_tokens(&self, refresh_token: &str) -> Option<TokenPair> {
        let request = self
            .http
            .request(Method::POST, self.refresh_url.clone())
            .json(&RefreshRequest { refresh_token });

        let response = match self.http.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Session refresh request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Session refresh rejected");
            return None;
        }

        match response.json::<TokenPair>().await {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                warn!(error = %e, "Session refresh returned an unreadable body");
                None
            }
        }
    }
}

#[async_trait]
impl CredentialProvider for SessionStore {
    async fn access_token(&self) -> Option<String> {
        self.tokens.read().await.as_ref().map(|tokens| tokens.access_token.clone())
    }

    async fn refresh(&self) -> bool {
        let Some(refresh_token) =
            self.tokens.read().await.as_ref().and_then(|tokens| tokens.refresh_token.clone())
        else {
            debug!("No refresh token available");
            return false;
        };

        let Some(renewed) = self.request_new_tokens(&refresh_token).await else {
            return false;
        };

        let mut tokens = self.tokens.write().await;
        // A logout or another refresh landed while the request was in flight.
        let still_current = tokens
            .as_ref()
            .is_some_and(|current| current.refresh_token.as_deref() == Some(refresh_token.as_str()));
        if !still_current {
            debug!("Session changed during refresh, discarding renewed tokens");
            return tokens.is_some();
        }

        *tokens = Some(TokenPair {
            access_token: renewed.access_token,
            refresh_token: renewed.refresh_token.or(Some(refresh_token)),
        });
        info!("Session refreshed");
        true
    }

    async fn logout(&self) {
        *self.tokens.write().await = None;
        info!("Session cleared");
    }
}
