//! Bearer tokens for the audit API.
//!
//! A static token is used as is. Client credentials are exchanged at
//! `{origin}/oauth/token` and the result is cached until shortly before it
//! expires, so every API call can simply ask for [`TokenProvider::bearer`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use evidence_engine::{retry_with_backoff, IsRetryable, RetryPolicy, TtlCache};
use export_logging::{export_debug, export_info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;
/// Tokens are dropped from the cache this long before the server expires them.
const EXPIRY_MARGIN_SECS: u64 = 60;

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Bearer(String),
    ClientCredentials {
        client_id: String,
        client_secret: String,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Credentials::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("OAuth token request failed: {status} {message} (host: {origin})")]
    Rejected {
        status: u16,
        message: String,
        origin: String,
    },
    #[error("OAuth token request failed: {0}")]
    Network(String),
    #[error("OAuth token response was not understood: {0}")]
    Decode(String),
}

impl IsRetryable for AuthError {
    fn is_retryable(&self) -> bool {
        match self {
            AuthError::Rejected { status, .. } => *status == 429 || (500..600).contains(status),
            AuthError::Network(_) => true,
            AuthError::Decode(_) => false,
        }
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    scope: &'a str,
    grant_type: &'static str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TokenErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

pub struct TokenProvider {
    http: reqwest::Client,
    origin: String,
    scope: String,
    credentials: Credentials,
    cache: Arc<TtlCache<String, String>>,
    retry: RetryPolicy,
    /// Serialises exchanges so concurrent callers share one token request.
    exchange: tokio::sync::Mutex<()>,
}

impl TokenProvider {
    pub fn new(
        http: reqwest::Client,
        origin: impl Into<String>,
        scope: impl Into<String>,
        credentials: Credentials,
        cache: Arc<TtlCache<String, String>>,
    ) -> Self {
        Self {
            http,
            origin: origin.into(),
            scope: scope.into(),
            credentials,
            cache,
            retry: RetryPolicy::default(),
            exchange: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// A token valid for at least another minute.
    pub async fn bearer(&self) -> Result<String, AuthError> {
        let (client_id, client_secret) = match &self.credentials {
            Credentials::Bearer(token) => return Ok(token.clone()),
            Credentials::ClientCredentials {
                client_id,
                client_secret,
            } => (client_id.as_str(), client_secret.as_str()),
        };

        let key = self.cache_key(client_id);
        if let Some(token) = self.cache.get(&key) {
            export_debug!("OAuth token cache hit for client {}", client_id);
            return Ok(token);
        }

        let _guard = self.exchange.lock().await;
        if let Some(token) = self.cache.get(&key) {
            return Ok(token);
        }
        export_debug!("OAuth token cache miss for client {}", client_id);

        let response = retry_with_backoff(&self.retry, |_| {
            self.request_token(client_id, client_secret)
        })
        .await?;

        let ttl_secs = response
            .expires_in
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS)
            .saturating_sub(EXPIRY_MARGIN_SECS);
        if ttl_secs > 0 {
            self.cache
                .insert(key, response.access_token.clone(), Duration::from_secs(ttl_secs));
        }
        export_info!("Obtained OAuth access token from {}", self.origin);
        Ok(response.access_token)
    }

    /// Forget the cached token, e.g. after the API rejected it.
    pub fn invalidate(&self) {
        if let Credentials::ClientCredentials { client_id, .. } = &self.credentials {
            self.cache.remove(&self.cache_key(client_id));
        }
    }

    fn cache_key(&self, client_id: &str) -> String {
        format!("{}|{}|{}", self.origin, client_id, self.scope)
    }

    async fn request_token(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(format!("{}/oauth/token", self.origin))
            .json(&TokenRequest {
                client_id,
                client_secret,
                scope: &self.scope,
                grant_type: "client_credentials",
            })
            .send()
            .await
            .map_err(|err| AuthError::Network(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<TokenResponse>()
                .await
                .map_err(|err| AuthError::Decode(err.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<TokenErrorBody>(&text)
            .ok()
            .and_then(|body| body.error_description.or(body.error))
            .unwrap_or(text);
        let reason = status.canonical_reason().unwrap_or("");
        let message = if detail.trim().is_empty() {
            reason.to_string()
        } else {
            format!("{reason} - {}", detail.trim())
        };
        Err(AuthError::Rejected {
            status: status.as_u16(),
            message,
            origin: self.origin.clone(),
        })
    }
}
