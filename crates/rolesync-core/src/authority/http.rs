//! HTTP implementation of the authority sync client.
//!
//! Speaks JSON over HTTPS to the authority's grant endpoint. Every response
//! is folded into the two-way transient/permanent classification: transport
//! failures, timeouts, rate limiting, and 5xx are transient; other 4xx are
//! permanent rejections. The injected [`RateLimiter`] is consulted before
//! any request leaves the process, and its verdict surfaces as a transient
//! error carrying the wait hint.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use super::{AuthorityError, AuthoritySyncClient, RateLimiter};

/// Maximum length for configuration string fields.
const MAX_CONFIG_STRING_LENGTH: usize = 2048;

/// Configuration for the HTTP authority client.
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// Authority API base URL (e.g., "<https://authority.example.com/api>").
    pub base_url: String,

    /// Bearer token for authentication.
    pub api_token: Option<String>,
}

impl AuthorityConfig {
    /// Creates a configuration with the required base URL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Permanent`] if the URL is empty or exceeds
    /// length limits.
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthorityError> {
        let base_url = base_url.into();
        Self::validate_field("base_url", &base_url)?;
        Ok(Self {
            base_url,
            api_token: None,
        })
    }

    /// Sets the bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Permanent`] if the token exceeds length
    /// limits.
    pub fn with_api_token(mut self, token: impl Into<String>) -> Result<Self, AuthorityError> {
        let token = token.into();
        Self::validate_field("api_token", &token)?;
        self.api_token = Some(token);
        Ok(self)
    }

    fn validate_field(field_name: &str, value: &str) -> Result<(), AuthorityError> {
        if value.is_empty() {
            return Err(AuthorityError::permanent(
                format!("{field_name} cannot be empty"),
                None,
            ));
        }
        if value.len() > MAX_CONFIG_STRING_LENGTH {
            return Err(AuthorityError::permanent(
                format!(
                    "{field_name} exceeds maximum length ({} > {MAX_CONFIG_STRING_LENGTH})",
                    value.len()
                ),
                None,
            ));
        }
        Ok(())
    }
}

/// HTTP client for the authority's grant/revoke endpoints.
///
/// One attempt per call; retry lives in the engine's [`super::with_retry`]
/// wrapper so every implementation of the trait behaves identically under
/// failure.
pub struct HttpAuthoritySyncClient {
    config: AuthorityConfig,
    limiter: Arc<RateLimiter>,
}

impl HttpAuthoritySyncClient {
    /// Creates a client with an explicitly constructed rate limiter.
    #[must_use]
    pub fn new(config: AuthorityConfig, limiter: Arc<RateLimiter>) -> Self {
        Self { config, limiter }
    }

    async fn send_json(
        &self,
        method: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<(StatusCode, Bytes), AuthorityError> {
        if let Err(quota) = self.limiter.try_acquire() {
            return Err(AuthorityError::Transient {
                reason: "outbound call quota exhausted".to_string(),
                retry_after: Some(quota.retry_after),
            });
        }

        let body_bytes =
            serde_json::to_vec(body).map_err(|e| AuthorityError::transient(e.to_string()))?;

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build(https);

        let mut request = Request::builder()
            .method(method)
            .uri(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("User-Agent", "rolesync/0.1");

        if let Some(token) = &self.config.api_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let request = request
            .body(Full::new(Bytes::from(body_bytes)))
            .map_err(|e| AuthorityError::transient(e.to_string()))?;

        debug!(method, url, "sending authority request");

        let response = client
            .request(request)
            .await
            .map_err(|e: hyper_util::client::legacy::Error| {
                AuthorityError::transient(format!("network error: {e}"))
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(std::time::Duration::from_secs);

        let body = response
            .into_body()
            .collect()
            .await
            .map(http_body_util::Collected::to_bytes)
            .map_err(|e| AuthorityError::transient(format!("reading response body: {e}")))?;

        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            return Err(AuthorityError::Transient {
                reason: format!("rate limited by authority (HTTP {status})"),
                retry_after: retry_after.or(Some(std::time::Duration::from_secs(60))),
            });
        }
        if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
            return Err(AuthorityError::transient(format!(
                "authority unavailable (HTTP {status})"
            )));
        }
        if status.is_client_error() {
            let message = String::from_utf8(body.to_vec())
                .unwrap_or_else(|_| format!("HTTP {status}"));
            return Err(AuthorityError::permanent(message, Some(status.as_u16())));
        }

        Ok((status, body))
    }
}

#[async_trait]
impl AuthoritySyncClient for HttpAuthoritySyncClient {
    async fn grant(
        &self,
        contact_id: &str,
        location_id: Option<&str>,
        role_name: &str,
    ) -> Result<String, AuthorityError> {
        let url = format!(
            "{}/access-grants",
            self.config.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "contact_id": contact_id,
            "location_id": location_id,
            "role": role_name,
        });

        let (_, bytes) = self.send_json("POST", &url, &body).await?;

        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| AuthorityError::transient(format!("malformed grant response: {e}")))?;
        value
            .get("id")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| {
                AuthorityError::permanent("grant response missing reference id", None)
            })
    }

    async fn revoke(&self, contact_id: &str, external_ref: &str) -> Result<(), AuthorityError> {
        let url = format!(
            "{}/access-grants/{}/revoke",
            self.config.base_url.trim_end_matches('/'),
            external_ref
        );
        let body = serde_json::json!({ "contact_id": contact_id });

        self.send_json("POST", &url, &body).await.map(|_| ())
    }
}
