//! Refresh-to-bearer token exchange.

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use kiln_auth::AccessToken;

use crate::error::ClientError;

/// Client id presented to the token endpoint.
pub const DEFAULT_CLIENT_ID: &str = "rhsm-api";

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub token_url: String,
    pub refresh_token: String,
    pub client_id: String,
}

impl OAuthConfig {
    pub fn new(token_url: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            refresh_token: refresh_token.into(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Hands out a usable access token, exchanging the refresh credential only
/// when the cached one is no longer fresh.
///
/// The cache lock is held across the exchange, so concurrent callers wait for
/// one exchange instead of each starting their own.
#[derive(Debug)]
pub struct TokenSource {
    http: reqwest::Client,
    config: OAuthConfig,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenSource {
    pub fn new(http: reqwest::Client, config: OAuthConfig) -> Self {
        Self {
            http,
            config,
            cached: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> Result<String, ClientError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value().to_string());
            }
        }

        let token = self.exchange().await?;
        let value = token.value().to_string();
        *cached = Some(token);
        Ok(value)
    }

    async fn exchange(&self) -> Result<AccessToken, ClientError> {
        let issued_at = Utc::now();
        let resp = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("refresh_token", self.config.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ClientError::TokenExchange(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::TokenExchange(format!("token endpoint returned {status}: {body}")));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::TokenExchange(format!("unreadable token response: {e}")))?;

        debug!(expires_in = body.expires_in, "obtained access token");
        AccessToken::from_expires_in(body.access_token, issued_at, body.expires_in).ok_or_else(|| {
            ClientError::TokenExchange(format!("token lifetime out of range: {}s", body.expires_in))
        })
    }
}
