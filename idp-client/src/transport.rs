//! Refresh transport
//!
//! The refresh side effect is isolated behind the [`RefreshTransport`]
//! capability trait so the interceptor can be exercised against a mock in
//! tests. The HTTP implementation locates the token endpoint through the
//! issuer's discovery document once per refresh cycle.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Refresh failures
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The issuer rejected the refresh token; re-authentication is required
    #[error("the issuer rejected the refresh token")]
    InvalidGrant,

    /// The token endpoint could not be reached
    #[error("token endpoint unreachable: {0}")]
    Transport(String),

    /// The issuer answered with something other than a token response
    #[error("malformed issuer response: {0}")]
    Protocol(String),
}

/// Tokens minted by a successful refresh grant
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    /// New signed id token
    pub id_token: String,
    /// New signed access token
    pub access_token: String,
    /// Rotated refresh token replacing the one just spent
    pub refresh_token: String,
    /// Seconds until the new access token expires
    pub expires_in: i64,
}

/// Capability to exchange a refresh token for fresh tokens
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    /// Call the issuer's refresh grant with the stored refresh token
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RefreshError>;
}

/// OIDC discovery document (the fields this client consumes)
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    /// Issuer identifier
    pub issuer: String,
    /// Where to send token requests
    pub token_endpoint: String,
    /// Where to fetch additional identity claims
    pub userinfo_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponseWire {
    access_token: String,
    id_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorWire {
    error: String,
}

/// HTTP refresh transport talking to a live issuer
pub struct HttpRefreshTransport {
    http: reqwest::Client,
    authority: Url,
    client_id: String,
    client_secret: String,
}

impl HttpRefreshTransport {
    /// Create a transport for the issuer at `authority`
    pub fn new(
        authority: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            authority,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Use a preconfigured `reqwest` client (timeouts, TLS settings)
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Fetch the issuer's discovery document
    pub async fn discover(&self) -> Result<DiscoveryDocument, RefreshError> {
        let url = self
            .authority
            .join("/.well-known/openid-configuration")
            .map_err(|e| RefreshError::Protocol(e.to_string()))?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RefreshError::Protocol(format!(
                "discovery document request failed with status {}",
                response.status()
            )));
        }
        response
            .json::<DiscoveryDocument>()
            .await
            .map_err(|e| RefreshError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl RefreshTransport for HttpRefreshTransport {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RefreshError> {
        let discovery = self.discover().await?;
        debug!(token_endpoint = %discovery.token_endpoint, "requesting refresh grant");

        let response = self
            .http
            .post(&discovery.token_endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            let body = response
                .json::<OAuthErrorWire>()
                .await
                .map_err(|e| RefreshError::Protocol(e.to_string()))?;
            return if body.error == "invalid_grant" || body.error == "invalid_client" {
                Err(RefreshError::InvalidGrant)
            } else {
                Err(RefreshError::Protocol(format!(
                    "token endpoint error '{}'",
                    body.error
                )))
            };
        }
        if !status.is_success() {
            return Err(RefreshError::Transport(format!(
                "token endpoint answered with status {status}"
            )));
        }

        let body = response
            .json::<TokenResponseWire>()
            .await
            .map_err(|e| RefreshError::Protocol(e.to_string()))?;
        let refresh_token = body.refresh_token.ok_or_else(|| {
            RefreshError::Protocol("token response is missing the rotated refresh token".into())
        })?;

        Ok(RefreshedTokens {
            id_token: body.id_token,
            access_token: body.access_token,
            refresh_token,
            expires_in: body.expires_in,
        })
    }
}
