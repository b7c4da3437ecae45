//! Bearer-attachment interceptor
//!
//! Per outbound call the interceptor moves through three states:
//!
//! - **Attach**: the cached access token is still fresh (more than the
//!   refresh margin away from expiry); attach it as-is.
//! - **Refresh**: otherwise call the issuer's refresh grant. Refreshes are
//!   serialized per session; a caller that waited on the lock re-reads the
//!   cache and proceeds with the renewed set when rotation already happened,
//!   so concurrent near-expiry observers cause exactly one refresh call.
//! - **Persist**: atomically replace the cached token set before attaching
//!   the new access token.
//!
//! A rejected refresh token surfaces as [`AttachError::ReauthRequired`] and
//! is never retried automatically; the user-facing layer must force a fresh
//! login.

use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::token_cache::{SessionTokenCache, TokenSet};
use crate::transport::{RefreshError, RefreshTransport};

/// Default refresh margin in seconds: tokens closer than this to expiry are
/// renewed before use
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 600;

/// Failures while producing a bearer credential for an outbound call
#[derive(Debug, Error)]
pub enum AttachError {
    /// No token set has been cached for this session
    #[error("no token set cached for session '{0}'")]
    NoSession(String),

    /// The refresh token was rejected; only a fresh login can recover
    #[error("re-authentication required: the issuer rejected the refresh token")]
    ReauthRequired,

    /// The refresh call failed for a non-grant reason (surfaced, not retried)
    #[error("token refresh failed: {0}")]
    Refresh(String),
}

/// Attaches a valid bearer token to outbound requests, refreshing it
/// transparently ahead of expiry
pub struct BearerTokenInterceptor<T: RefreshTransport> {
    cache: Arc<SessionTokenCache>,
    transport: T,
    refresh_margin: Duration,
}

impl<T: RefreshTransport> BearerTokenInterceptor<T> {
    /// Create an interceptor over a session cache and refresh transport
    pub fn new(cache: Arc<SessionTokenCache>, transport: T) -> Self {
        Self {
            cache,
            transport,
            refresh_margin: Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
        }
    }

    /// Override the refresh margin
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Produce a valid access token for the session, refreshing if needed
    pub async fn bearer_token(&self, session_id: &str) -> Result<String, AttachError> {
        // Attach: fresh enough, use as-is.
        let tokens = self
            .cache
            .current(session_id)
            .await
            .ok_or_else(|| AttachError::NoSession(session_id.to_string()))?;
        if tokens.is_fresh(self.refresh_margin, Utc::now()) {
            return Ok(tokens.access_token);
        }

        // Refresh: serialized per session.
        let lock = self
            .cache
            .refresh_lock(session_id)
            .await
            .ok_or_else(|| AttachError::NoSession(session_id.to_string()))?;
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited on the lock.
        // Freshness is not the signal here: a renewed token whose lifetime is
        // shorter than the margin would still look stale. The set having
        // rotated is.
        let current = self
            .cache
            .current(session_id)
            .await
            .ok_or_else(|| AttachError::NoSession(session_id.to_string()))?;
        if current.refresh_token != tokens.refresh_token {
            debug!(session_id, "token already refreshed by a concurrent call");
            return Ok(current.access_token);
        }

        let fresh = self
            .transport
            .refresh(&current.refresh_token)
            .await
            .map_err(|err| match err {
                RefreshError::InvalidGrant => {
                    warn!(session_id, "refresh token rejected, forcing re-login");
                    AttachError::ReauthRequired
                }
                other => AttachError::Refresh(other.to_string()),
            })?;

        // Persist: replace the whole set atomically, then attach.
        let renewed = TokenSet {
            id_token: fresh.id_token,
            access_token: fresh.access_token,
            refresh_token: fresh.refresh_token,
            expires_at: Utc::now() + Duration::seconds(fresh.expires_in),
        };
        self.cache.store(session_id, renewed.clone()).await;
        debug!(session_id, expires_at = %renewed.expires_at, "token set renewed");
        Ok(renewed.access_token)
    }

    /// Attach a bearer token to an outbound `reqwest` request
    pub async fn attach(
        &self,
        session_id: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, AttachError> {
        let token = self.bearer_token(session_id).await?;
        Ok(request.bearer_auth(token))
    }
}
