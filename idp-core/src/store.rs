//! Token store
//!
//! Holds issued authorization codes and refresh tokens. Consumption
//! (code redemption, refresh rotation) is a single atomic take under the
//! store's write lock, so a code or refresh token can never be redeemed
//! twice under concurrent requests.
//!
//! The in-memory implementation can be swapped for a database-backed one
//! behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Token store errors
#[derive(Debug, Error)]
pub enum TokenStoreError {
    /// The authorization code is unknown (or already consumed)
    #[error("authorization code not found")]
    CodeNotFound,

    /// The authorization code has passed its expiry
    #[error("authorization code expired")]
    CodeExpired,

    /// The refresh token is unknown (or already rotated)
    #[error("refresh token not found")]
    TokenNotFound,

    /// The refresh token has passed its absolute expiry
    #[error("refresh token expired")]
    TokenExpired,

    /// Backend failure
    #[error("storage error: {0}")]
    General(String),
}

/// A stored authorization code and its bindings
#[derive(Debug, Clone)]
pub struct AuthorizationCodeRecord {
    /// The opaque code value
    pub code: String,
    /// Client the code was issued to
    pub client_id: String,
    /// Subject that authenticated
    pub subject_id: String,
    /// Redirect URI the code is bound to
    pub redirect_uri: String,
    /// PKCE S256 code challenge, if the request carried one
    pub code_challenge: Option<String>,
    /// Scopes granted at issuance
    pub scopes: Vec<String>,
    /// Expiry instant (short TTL)
    pub expires_at: DateTime<Utc>,
    /// Issuance instant
    pub created_at: DateTime<Utc>,
}

/// A stored refresh token and its bindings
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    /// The opaque token value
    pub token: String,
    /// Client the token was issued to
    pub client_id: String,
    /// Subject the token refreshes for
    pub subject_id: String,
    /// Scopes granted at the original exchange
    pub scopes: Vec<String>,
    /// Absolute expiry, fixed at first issuance and carried through rotation
    pub absolute_expires_at: DateTime<Utc>,
    /// Issuance instant of this (possibly rotated) token value
    pub created_at: DateTime<Utc>,
}

/// Storage backend for authorization codes and refresh tokens
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Store an authorization code, displacing any live code for the same
    /// (client, subject, redirect) binding
    async fn put_authorization_code(
        &self,
        record: AuthorizationCodeRecord,
    ) -> Result<(), TokenStoreError>;

    /// Atomically remove and return an authorization code
    ///
    /// A second concurrent take of the same code observes absence and fails.
    /// Expired codes are removed and reported as [`TokenStoreError::CodeExpired`].
    async fn take_authorization_code(
        &self,
        code: &str,
    ) -> Result<AuthorizationCodeRecord, TokenStoreError>;

    /// Store a refresh token
    async fn put_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), TokenStoreError>;

    /// Atomically remove and return a refresh token (rotation consumes the
    /// predecessor before its successor is stored)
    async fn take_refresh_token(
        &self,
        token: &str,
    ) -> Result<RefreshTokenRecord, TokenStoreError>;

    /// Remove all refresh tokens for a subject (logout)
    async fn revoke_subject_refresh_tokens(&self, subject_id: &str)
    -> Result<usize, TokenStoreError>;

    /// Drop expired codes and tokens
    async fn cleanup_expired(&self) -> Result<(), TokenStoreError>;
}

/// In-memory token store
///
/// Thread-safe via `tokio::sync::RwLock`; suitable for development and tests.
#[derive(Default)]
pub struct InMemoryTokenStore {
    authorization_codes: RwLock<HashMap<String, AuthorizationCodeRecord>>,
    refresh_tokens: RwLock<HashMap<String, RefreshTokenRecord>>,
}

impl InMemoryTokenStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn put_authorization_code(
        &self,
        record: AuthorizationCodeRecord,
    ) -> Result<(), TokenStoreError> {
        let mut codes = self.authorization_codes.write().await;
        // At most one live code per (client, subject, redirect)
        codes.retain(|_, c| {
            !(c.client_id == record.client_id
                && c.subject_id == record.subject_id
                && c.redirect_uri == record.redirect_uri)
        });
        codes.insert(record.code.clone(), record);
        Ok(())
    }

    async fn take_authorization_code(
        &self,
        code: &str,
    ) -> Result<AuthorizationCodeRecord, TokenStoreError> {
        let mut codes = self.authorization_codes.write().await;
        let record = codes.remove(code).ok_or(TokenStoreError::CodeNotFound)?;
        if record.expires_at <= Utc::now() {
            return Err(TokenStoreError::CodeExpired);
        }
        Ok(record)
    }

    async fn put_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), TokenStoreError> {
        let mut tokens = self.refresh_tokens.write().await;
        tokens.insert(record.token.clone(), record);
        Ok(())
    }

    async fn take_refresh_token(
        &self,
        token: &str,
    ) -> Result<RefreshTokenRecord, TokenStoreError> {
        let mut tokens = self.refresh_tokens.write().await;
        let record = tokens.remove(token).ok_or(TokenStoreError::TokenNotFound)?;
        if record.absolute_expires_at <= Utc::now() {
            return Err(TokenStoreError::TokenExpired);
        }
        Ok(record)
    }

    async fn revoke_subject_refresh_tokens(
        &self,
        subject_id: &str,
    ) -> Result<usize, TokenStoreError> {
        let mut tokens = self.refresh_tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, t| t.subject_id != subject_id);
        Ok(before - tokens.len())
    }

    async fn cleanup_expired(&self) -> Result<(), TokenStoreError> {
        let now = Utc::now();
        {
            let mut codes = self.authorization_codes.write().await;
            codes.retain(|_, c| c.expires_at > now);
        }
        {
            let mut tokens = self.refresh_tokens.write().await;
            tokens.retain(|_, t| t.absolute_expires_at > now);
        }
        Ok(())
    }
}
