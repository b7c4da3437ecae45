//! Token issuer
//!
//! Authorization-server core implementing the authorization code grant
//! (with PKCE) and the refresh token grant. Codes are single-use; refresh
//! tokens rotate on every use and never outlive their original absolute
//! expiry; an access token's expiry is clamped to its parent refresh
//! token's absolute expiry.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::claims::claim_types;
use crate::config::{ClientConfig, GrantType, IdpConfig, User, scope_names, verify_secret};
use crate::jwt::{AccessTokenClaims, IdTokenClaims, SigningError, TokenSigner, TokenValidator};
use crate::pkce::{validate_code_challenge, validate_code_verifier, verify_pkce};
use crate::store::{AuthorizationCodeRecord, RefreshTokenRecord, TokenStore, TokenStoreError};

/// Grant-level errors, returned synchronously to the token endpoint caller
/// and never retried automatically
#[derive(Debug, Error)]
pub enum GrantError {
    /// Unknown client, failed secret check, or disallowed grant type
    #[error("invalid client: {0}")]
    InvalidClient(String),

    /// Redirect URI does not match the client registration
    #[error("redirect URI is not registered for this client")]
    InvalidRedirect,

    /// Requested scopes exceed the client registration
    #[error("requested scope exceeds the client registration")]
    InvalidScope,

    /// Unknown/expired/consumed code or refresh token, binding mismatch, or
    /// PKCE failure
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// Token signing failed
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// Token store backend failure
    #[error("token store failure: {0}")]
    Store(String),
}

impl GrantError {
    /// RFC 6749 Section 5.2 error code for the token endpoint response body
    pub fn error_code(&self) -> &'static str {
        match self {
            GrantError::InvalidClient(_) => "invalid_client",
            GrantError::InvalidRedirect => "invalid_request",
            GrantError::InvalidScope => "invalid_scope",
            GrantError::InvalidGrant(_) => "invalid_grant",
            GrantError::Signing(_) | GrantError::Store(_) => "server_error",
        }
    }
}

impl From<TokenStoreError> for GrantError {
    fn from(err: TokenStoreError) -> Self {
        match err {
            TokenStoreError::CodeNotFound => {
                GrantError::InvalidGrant("authorization code is unknown or already used".into())
            }
            TokenStoreError::CodeExpired => {
                GrantError::InvalidGrant("authorization code has expired".into())
            }
            TokenStoreError::TokenNotFound => {
                GrantError::InvalidGrant("refresh token is unknown or already rotated".into())
            }
            TokenStoreError::TokenExpired => {
                GrantError::InvalidGrant("refresh token has passed its absolute expiry".into())
            }
            TokenStoreError::General(msg) => GrantError::Store(msg),
        }
    }
}

/// The token bundle minted by a successful grant
#[derive(Debug, Clone)]
pub struct IssuedTokenSet {
    /// Signed access token
    pub access_token: String,
    /// Signed id token
    pub id_token: String,
    /// Opaque refresh token, when offline access was granted
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires
    pub expires_in: i64,
    /// Space-joined granted scopes
    pub scope: String,
}

/// Authorization-server core
///
/// Construct once with the provider configuration and a token store, then
/// share behind an `Arc`. All operations are request-parallel safe; the
/// store guarantees single-use semantics for codes and refresh tokens.
pub struct TokenIssuer {
    config: Arc<IdpConfig>,
    store: Arc<dyn TokenStore>,
    signer: TokenSigner,
}

impl TokenIssuer {
    /// Create an issuer over the given configuration and store
    pub fn new(config: Arc<IdpConfig>, store: Arc<dyn TokenStore>) -> Self {
        let signer = TokenSigner::hs256(config.issuer.clone(), &config.signing_secret);
        Self {
            config,
            store,
            signer,
        }
    }

    /// The provider configuration this issuer serves
    pub fn config(&self) -> &IdpConfig {
        &self.config
    }

    /// A validator sharing this issuer's signing key material
    pub fn validator(&self) -> TokenValidator {
        TokenValidator::hs256(self.config.issuer.clone(), &self.config.signing_secret)
    }

    /// Check a user's password credential, returning the account on success
    ///
    /// Called by the login collaborator before requesting an authorization
    /// code. Failures are not grant errors; the caller re-prompts.
    pub fn verify_user(&self, username: &str, password: &str) -> Option<&User> {
        let user = self.config.user_by_username(username)?;
        if verify_secret(password, &user.password_hash) {
            Some(user)
        } else {
            debug!(username, "password verification failed");
            None
        }
    }

    /// Issue a single-use authorization code after successful authentication
    ///
    /// Validates client registration, redirect URI, and requested scopes.
    /// Any outstanding code for the same (client, subject, redirect) is
    /// displaced so at most one live code exists per binding.
    pub async fn issue_authorization_code(
        &self,
        client_id: &str,
        subject_id: &str,
        redirect_uri: &str,
        scopes: &[String],
        pkce_challenge: Option<&str>,
    ) -> Result<String, GrantError> {
        let client = self
            .config
            .client(client_id)
            .ok_or_else(|| GrantError::InvalidClient(format!("unknown client '{client_id}'")))?;
        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(GrantError::InvalidClient(
                "client may not use the authorization code grant".into(),
            ));
        }
        if !client.allows_redirect(redirect_uri) {
            return Err(GrantError::InvalidRedirect);
        }
        if !client.allows_scopes(scopes.iter().map(String::as_str)) {
            return Err(GrantError::InvalidScope);
        }
        match pkce_challenge {
            Some(challenge) if !validate_code_challenge(challenge) => {
                return Err(GrantError::InvalidGrant(
                    "malformed PKCE code challenge".into(),
                ));
            }
            None if client.require_pkce => {
                return Err(GrantError::InvalidGrant(
                    "client requires PKCE but no code challenge was supplied".into(),
                ));
            }
            _ => {}
        }

        let code = generate_opaque_token(32);
        let now = Utc::now();
        self.store
            .put_authorization_code(AuthorizationCodeRecord {
                code: code.clone(),
                client_id: client.client_id.clone(),
                subject_id: subject_id.to_string(),
                redirect_uri: redirect_uri.to_string(),
                code_challenge: pkce_challenge.map(str::to_string),
                scopes: scopes.to_vec(),
                expires_at: now
                    + Duration::seconds(self.config.authorization_code_lifetime_secs as i64),
                created_at: now,
            })
            .await?;

        debug!(client_id, subject_id, "issued authorization code");
        Ok(code)
    }

    /// Redeem an authorization code for a token set
    ///
    /// The code is consumed atomically before any further checks, so a
    /// replay (or a concurrent duplicate) always fails with `InvalidGrant`.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<IssuedTokenSet, GrantError> {
        let client = self.authenticate_client(client_id, client_secret)?;
        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(GrantError::InvalidClient(
                "client may not use the authorization code grant".into(),
            ));
        }

        let record = self.store.take_authorization_code(code).await?;
        if record.client_id != client.client_id {
            warn!(
                client_id,
                "authorization code presented by a different client"
            );
            return Err(GrantError::InvalidGrant(
                "authorization code was issued to a different client".into(),
            ));
        }
        if record.redirect_uri != redirect_uri {
            return Err(GrantError::InvalidGrant(
                "redirect URI does not match the authorization request".into(),
            ));
        }
        if let Some(challenge) = &record.code_challenge {
            let verifier = code_verifier.ok_or_else(|| {
                GrantError::InvalidGrant("code verifier is required for this grant".into())
            })?;
            if !validate_code_verifier(verifier) {
                return Err(GrantError::InvalidGrant(
                    "malformed PKCE code verifier".into(),
                ));
            }
            if !verify_pkce(verifier, challenge) {
                return Err(GrantError::InvalidGrant("PKCE verification failed".into()));
            }
        }

        // Mint and store the refresh token first so the access token expiry
        // can be clamped to its absolute lifetime.
        let now = Utc::now();
        let refresh_record = if client.allow_offline_access
            && record.scopes.iter().any(|s| s == scope_names::OFFLINE_ACCESS)
        {
            let refresh = RefreshTokenRecord {
                token: generate_opaque_token(64),
                client_id: client.client_id.clone(),
                subject_id: record.subject_id.clone(),
                scopes: record.scopes.clone(),
                absolute_expires_at: now
                    + Duration::seconds(client.absolute_refresh_token_lifetime_secs as i64),
                created_at: now,
            };
            self.store.put_refresh_token(refresh.clone()).await?;
            Some(refresh)
        } else {
            None
        };

        let token_set = self.mint_token_set(
            client,
            &record.subject_id,
            &record.scopes,
            refresh_record.as_ref(),
        )?;
        info!(
            client_id,
            subject_id = %record.subject_id,
            "authorization code exchanged"
        );
        Ok(token_set)
    }

    /// Redeem a refresh token for a new token set, rotating the refresh token
    ///
    /// The presented token is consumed atomically; the successor inherits
    /// subject, scopes, and the original absolute expiry.
    pub async fn refresh_token_grant(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<IssuedTokenSet, GrantError> {
        let client = self.authenticate_client(client_id, client_secret)?;
        if !client.allows_grant(GrantType::RefreshToken) {
            return Err(GrantError::InvalidClient(
                "client may not use the refresh token grant".into(),
            ));
        }

        let old = self.store.take_refresh_token(refresh_token).await?;
        if old.client_id != client.client_id {
            warn!(client_id, "refresh token presented by a different client");
            return Err(GrantError::InvalidGrant(
                "refresh token was issued to a different client".into(),
            ));
        }

        let successor = RefreshTokenRecord {
            token: generate_opaque_token(64),
            client_id: old.client_id,
            subject_id: old.subject_id,
            scopes: old.scopes,
            absolute_expires_at: old.absolute_expires_at,
            created_at: Utc::now(),
        };
        self.store.put_refresh_token(successor.clone()).await?;

        let token_set = self.mint_token_set(
            client,
            &successor.subject_id,
            &successor.scopes,
            Some(&successor),
        )?;
        info!(
            client_id,
            subject_id = %successor.subject_id,
            "refresh token rotated"
        );
        Ok(token_set)
    }

    /// Invalidate all refresh tokens for a subject (logout)
    pub async fn revoke_subject(&self, subject_id: &str) -> Result<usize, GrantError> {
        let revoked = self.store.revoke_subject_refresh_tokens(subject_id).await?;
        info!(subject_id, revoked, "revoked refresh tokens for subject");
        Ok(revoked)
    }

    fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<&ClientConfig, GrantError> {
        let client = self
            .config
            .client(client_id)
            .ok_or_else(|| GrantError::InvalidClient(format!("unknown client '{client_id}'")))?;
        if !verify_secret(client_secret, &client.client_secret_hash) {
            warn!(client_id, "client secret verification failed");
            return Err(GrantError::InvalidClient("client secret mismatch".into()));
        }
        Ok(client)
    }

    fn mint_token_set(
        &self,
        client: &ClientConfig,
        subject_id: &str,
        scopes: &[String],
        refresh: Option<&RefreshTokenRecord>,
    ) -> Result<IssuedTokenSet, GrantError> {
        let user = self.config.user_by_subject(subject_id).ok_or_else(|| {
            GrantError::InvalidGrant("subject no longer exists at the provider".into())
        })?;

        let now = Utc::now();
        let mut expires_at = now + Duration::seconds(client.access_token_lifetime_secs as i64);
        // An access token never outlives its parent refresh token.
        if let Some(refresh) = refresh {
            expires_at = expires_at.min(refresh.absolute_expires_at);
        }

        let access_claims = AccessTokenClaims {
            iss: self.signer.issuer().to_string(),
            sub: subject_id.to_string(),
            aud: self.audiences_for(scopes),
            exp: expires_at.timestamp(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            scope: scopes.join(" "),
            client_id: client.client_id.clone(),
            extra: self.api_claims_for(scopes, user),
        };
        let id_claims = IdTokenClaims {
            iss: self.signer.issuer().to_string(),
            sub: subject_id.to_string(),
            aud: client.client_id.clone(),
            exp: expires_at.timestamp(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        Ok(IssuedTokenSet {
            access_token: self.signer.sign_access_token(&access_claims)?,
            id_token: self.signer.sign_id_token(&id_claims)?,
            refresh_token: refresh.map(|r| r.token.clone()),
            expires_in: (expires_at - now).num_seconds(),
            scope: scopes.join(" "),
        })
    }

    /// Audience list: the API scopes among the granted scopes
    fn audiences_for(&self, scopes: &[String]) -> Vec<String> {
        scopes
            .iter()
            .filter(|s| self.config.api_scope(s).is_some())
            .cloned()
            .collect()
    }

    /// Claims the granted API scopes copy into the access token
    fn api_claims_for(
        &self,
        scopes: &[String],
        user: &User,
    ) -> BTreeMap<String, serde_json::Value> {
        let mut extra = BTreeMap::new();
        for scope in scopes {
            let Some(api) = self.config.api_scope(scope) else {
                continue;
            };
            for claim_type in &api.claim_types {
                if claim_type == claim_types::SUB {
                    continue;
                }
                let values: Vec<&str> = user.claims.get_all(claim_type).collect();
                match values.as_slice() {
                    [] => {}
                    [single] => {
                        extra.insert(claim_type.clone(), serde_json::json!(single));
                    }
                    many => {
                        extra.insert(claim_type.clone(), serde_json::json!(many));
                    }
                }
            }
        }
        extra
    }
}

/// Generate an opaque token from the unreserved URL-safe alphabet
fn generate_opaque_token(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
