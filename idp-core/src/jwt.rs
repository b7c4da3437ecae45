//! Token signing and validation
//!
//! Access and id tokens are self-contained signed JWTs (HS256). Validation
//! is side-effect free and safe to call concurrently.
//!
//! The library's own `exp`/`nbf` checking is disabled and replaced with
//! explicit checks: a token whose `exp` equals the current second is
//! already expired (inclusive boundary), and no clock leeway is applied.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::claims::{ClaimSet, claim_types};

/// Signing failures
#[derive(Debug, Error)]
pub enum SigningError {
    /// The claims could not be encoded and signed
    #[error("token signing failed: {0}")]
    Encode(String),
}

/// Validation failures
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Signature does not verify against the issuer key
    #[error("token signature is invalid")]
    SignatureInvalid,

    /// `exp` has passed (or equals the current second)
    #[error("token has expired")]
    Expired,

    /// `nbf` lies in the future
    #[error("token is not yet valid")]
    NotYetValid,

    /// The token was issued for a different audience
    #[error("token audience does not include '{expected}'")]
    AudienceMismatch {
        /// Audience the resource server expected
        expected: String,
    },

    /// The token was issued by a different issuer
    #[error("token issuer '{found}' does not match '{expected}'")]
    IssuerMismatch {
        /// Configured issuer
        expected: String,
        /// Issuer found in the token
        found: String,
    },

    /// The token is not a well-formed JWT
    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Claims carried in an access token (RFC 7519 registered set plus scope)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Issuer
    pub iss: String,
    /// Subject identifier
    pub sub: String,
    /// Audiences (API resource names)
    pub aud: Vec<String>,
    /// Expiry (Unix timestamp, inclusive: `exp == now` is expired)
    pub exp: i64,
    /// Not before
    pub nbf: i64,
    /// Issued at
    pub iat: i64,
    /// Unique token identifier
    pub jti: String,
    /// Space-joined granted scopes
    pub scope: String,
    /// Client the token was issued to
    pub client_id: String,
    /// Claims released by the granted API scopes (e.g. `role`)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AccessTokenClaims {
    /// Granted scopes
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }

    /// Whether the token carries the given scope
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().any(|s| s == scope)
    }

    /// Convert into the typed claim model for policy evaluation
    pub fn claim_set(&self) -> ClaimSet {
        let mut set = ClaimSet::new();
        set.add(claim_types::SUB, &self.sub);
        for (claim_type, value) in &self.extra {
            match value {
                serde_json::Value::String(s) => set.add(claim_type, s),
                serde_json::Value::Array(values) => {
                    for v in values {
                        if let serde_json::Value::String(s) = v {
                            set.add(claim_type, s);
                        }
                    }
                }
                other => set.add(claim_type, other.to_string()),
            }
        }
        set
    }
}

/// Claims carried in an id token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer
    pub iss: String,
    /// Subject identifier
    pub sub: String,
    /// Audience (the client id)
    pub aud: String,
    /// Expiry
    pub exp: i64,
    /// Not before
    pub nbf: i64,
    /// Issued at
    pub iat: i64,
    /// Unique token identifier
    pub jti: String,
}

/// Signs access and id tokens with the issuer key
pub struct TokenSigner {
    issuer: String,
    encoding_key: EncodingKey,
    header: Header,
}

impl TokenSigner {
    /// Create an HS256 signer from the shared issuer secret
    pub fn hs256(issuer: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            issuer: issuer.into(),
            encoding_key: EncodingKey::from_secret(secret),
            header: Header::new(Algorithm::HS256),
        }
    }

    /// The issuer identifier written into `iss`
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign an access token
    pub fn sign_access_token(&self, claims: &AccessTokenClaims) -> Result<String, SigningError> {
        encode(&self.header, claims, &self.encoding_key)
            .map_err(|e| SigningError::Encode(e.to_string()))
    }

    /// Sign an id token
    pub fn sign_id_token(&self, claims: &IdTokenClaims) -> Result<String, SigningError> {
        encode(&self.header, claims, &self.encoding_key)
            .map_err(|e| SigningError::Encode(e.to_string()))
    }
}

/// Validates presented tokens against the issuer's signing key
///
/// Stateless and idempotent; a validator can be shared freely across tasks.
pub struct TokenValidator {
    issuer: String,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    /// Create an HS256 validator from the shared issuer secret
    pub fn hs256(issuer: impl Into<String>, secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // exp/nbf/aud/iss are checked explicitly below so the expiry
        // boundary is inclusive and no leeway is applied.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        Self {
            issuer: issuer.into(),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Verify signature, expiry, not-before, issuer, and (when given) audience
    pub fn validate_access_token(
        &self,
        token: &str,
        expected_audience: Option<&str>,
    ) -> Result<AccessTokenClaims, ValidationError> {
        let data = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    ValidationError::SignatureInvalid
                }
                _ => ValidationError::Malformed(e.to_string()),
            })?;
        let claims = data.claims;

        let now = Utc::now().timestamp();
        if claims.exp <= now {
            return Err(ValidationError::Expired);
        }
        if claims.nbf > now {
            return Err(ValidationError::NotYetValid);
        }
        if claims.iss != self.issuer {
            return Err(ValidationError::IssuerMismatch {
                expected: self.issuer.clone(),
                found: claims.iss,
            });
        }
        if let Some(expected) = expected_audience {
            if !claims.aud.iter().any(|a| a == expected) {
                return Err(ValidationError::AudienceMismatch {
                    expected: expected.to_string(),
                });
            }
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUER: &str = "https://localhost:44318";
    const SECRET: &[u8] = b"test-signing-secret";

    fn claims_expiring_at(exp: i64) -> AccessTokenClaims {
        let now = Utc::now().timestamp();
        AccessTokenClaims {
            iss: ISSUER.to_string(),
            sub: "abc".to_string(),
            aud: vec!["imagegalleryapi".to_string()],
            exp,
            nbf: now,
            iat: now,
            jti: uuid::Uuid::new_v4().to_string(),
            scope: "openid imagegalleryapi".to_string(),
            client_id: "imagegalleryclient".to_string(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_sign_validate_round_trip_preserves_claims() {
        let signer = TokenSigner::hs256(ISSUER, SECRET);
        let validator = TokenValidator::hs256(ISSUER, SECRET);

        let claims = claims_expiring_at(Utc::now().timestamp() + 120);
        let token = signer.sign_access_token(&claims).unwrap();

        let validated = validator
            .validate_access_token(&token, Some("imagegalleryapi"))
            .unwrap();
        assert_eq!(validated.sub, "abc");
        assert_eq!(
            validated.scopes().collect::<Vec<_>>(),
            vec!["openid", "imagegalleryapi"]
        );
    }

    #[test]
    fn test_exp_equal_to_now_is_expired() {
        let signer = TokenSigner::hs256(ISSUER, SECRET);
        let validator = TokenValidator::hs256(ISSUER, SECRET);

        let claims = claims_expiring_at(Utc::now().timestamp());
        let token = signer.sign_access_token(&claims).unwrap();

        assert!(matches!(
            validator.validate_access_token(&token, None),
            Err(ValidationError::Expired)
        ));
    }

    #[test]
    fn test_wrong_key_is_signature_invalid() {
        let signer = TokenSigner::hs256(ISSUER, b"some-other-secret");
        let validator = TokenValidator::hs256(ISSUER, SECRET);

        let claims = claims_expiring_at(Utc::now().timestamp() + 120);
        let token = signer.sign_access_token(&claims).unwrap();

        assert!(matches!(
            validator.validate_access_token(&token, None),
            Err(ValidationError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_audience_mismatch() {
        let signer = TokenSigner::hs256(ISSUER, SECRET);
        let validator = TokenValidator::hs256(ISSUER, SECRET);

        let claims = claims_expiring_at(Utc::now().timestamp() + 120);
        let token = signer.sign_access_token(&claims).unwrap();

        assert!(matches!(
            validator.validate_access_token(&token, Some("otherapi")),
            Err(ValidationError::AudienceMismatch { .. })
        ));
    }

    #[test]
    fn test_issuer_mismatch() {
        let signer = TokenSigner::hs256("https://other-idp", SECRET);
        let validator = TokenValidator::hs256(ISSUER, SECRET);

        let mut claims = claims_expiring_at(Utc::now().timestamp() + 120);
        claims.iss = "https://other-idp".to_string();
        let token = signer.sign_access_token(&claims).unwrap();

        assert!(matches!(
            validator.validate_access_token(&token, None),
            Err(ValidationError::IssuerMismatch { .. })
        ));
    }

    #[test]
    fn test_nbf_in_future_rejected() {
        let signer = TokenSigner::hs256(ISSUER, SECRET);
        let validator = TokenValidator::hs256(ISSUER, SECRET);

        let mut claims = claims_expiring_at(Utc::now().timestamp() + 240);
        claims.nbf = Utc::now().timestamp() + 120;
        let token = signer.sign_access_token(&claims).unwrap();

        assert!(matches!(
            validator.validate_access_token(&token, None),
            Err(ValidationError::NotYetValid)
        ));
    }

    #[test]
    fn test_garbage_token_is_malformed() {
        let validator = TokenValidator::hs256(ISSUER, SECRET);
        assert!(matches!(
            validator.validate_access_token("not.a.jwt", None),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_extra_claims_flow_into_claim_set() {
        let signer = TokenSigner::hs256(ISSUER, SECRET);
        let validator = TokenValidator::hs256(ISSUER, SECRET);

        let mut claims = claims_expiring_at(Utc::now().timestamp() + 120);
        claims
            .extra
            .insert("role".to_string(), serde_json::json!("PayingUser"));
        let token = signer.sign_access_token(&claims).unwrap();

        let set = validator
            .validate_access_token(&token, None)
            .unwrap()
            .claim_set();
        assert_eq!(set.subject(), Some("abc"));
        assert!(set.has("role", "PayingUser"));
    }
}
