//! Bearer token extraction for protected resources (RFC 6750)
//!
//! Resource servers validate the presented access token and answer 401 with
//! a `WWW-Authenticate` header on validation failure, or 403 when a policy
//! denies. Validation has no side effects.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::jwt::{AccessTokenClaims, TokenValidator, ValidationError};
use crate::policy::PolicyError;

/// Bearer token failures per RFC 6750 Section 3.1
#[derive(Debug, Clone)]
pub enum BearerError {
    /// No Authorization header, or not a Bearer scheme
    MissingToken,
    /// Signature, issuer, or format problem
    InvalidToken(String),
    /// The token's expiry has passed
    ExpiredToken,
    /// The token was issued for a different audience
    InvalidAudience(String),
    /// The token lacks a required scope
    InsufficientScope(String),
}

impl BearerError {
    /// RFC 6750 error code
    pub fn error_code(&self) -> &'static str {
        match self {
            BearerError::MissingToken => "invalid_request",
            BearerError::InvalidToken(_) => "invalid_token",
            BearerError::ExpiredToken => "invalid_token",
            BearerError::InvalidAudience(_) => "invalid_token",
            BearerError::InsufficientScope(_) => "insufficient_scope",
        }
    }

    /// Human-readable description for the error response
    pub fn error_description(&self) -> String {
        match self {
            BearerError::MissingToken => "No access token provided".to_string(),
            BearerError::InvalidToken(msg) => msg.clone(),
            BearerError::ExpiredToken => "Access token has expired".to_string(),
            BearerError::InvalidAudience(aud) => {
                format!("Token not intended for this resource: {aud}")
            }
            BearerError::InsufficientScope(scope) => {
                format!("Insufficient scope, required: {scope}")
            }
        }
    }
}

impl From<ValidationError> for BearerError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Expired => BearerError::ExpiredToken,
            ValidationError::AudienceMismatch { expected } => BearerError::InvalidAudience(expected),
            other => BearerError::InvalidToken(other.to_string()),
        }
    }
}

/// `WWW-Authenticate` challenge builder per RFC 6750 Section 3
pub struct WwwAuthenticate {
    realm: String,
    error: Option<BearerError>,
}

impl WwwAuthenticate {
    /// Create a challenge for the given realm
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            error: None,
        }
    }

    /// Attach error details to the challenge
    pub fn with_error(mut self, error: BearerError) -> Self {
        self.error = Some(error);
        self
    }

    /// Render the header value
    pub fn to_header_value(&self) -> HeaderValue {
        let mut parts = vec![format!("Bearer realm=\"{}\"", self.realm)];
        if let Some(ref error) = self.error {
            parts.push(format!("error=\"{}\"", error.error_code()));
            parts.push(format!(
                "error_description=\"{}\"",
                error.error_description()
            ));
        }
        HeaderValue::from_str(&parts.join(", "))
            .unwrap_or_else(|_| HeaderValue::from_static("Bearer"))
    }

    /// Build the 401 response carrying the challenge
    pub fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::WWW_AUTHENTICATE, self.to_header_value());
        let body = match &self.error {
            Some(error) => serde_json::json!({
                "error": error.error_code(),
                "error_description": error.error_description(),
            })
            .to_string(),
            None => String::new(),
        };
        (StatusCode::UNAUTHORIZED, headers, body).into_response()
    }
}

/// Pull the raw token out of an `Authorization: Bearer <token>` header
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, BearerError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(BearerError::MissingToken)?
        .to_str()
        .map_err(|_| BearerError::InvalidToken("authorization header is not valid UTF-8".into()))?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or(BearerError::MissingToken)
}

/// Extract and validate the bearer token on an inbound request
pub fn authorize_request(
    headers: &HeaderMap,
    validator: &TokenValidator,
    expected_audience: Option<&str>,
) -> Result<AccessTokenClaims, BearerError> {
    let token = extract_bearer(headers)?;
    Ok(validator.validate_access_token(token, expected_audience)?)
}

/// Check that validated claims carry a required scope
pub fn require_scope(claims: &AccessTokenClaims, scope: &str) -> Result<(), BearerError> {
    if claims.has_scope(scope) {
        Ok(())
    } else {
        Err(BearerError::InsufficientScope(scope.to_string()))
    }
}

/// 401 response with the appropriate `WWW-Authenticate` challenge
pub fn unauthorized_response(error: BearerError, realm: &str) -> Response {
    WwwAuthenticate::new(realm).with_error(error).into_response()
}

/// 403 response for a policy denial
pub fn forbidden_response(error: &PolicyError) -> Response {
    let body = serde_json::json!({
        "error": "forbidden",
        "error_description": error.to_string(),
    });
    (StatusCode::FORBIDDEN, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::TokenSigner;
    use chrono::Utc;
    use std::collections::BTreeMap;

    const ISSUER: &str = "https://localhost:44318";
    const SECRET: &[u8] = b"test-signing-secret";

    fn signed_token(exp_offset: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = AccessTokenClaims {
            iss: ISSUER.to_string(),
            sub: "abc".to_string(),
            aud: vec!["imagegalleryapi".to_string()],
            exp: now + exp_offset,
            nbf: now,
            iat: now,
            jti: "jti-1".to_string(),
            scope: "openid imagegalleryapi".to_string(),
            client_id: "imagegalleryclient".to_string(),
            extra: BTreeMap::new(),
        };
        TokenSigner::hs256(ISSUER, SECRET)
            .sign_access_token(&claims)
            .unwrap()
    }

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_authorize_request_success() {
        let validator = TokenValidator::hs256(ISSUER, SECRET);
        let headers = headers_with(&signed_token(120));

        let claims =
            authorize_request(&headers, &validator, Some("imagegalleryapi")).unwrap();
        assert_eq!(claims.sub, "abc");
    }

    #[test]
    fn test_missing_header_is_missing_token() {
        let validator = TokenValidator::hs256(ISSUER, SECRET);
        let result = authorize_request(&HeaderMap::new(), &validator, None);
        assert!(matches!(result, Err(BearerError::MissingToken)));
    }

    #[test]
    fn test_basic_scheme_rejected() {
        let validator = TokenValidator::hs256(ISSUER, SECRET);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        let result = authorize_request(&headers, &validator, None);
        assert!(matches!(result, Err(BearerError::MissingToken)));
    }

    #[test]
    fn test_expired_token_maps_to_expired() {
        let validator = TokenValidator::hs256(ISSUER, SECRET);
        let headers = headers_with(&signed_token(-10));
        let result = authorize_request(&headers, &validator, None);
        assert!(matches!(result, Err(BearerError::ExpiredToken)));
    }

    #[test]
    fn test_audience_mismatch_maps_to_invalid_audience() {
        let validator = TokenValidator::hs256(ISSUER, SECRET);
        let headers = headers_with(&signed_token(120));
        let result = authorize_request(&headers, &validator, Some("otherapi"));
        assert!(matches!(result, Err(BearerError::InvalidAudience(_))));
    }

    #[test]
    fn test_require_scope() {
        let validator = TokenValidator::hs256(ISSUER, SECRET);
        let headers = headers_with(&signed_token(120));
        let claims = authorize_request(&headers, &validator, None).unwrap();

        assert!(require_scope(&claims, "imagegalleryapi").is_ok());
        let denied = require_scope(&claims, "subscription_level");
        assert!(matches!(denied, Err(BearerError::InsufficientScope(_))));
        assert_eq!(denied.unwrap_err().error_code(), "insufficient_scope");
    }

    #[test]
    fn test_challenge_header_contents() {
        let header = WwwAuthenticate::new("imagegalleryapi")
            .with_error(BearerError::ExpiredToken)
            .to_header_value();
        let value = header.to_str().unwrap();
        assert!(value.contains("Bearer realm=\"imagegalleryapi\""));
        assert!(value.contains("error=\"invalid_token\""));
    }

    #[test]
    fn test_unauthorized_and_forbidden_status_codes() {
        let response = unauthorized_response(BearerError::MissingToken, "imagegalleryapi");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let denial = PolicyError::Denied {
            policy: "MustOwnImage".to_string(),
            reason: "caller does not own the resource".to_string(),
        };
        let response = forbidden_response(&denial);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
