//! Issuer HTTP surface
//!
//! The token endpoint (`POST /connect/token`), the OIDC discovery document,
//! and the userinfo endpoint. Grant-level failures are answered with the
//! RFC 6749 error JSON; userinfo failures with 401 and a `WWW-Authenticate`
//! challenge.

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::bearer::{BearerError, authorize_request, require_scope, unauthorized_response};
use crate::claims::claim_types;
use crate::config::scope_names;
use crate::issuer::{GrantError, TokenIssuer};
use crate::jwt::TokenValidator;

/// Shared state behind the issuer routes
#[derive(Clone)]
pub struct IdpState {
    /// The authorization-server core
    pub issuer: Arc<TokenIssuer>,
    /// Validator sharing the issuer's key material (used by userinfo)
    pub validator: Arc<TokenValidator>,
}

impl IdpState {
    /// Build state for an issuer
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        let validator = Arc::new(issuer.validator());
        Self { issuer, validator }
    }
}

/// Form body of `POST /connect/token`
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    /// `authorization_code` or `refresh_token`
    pub grant_type: String,
    /// Authorization code (authorization_code grant)
    pub code: Option<String>,
    /// Redirect URI the code was bound to (authorization_code grant)
    pub redirect_uri: Option<String>,
    /// PKCE code verifier (authorization_code grant)
    pub code_verifier: Option<String>,
    /// Refresh token (refresh_token grant)
    pub refresh_token: Option<String>,
    /// Client identifier
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
}

/// JSON body of a successful token response
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed access token
    pub access_token: String,
    /// Signed id token
    pub id_token: String,
    /// Rotating refresh token, when offline access was granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires
    pub expires_in: i64,
    /// Always `Bearer`
    pub token_type: String,
    /// Space-joined granted scopes
    pub scope: String,
}

/// RFC 6749 Section 5.2 error body
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthErrorBody {
    /// Error code (`invalid_grant`, `invalid_client`, ...)
    pub error: String,
    /// Human-readable detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl OAuthErrorBody {
    fn new(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: Some(description.into()),
        }
    }
}

type TokenResult = Result<Json<TokenResponse>, (StatusCode, Json<OAuthErrorBody>)>;

/// Build the issuer router
pub fn oidc_router(state: IdpState) -> Router {
    Router::new()
        .route("/.well-known/openid-configuration", get(discovery_document))
        .route("/connect/token", post(token_endpoint))
        .route("/connect/userinfo", get(userinfo))
        .with_state(state)
}

/// `POST /connect/token` - redeem an authorization code or refresh token
async fn token_endpoint(
    State(state): State<IdpState>,
    Form(request): Form<TokenRequest>,
) -> TokenResult {
    match request.grant_type.as_str() {
        "authorization_code" => authorization_code_grant(&state, request).await,
        "refresh_token" => refresh_token_grant(&state, request).await,
        other => Err((
            StatusCode::BAD_REQUEST,
            Json(OAuthErrorBody::new(
                "unsupported_grant_type",
                format!("grant_type '{other}' not supported"),
            )),
        )),
    }
}

async fn authorization_code_grant(state: &IdpState, request: TokenRequest) -> TokenResult {
    let code = request
        .code
        .ok_or_else(|| missing_parameter("code"))?;
    let redirect_uri = request
        .redirect_uri
        .ok_or_else(|| missing_parameter("redirect_uri"))?;

    let tokens = state
        .issuer
        .exchange_authorization_code(
            &code,
            &request.client_id,
            &request.client_secret,
            &redirect_uri,
            request.code_verifier.as_deref(),
        )
        .await
        .map_err(grant_error_response)?;

    Ok(Json(TokenResponse {
        access_token: tokens.access_token,
        id_token: tokens.id_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.expires_in,
        token_type: "Bearer".to_string(),
        scope: tokens.scope,
    }))
}

async fn refresh_token_grant(state: &IdpState, request: TokenRequest) -> TokenResult {
    let refresh_token = request
        .refresh_token
        .ok_or_else(|| missing_parameter("refresh_token"))?;

    let tokens = state
        .issuer
        .refresh_token_grant(&refresh_token, &request.client_id, &request.client_secret)
        .await
        .map_err(grant_error_response)?;

    Ok(Json(TokenResponse {
        access_token: tokens.access_token,
        id_token: tokens.id_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.expires_in,
        token_type: "Bearer".to_string(),
        scope: tokens.scope,
    }))
}

fn missing_parameter(name: &str) -> (StatusCode, Json<OAuthErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(OAuthErrorBody::new(
            "invalid_request",
            format!("{name} is required"),
        )),
    )
}

fn grant_error_response(err: GrantError) -> (StatusCode, Json<OAuthErrorBody>) {
    debug!(error = %err, "token endpoint rejected grant");
    let status = match &err {
        GrantError::Signing(_) | GrantError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(OAuthErrorBody::new(err.error_code(), err.to_string())),
    )
}

/// `GET /.well-known/openid-configuration` - issuer metadata
async fn discovery_document(State(state): State<IdpState>) -> impl IntoResponse {
    let config = state.issuer.config();
    let issuer = &config.issuer;
    Json(serde_json::json!({
        "issuer": issuer,
        "token_endpoint": format!("{issuer}/connect/token"),
        "userinfo_endpoint": format!("{issuer}/connect/userinfo"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
        "scopes_supported": config.supported_scopes(),
        "token_endpoint_auth_methods_supported": ["client_secret_post"],
        "id_token_signing_alg_values_supported": ["HS256"],
    }))
}

/// `GET /connect/userinfo` - claims released by the token's granted scopes
async fn userinfo(State(state): State<IdpState>, headers: HeaderMap) -> Response {
    let config = state.issuer.config();
    let claims = match authorize_request(&headers, &state.validator, None) {
        Ok(claims) => claims,
        Err(err) => return unauthorized_response(err, config.issuer.as_str()),
    };
    // Userinfo is an OIDC endpoint; the token must carry the openid scope
    if let Err(err) = require_scope(&claims, scope_names::OPENID) {
        return unauthorized_response(err, config.issuer.as_str());
    }

    let Some(user) = config.user_by_subject(&claims.sub) else {
        return unauthorized_response(
            BearerError::InvalidToken("subject no longer exists".into()),
            config.issuer.as_str(),
        );
    };

    let released: Vec<&str> = claims
        .scopes()
        .filter_map(|scope| config.identity_scope(scope))
        .flat_map(|scope| scope.claim_types.iter().map(String::as_str))
        .collect();
    let released_claims = user.claims.retain_types(&released);

    let mut body = serde_json::Map::new();
    body.insert("sub".to_string(), serde_json::json!(claims.sub));
    for claim_type in released {
        if claim_type == claim_types::SUB || body.contains_key(claim_type) {
            continue;
        }
        let values: Vec<&str> = released_claims.get_all(claim_type).collect();
        match values.as_slice() {
            [] => {}
            [single] => {
                body.insert(claim_type.to_string(), serde_json::json!(single));
            }
            many => {
                body.insert(claim_type.to_string(), serde_json::json!(many));
            }
        }
    }

    Json(serde_json::Value::Object(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdpConfig;
    use crate::pkce::code_challenge_s256;
    use crate::store::InMemoryTokenStore;
    use axum::body::Body;
    use axum::http::{Request, header};
    use tower::ServiceExt;

    const ISSUER: &str = "https://localhost:44318";
    const REDIRECT: &str = "https://localhost:44389/signin-oidc";
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

    fn demo_state() -> IdpState {
        let config = Arc::new(IdpConfig::image_gallery_demo(ISSUER, b"test-signing-secret"));
        let issuer = Arc::new(TokenIssuer::new(
            config,
            Arc::new(InMemoryTokenStore::new()),
        ));
        IdpState::new(issuer)
    }

    async fn login_code(state: &IdpState) -> String {
        let subject = state
            .issuer
            .config()
            .user_by_username("Claire")
            .unwrap()
            .subject_id
            .clone();
        state
            .issuer
            .issue_authorization_code(
                "imagegalleryclient",
                &subject,
                REDIRECT,
                &[
                    "openid".to_string(),
                    "profile".to_string(),
                    "country".to_string(),
                    "imagegalleryapi".to_string(),
                    "offline_access".to_string(),
                ],
                Some(&code_challenge_s256(VERIFIER)),
            )
            .await
            .unwrap()
    }

    async fn post_form(router: &Router, form: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/connect/token")
                    .header(
                        header::CONTENT_TYPE,
                        "application/x-www-form-urlencoded",
                    )
                    .body(Body::from(form.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_discovery_document_shape() {
        let router = oidc_router(demo_state());
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/.well-known/openid-configuration")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["issuer"], ISSUER);
        assert_eq!(
            doc["token_endpoint"],
            format!("{ISSUER}/connect/token")
        );
        assert_eq!(doc["code_challenge_methods_supported"][0], "S256");
    }

    #[tokio::test]
    async fn test_token_endpoint_exchanges_code() {
        let state = demo_state();
        let router = oidc_router(state.clone());
        let code = login_code(&state).await;

        let form = format!(
            "grant_type=authorization_code&code={code}&redirect_uri={}&code_verifier={VERIFIER}&client_id=imagegalleryclient&client_secret=secret",
            urlencode(REDIRECT)
        );
        let (status, body) = post_form(&router, &form).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "Bearer");
        assert!(body["access_token"].as_str().is_some());
        assert!(body["refresh_token"].as_str().is_some());
        assert!(body["expires_in"].as_i64().unwrap() <= 120);
    }

    #[tokio::test]
    async fn test_token_endpoint_rejects_unknown_grant_type() {
        let router = oidc_router(demo_state());
        let form = "grant_type=password&client_id=imagegalleryclient&client_secret=secret&username=Claire&password=password";
        let (status, body) = post_form(&router, form).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unsupported_grant_type");
    }

    #[tokio::test]
    async fn test_token_endpoint_replay_is_invalid_grant() {
        let state = demo_state();
        let router = oidc_router(state.clone());
        let code = login_code(&state).await;
        let form = format!(
            "grant_type=authorization_code&code={code}&redirect_uri={}&code_verifier={VERIFIER}&client_id=imagegalleryclient&client_secret=secret",
            urlencode(REDIRECT)
        );

        let (status, _) = post_form(&router, &form).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = post_form(&router, &form).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn test_userinfo_releases_scope_filtered_claims() {
        let state = demo_state();
        let router = oidc_router(state.clone());
        let code = login_code(&state).await;
        let form = format!(
            "grant_type=authorization_code&code={code}&redirect_uri={}&code_verifier={VERIFIER}&client_id=imagegalleryclient&client_secret=secret",
            urlencode(REDIRECT)
        );
        let (_, body) = post_form(&router, &form).await;
        let access_token = body["access_token"].as_str().unwrap();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/connect/userinfo")
                    .header(
                        header::AUTHORIZATION,
                        format!("Bearer {access_token}"),
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let info: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        // Granted scopes release profile + country, but not address
        assert_eq!(info["given_name"], "Claire");
        assert_eq!(info["country"], "be");
        assert!(info.get("address").is_none());
    }

    #[tokio::test]
    async fn test_userinfo_requires_openid_scope() {
        let state = demo_state();
        let router = oidc_router(state.clone());
        let subject = state
            .issuer
            .config()
            .user_by_username("Claire")
            .unwrap()
            .subject_id
            .clone();
        let code = state
            .issuer
            .issue_authorization_code(
                "imagegalleryclient",
                &subject,
                REDIRECT,
                &["profile".to_string(), "imagegalleryapi".to_string()],
                Some(&code_challenge_s256(VERIFIER)),
            )
            .await
            .unwrap();
        let form = format!(
            "grant_type=authorization_code&code={code}&redirect_uri={}&code_verifier={VERIFIER}&client_id=imagegalleryclient&client_secret=secret",
            urlencode(REDIRECT)
        );
        let (_, body) = post_form(&router, &form).await;
        let access_token = body["access_token"].as_str().unwrap();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/connect/userinfo")
                    .header(
                        header::AUTHORIZATION,
                        format!("Bearer {access_token}"),
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(challenge.contains("insufficient_scope"));
    }

    #[tokio::test]
    async fn test_userinfo_without_token_is_401() {
        let router = oidc_router(demo_state());
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/connect/userinfo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    fn urlencode(s: &str) -> String {
        s.replace(':', "%3A").replace('/', "%2F")
    }
}
