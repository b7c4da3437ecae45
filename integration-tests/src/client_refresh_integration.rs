//! Client crate against a live issuer
//!
//! Exercises the HTTP refresh transport and the bearer interceptor end to
//! end: discovery, a forced renewal through the real refresh grant, and the
//! re-login signal when the stored refresh token is no longer valid.

use crate::test_utils::*;
use chrono::{Duration, Utc};
use marvin_idp_client::{
    AttachError, BearerTokenInterceptor, HttpRefreshTransport, SessionTokenCache, TokenSet,
};
use std::sync::Arc;

const GALLERY_SCOPES: &[&str] = &[
    "openid",
    "profile",
    "imagegalleryapi",
    "offline_access",
];

fn transport_for(idp: &TestIdp) -> HttpRefreshTransport {
    let authority = idp.base_url.parse().expect("issuer base URL parses");
    HttpRefreshTransport::new(authority, CLIENT_ID, CLIENT_SECRET)
}

/// Log in over HTTP and seed the session cache the way a web frontend would
/// after the code exchange
async fn seed_session(idp: &TestIdp, cache: &SessionTokenCache, session_id: &str) -> TokenSet {
    let http = reqwest::Client::new();
    let code = login_code(idp, "Claire", GALLERY_SCOPES).await;
    let (status, body) = exchange_code_over_http(&http, &idp.base_url, &code).await;
    assert!(status.is_success());

    let tokens = TokenSet {
        id_token: body["id_token"].as_str().unwrap().to_string(),
        access_token: body["access_token"].as_str().unwrap().to_string(),
        refresh_token: body["refresh_token"].as_str().unwrap().to_string(),
        expires_at: Utc::now() + Duration::seconds(body["expires_in"].as_i64().unwrap()),
    };
    cache.store(session_id, tokens.clone()).await;
    tokens
}

#[tokio::test]
async fn test_discovery_through_client_transport() {
    let idp = spawn_idp().await;
    let doc = transport_for(&idp).discover().await.unwrap();
    assert_eq!(doc.issuer, idp.base_url);
    assert_eq!(doc.token_endpoint, format!("{}/connect/token", idp.base_url));
}

#[tokio::test]
async fn test_interceptor_renews_through_live_refresh_grant() {
    let idp = spawn_idp().await;
    let cache = Arc::new(SessionTokenCache::new());
    let seeded = seed_session(&idp, &cache, "session-1").await;

    // The demo access token lives 120s, inside the default 600s margin, so
    // the first attach goes through the refresh grant.
    let interceptor = BearerTokenInterceptor::new(cache.clone(), transport_for(&idp));
    let token = interceptor.bearer_token("session-1").await.unwrap();
    assert_ne!(token, seeded.access_token);

    // The renewed token validates and the cache holds the rotated set
    let claims = idp
        .issuer
        .validator()
        .validate_access_token(&token, Some("imagegalleryapi"))
        .unwrap();
    assert_eq!(claims.client_id, CLIENT_ID);

    let cached = cache.current("session-1").await.unwrap();
    assert_eq!(cached.access_token, token);
    assert_ne!(cached.refresh_token, seeded.refresh_token);

    // Rotation consumed the seeded refresh token
    let http = reqwest::Client::new();
    let (status, body) = refresh_over_http(&http, &idp.base_url, &seeded.refresh_token).await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_invalidated_refresh_token_forces_relogin() {
    let idp = spawn_idp().await;
    let cache = Arc::new(SessionTokenCache::new());
    seed_session(&idp, &cache, "session-1").await;

    // Logout elsewhere revokes the subject's refresh tokens
    let subject = idp
        .issuer
        .config()
        .user_by_username("Claire")
        .unwrap()
        .subject_id
        .clone();
    idp.issuer.revoke_subject(&subject).await.unwrap();

    let interceptor = BearerTokenInterceptor::new(cache, transport_for(&idp));
    let result = interceptor.bearer_token("session-1").await;
    assert!(matches!(result, Err(AttachError::ReauthRequired)));
}

#[tokio::test]
async fn test_unreachable_issuer_surfaces_as_refresh_error() {
    let cache = Arc::new(SessionTokenCache::new());
    cache
        .store(
            "session-1",
            TokenSet {
                id_token: "id".to_string(),
                access_token: "stale".to_string(),
                refresh_token: "whatever".to_string(),
                expires_at: Utc::now(),
            },
        )
        .await;

    // Nothing listens on this port
    let authority = "http://127.0.0.1:9".parse().unwrap();
    let transport = HttpRefreshTransport::new(authority, CLIENT_ID, CLIENT_SECRET);
    let interceptor = BearerTokenInterceptor::new(cache, transport);

    let result = interceptor.bearer_token("session-1").await;
    assert!(matches!(result, Err(AttachError::Refresh(_))));
}
