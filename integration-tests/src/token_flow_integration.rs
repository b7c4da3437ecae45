//! End-to-end grant flows against a live issuer
//!
//! Drives the discovery, token, and userinfo endpoints over HTTP the way an
//! external web client would, then checks the minted tokens with a validator
//! sharing the issuer's key material.

use crate::test_utils::*;
use reqwest::StatusCode;

const GALLERY_SCOPES: &[&str] = &[
    "openid",
    "profile",
    "country",
    "imagegalleryapi",
    "offline_access",
];

#[tokio::test]
async fn test_discovery_document_points_at_live_endpoints() {
    let idp = spawn_idp().await;
    let http = reqwest::Client::new();

    let doc: serde_json::Value = http
        .get(format!("{}/.well-known/openid-configuration", idp.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(doc["issuer"], idp.base_url);
    assert_eq!(
        doc["token_endpoint"],
        format!("{}/connect/token", idp.base_url)
    );
    assert_eq!(
        doc["userinfo_endpoint"],
        format!("{}/connect/userinfo", idp.base_url)
    );
    assert_eq!(doc["code_challenge_methods_supported"][0], "S256");
}

#[tokio::test]
async fn test_code_exchange_and_userinfo_over_http() {
    let idp = spawn_idp().await;
    let http = reqwest::Client::new();
    let code = login_code(&idp, "Claire", GALLERY_SCOPES).await;

    let (status, body) = exchange_code_over_http(&http, &idp.base_url, &code).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    let access_token = body["access_token"].as_str().unwrap();
    assert!(body["refresh_token"].as_str().is_some());
    assert!(body["expires_in"].as_i64().unwrap() <= 120);

    // The minted token validates against the issuer's key material and
    // carries the API audience
    let claims = idp
        .issuer
        .validator()
        .validate_access_token(access_token, Some("imagegalleryapi"))
        .unwrap();
    assert!(claims.has_scope("offline_access"));

    // Userinfo releases only the claims the granted identity scopes cover
    let info: serde_json::Value = http
        .get(format!("{}/connect/userinfo", idp.base_url))
        .bearer_auth(access_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["sub"], claims.sub);
    assert_eq!(info["given_name"], "Claire");
    assert_eq!(info["country"], "be");
    assert!(info.get("address").is_none());
}

#[tokio::test]
async fn test_code_replay_over_http_is_invalid_grant() {
    let idp = spawn_idp().await;
    let http = reqwest::Client::new();
    let code = login_code(&idp, "Frank", GALLERY_SCOPES).await;

    let (status, _) = exchange_code_over_http(&http, &idp.base_url, &code).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = exchange_code_over_http(&http, &idp.base_url, &code).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_refresh_rotation_over_http() {
    let idp = spawn_idp().await;
    let http = reqwest::Client::new();
    let code = login_code(&idp, "Claire", GALLERY_SCOPES).await;

    let (_, body) = exchange_code_over_http(&http, &idp.base_url, &code).await;
    let first_refresh = body["refresh_token"].as_str().unwrap().to_string();

    let (status, body) = refresh_over_http(&http, &idp.base_url, &first_refresh).await;
    assert_eq!(status, StatusCode::OK);
    let second_refresh = body["refresh_token"].as_str().unwrap();
    assert_ne!(second_refresh, first_refresh);

    // The spent predecessor is gone
    let (status, body) = refresh_over_http(&http, &idp.base_url, &first_refresh).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");

    // The successor still works
    let (status, _) = refresh_over_http(&http, &idp.base_url, second_refresh).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unsupported_grant_type_over_http() {
    let idp = spawn_idp().await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{}/connect/token", idp.base_url))
        .form(&[
            ("grant_type", "password"),
            ("username", "Claire"),
            ("password", "password"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_wrong_client_secret_over_http_is_invalid_client() {
    let idp = spawn_idp().await;
    let http = reqwest::Client::new();
    let code = login_code(&idp, "Claire", GALLERY_SCOPES).await;

    let response = http
        .post(format!("{}/connect/token", idp.base_url))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT),
            ("code_verifier", VERIFIER),
            ("client_id", CLIENT_ID),
            ("client_secret", "not-the-secret"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_client");
}
