//! A protected resource server built from the bearer and policy pieces
//!
//! Stands up a small gallery API router that validates bearer tokens, checks
//! ownership before serving an image, and gates frame ordering behind a
//! claim policy, then drives it with tokens minted by a real issuer.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use marvin_idp_core::claims::claim_types;
use marvin_idp_core::pkce::code_challenge_s256;
use marvin_idp_core::{
    IdpConfig, InMemoryTokenStore, Policy, PolicyEngine, RequestContext, TokenIssuer,
    TokenValidator, authorize_request, forbidden_response, unauthorized_response,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use crate::test_utils::{CLIENT_ID, CLIENT_SECRET, REDIRECT, VERIFIER};

const API_AUDIENCE: &str = "imagegalleryapi";

#[derive(Clone)]
struct GalleryState {
    validator: Arc<TokenValidator>,
    policies: Arc<PolicyEngine>,
    // image id -> owner subject
    images: Arc<HashMap<Uuid, String>>,
}

fn gallery_router(state: GalleryState) -> Router {
    Router::new()
        .route("/api/images/:id", get(get_image))
        .route("/api/orders", post(order_frame))
        .with_state(state)
}

async fn get_image(
    State(state): State<GalleryState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    let claims = match authorize_request(&headers, &state.validator, Some(API_AUDIENCE)) {
        Ok(claims) => claims,
        Err(err) => return unauthorized_response(err, API_AUDIENCE),
    };
    let Some(owner) = state.images.get(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let ctx = RequestContext::for_resource_owner(owner);
    if let Err(denial) = state
        .policies
        .evaluate("MustOwnImage", &claims.claim_set(), &ctx)
    {
        return forbidden_response(&denial);
    }
    Json(serde_json::json!({ "id": id, "owner": owner })).into_response()
}

async fn order_frame(State(state): State<GalleryState>, headers: HeaderMap) -> Response {
    let claims = match authorize_request(&headers, &state.validator, Some(API_AUDIENCE)) {
        Ok(claims) => claims,
        Err(err) => return unauthorized_response(err, API_AUDIENCE),
    };
    if let Err(denial) = state.policies.evaluate(
        "CanOrderFrame",
        &claims.claim_set(),
        &RequestContext::default(),
    ) {
        return forbidden_response(&denial);
    }
    (StatusCode::CREATED, Json(serde_json::json!({ "status": "ordered" }))).into_response()
}

struct Fixture {
    issuer: TokenIssuer,
    router: Router,
    frank_image: Uuid,
    claire_image: Uuid,
}

/// Issuer plus gallery API wired to it
///
/// The gallery API registration asks for the subscription and country claims
/// in its access tokens so the frame-ordering policy can run locally.
fn fixture() -> Fixture {
    let mut config = IdpConfig::image_gallery_demo("https://localhost:44318", b"gallery-signing");
    config.api_scopes[0].claim_types = vec![
        claim_types::ROLE.to_string(),
        claim_types::SUBSCRIPTION_LEVEL.to_string(),
        claim_types::COUNTRY.to_string(),
    ];
    let frank = config.user_by_username("Frank").unwrap().subject_id.clone();
    let claire = config
        .user_by_username("Claire")
        .unwrap()
        .subject_id
        .clone();

    let issuer = TokenIssuer::new(Arc::new(config), Arc::new(InMemoryTokenStore::new()));

    let frank_image = Uuid::new_v4();
    let claire_image = Uuid::new_v4();
    let state = GalleryState {
        validator: Arc::new(issuer.validator()),
        policies: Arc::new(PolicyEngine::new([
            Policy::new("CanOrderFrame")
                .require_claim(claim_types::SUBSCRIPTION_LEVEL, ["PayingUser"])
                .require_claim(claim_types::COUNTRY, ["be"]),
            Policy::new("MustOwnImage").require_resource_owner(),
        ])),
        images: Arc::new(HashMap::from([
            (frank_image, frank),
            (claire_image, claire),
        ])),
    };

    Fixture {
        router: gallery_router(state),
        issuer,
        frank_image,
        claire_image,
    }
}

async fn access_token_for(issuer: &TokenIssuer, username: &str) -> String {
    let subject = issuer
        .config()
        .user_by_username(username)
        .unwrap()
        .subject_id
        .clone();
    let scopes: Vec<String> = ["openid", "imagegalleryapi"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let code = issuer
        .issue_authorization_code(
            CLIENT_ID,
            &subject,
            REDIRECT,
            &scopes,
            Some(&code_challenge_s256(VERIFIER)),
        )
        .await
        .unwrap();
    issuer
        .exchange_authorization_code(&code, CLIENT_ID, CLIENT_SECRET, REDIRECT, Some(VERIFIER))
        .await
        .unwrap()
        .access_token
}

async fn send(router: &Router, request: Request<axum::body::Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

fn get_request(uri: &str, token: Option<&str>) -> Request<axum::body::Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(axum::body::Body::empty()).unwrap()
}

fn post_request(uri: &str, token: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(axum::body::Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_owner_reads_own_image() {
    let fx = fixture();
    let token = access_token_for(&fx.issuer, "Claire").await;

    let uri = format!("/api/images/{}", fx.claire_image);
    let response = send(&fx.router, get_request(&uri, Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_non_owner_gets_403() {
    let fx = fixture();
    let token = access_token_for(&fx.issuer, "Claire").await;

    let uri = format!("/api/images/{}", fx.frank_image);
    let response = send(&fx.router, get_request(&uri, Some(&token))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_missing_token_gets_401_with_challenge() {
    let fx = fixture();

    let uri = format!("/api/images/{}", fx.claire_image);
    let response = send(&fx.router, get_request(&uri, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
}

#[tokio::test]
async fn test_token_for_other_audience_gets_401() {
    let fx = fixture();
    // A token without the API scope has no matching audience
    let subject = fx
        .issuer
        .config()
        .user_by_username("Claire")
        .unwrap()
        .subject_id
        .clone();
    let code = fx
        .issuer
        .issue_authorization_code(
            CLIENT_ID,
            &subject,
            REDIRECT,
            &["openid".to_string(), "profile".to_string()],
            Some(&code_challenge_s256(VERIFIER)),
        )
        .await
        .unwrap();
    let token = fx
        .issuer
        .exchange_authorization_code(&code, CLIENT_ID, CLIENT_SECRET, REDIRECT, Some(VERIFIER))
        .await
        .unwrap()
        .access_token;

    let uri = format!("/api/images/{}", fx.claire_image);
    let response = send(&fx.router, get_request(&uri, Some(&token))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_paying_subscriber_orders_frame() {
    let fx = fixture();
    let token = access_token_for(&fx.issuer, "Claire").await;

    let response = send(&fx.router, post_request("/api/orders", &token)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_free_user_cannot_order_frame() {
    let fx = fixture();
    let token = access_token_for(&fx.issuer, "Frank").await;

    let response = send(&fx.router, post_request("/api/orders", &token)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
