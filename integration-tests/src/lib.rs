//! Integration tests for the Marvin IDP issuer and client crates
//!
//! These tests run the issuer's HTTP surface on a loopback listener and
//! exercise the full grant flows over the wire, including the client crate's
//! refresh transport and bearer interceptor against a live issuer.

#![allow(unused_imports)] // Allow unused imports in integration tests
#![allow(clippy::uninlined_format_args)] // Allow traditional format strings in tests

pub mod client_refresh_integration;
pub mod protected_api_integration;
pub mod token_flow_integration;

/// Common test utilities for integration tests
pub mod test_utils {
    use marvin_idp_core::{IdpConfig, IdpState, InMemoryTokenStore, TokenIssuer, oidc_router};
    use marvin_idp_core::pkce::code_challenge_s256;
    use std::sync::Arc;
    use tokio::task::JoinHandle;

    /// Demo client registration used across the integration tests
    pub const CLIENT_ID: &str = "imagegalleryclient";
    /// Demo client secret
    pub const CLIENT_SECRET: &str = "secret";
    /// Registered redirect URI of the demo client
    pub const REDIRECT: &str = "https://localhost:44389/signin-oidc";
    /// RFC 7636 Appendix B code verifier
    pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

    /// Install a log subscriber for test debugging; safe to call repeatedly
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// A live issuer bound to an ephemeral loopback port
    pub struct TestIdp {
        /// Base URL of the running issuer (also its configured issuer id)
        pub base_url: String,
        /// Direct handle to the authorization-server core
        pub issuer: Arc<TokenIssuer>,
        server: JoinHandle<()>,
    }

    impl Drop for TestIdp {
        fn drop(&mut self) {
            self.server.abort();
        }
    }

    /// Start the issuer's HTTP surface on an ephemeral loopback port
    pub async fn spawn_idp() -> TestIdp {
        init_tracing();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener address");
        let base_url = format!("http://{addr}");

        let config = Arc::new(IdpConfig::image_gallery_demo(
            &base_url,
            b"integration-signing-secret",
        ));
        let issuer = Arc::new(TokenIssuer::new(
            config,
            Arc::new(InMemoryTokenStore::new()),
        ));
        let router = oidc_router(IdpState::new(issuer.clone()));
        let server = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                tracing::error!(%err, "test issuer stopped");
            }
        });

        TestIdp {
            base_url,
            issuer,
            server,
        }
    }

    /// Authenticate a demo user and issue an authorization code directly
    /// through the issuer core (the login UI is out of scope here)
    pub async fn login_code(idp: &TestIdp, username: &str, scopes: &[&str]) -> String {
        let subject = idp
            .issuer
            .config()
            .user_by_username(username)
            .expect("demo user exists")
            .subject_id
            .clone();
        let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        idp.issuer
            .issue_authorization_code(
                CLIENT_ID,
                &subject,
                REDIRECT,
                &scopes,
                Some(&code_challenge_s256(VERIFIER)),
            )
            .await
            .expect("issue authorization code")
    }

    /// Redeem an authorization code at the live token endpoint
    pub async fn exchange_code_over_http(
        http: &reqwest::Client,
        base_url: &str,
        code: &str,
    ) -> (reqwest::StatusCode, serde_json::Value) {
        let response = http
            .post(format!("{base_url}/connect/token"))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", REDIRECT),
                ("code_verifier", VERIFIER),
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
            ])
            .send()
            .await
            .expect("token endpoint reachable");
        let status = response.status();
        let body = response.json().await.expect("token endpoint answers JSON");
        (status, body)
    }

    /// Call the refresh grant at the live token endpoint
    pub async fn refresh_over_http(
        http: &reqwest::Client,
        base_url: &str,
        refresh_token: &str,
    ) -> (reqwest::StatusCode, serde_json::Value) {
        let response = http
            .post(format!("{base_url}/connect/token"))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
            ])
            .send()
            .await
            .expect("token endpoint reachable");
        let status = response.status();
        let body = response.json().await.expect("token endpoint answers JSON");
        (status, body)
    }
}
