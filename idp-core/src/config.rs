//! Provider configuration
//!
//! The entire provider configuration (registered clients, scopes, seeded
//! users, signing material, lifetimes) is built once at process start and
//! passed by reference into the issuer and policy engine. There is no
//! ambient/static configuration access at runtime.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::claims::{ClaimSet, claim_types};

/// Grant types a client may use at the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization code grant (with PKCE)
    AuthorizationCode,
    /// Refresh token grant
    RefreshToken,
}

/// A registered client, immutable after provider construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client identifier
    pub client_id: String,
    /// Human-readable client name
    pub client_name: String,
    /// SHA-256 digest of the client secret, base64url-encoded
    pub client_secret_hash: String,
    /// Grant types this client may use
    pub allowed_grant_types: Vec<GrantType>,
    /// Registered redirect URIs (exact match required)
    pub redirect_uris: Vec<String>,
    /// Registered post-logout redirect URIs
    pub post_logout_redirect_uris: Vec<String>,
    /// Scopes the client may request
    pub allowed_scopes: Vec<String>,
    /// Whether PKCE is mandatory for the authorization code grant
    pub require_pkce: bool,
    /// Whether the client may request refresh tokens (`offline_access`)
    pub allow_offline_access: bool,
    /// Access token lifetime in seconds
    pub access_token_lifetime_secs: u64,
    /// Absolute refresh token lifetime in seconds; rotation never extends it
    pub absolute_refresh_token_lifetime_secs: u64,
}

impl ClientConfig {
    /// Whether `uri` is a registered redirect URI
    pub fn allows_redirect(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }

    /// Whether every requested scope is covered by the registration
    ///
    /// `offline_access` is governed by the `allow_offline_access` flag rather
    /// than the scope list.
    pub fn allows_scopes<'a, I>(&self, scopes: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        scopes.into_iter().all(|s| {
            if s == scope_names::OFFLINE_ACCESS {
                self.allow_offline_access
            } else {
                self.allowed_scopes.iter().any(|allowed| allowed == s)
            }
        })
    }

    /// Whether the client may use the given grant type
    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.allowed_grant_types.contains(&grant)
    }
}

/// An identity resource: a scope releasing identity claims via id token/userinfo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityScope {
    /// Scope name requested by clients
    pub name: String,
    /// Display name
    pub display_name: String,
    /// Claim types released when this scope is granted
    pub claim_types: Vec<String>,
}

/// An API resource: a scope naming an audience and the claims copied into access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiScope {
    /// Scope name, also used as the token audience
    pub name: String,
    /// Display name
    pub display_name: String,
    /// Claim types embedded in access tokens carrying this scope
    pub claim_types: Vec<String>,
}

/// A seeded user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Stable opaque subject identifier
    pub subject_id: String,
    /// Login name
    pub username: String,
    /// SHA-256 digest of the password, base64url-encoded
    pub password_hash: String,
    /// Identity claims for this user
    pub claims: ClaimSet,
}

/// Well-known scope name constants
pub mod scope_names {
    /// Mandatory OIDC scope releasing the subject identifier
    pub const OPENID: &str = "openid";
    /// Profile claims (given name, family name)
    pub const PROFILE: &str = "profile";
    /// Address claim
    pub const ADDRESS: &str = "address";
    /// Role claims
    pub const ROLES: &str = "roles";
    /// Subscription tier claim
    pub const SUBSCRIPTION_LEVEL: &str = "subscription_level";
    /// Country claim
    pub const COUNTRY: &str = "country";
    /// Requests a refresh token
    pub const OFFLINE_ACCESS: &str = "offline_access";
}

/// Full provider configuration, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpConfig {
    /// Issuer identifier placed in the `iss` claim and discovery document
    pub issuer: String,
    /// HMAC signing secret for HS256 token signatures
    pub signing_secret: Vec<u8>,
    /// Authorization code lifetime in seconds
    pub authorization_code_lifetime_secs: u64,
    /// Registered clients
    pub clients: Vec<ClientConfig>,
    /// Identity resources
    pub identity_scopes: Vec<IdentityScope>,
    /// API resources
    pub api_scopes: Vec<ApiScope>,
    /// Seeded users
    pub users: Vec<User>,
}

impl IdpConfig {
    /// Look up a registered client
    pub fn client(&self, client_id: &str) -> Option<&ClientConfig> {
        self.clients.iter().find(|c| c.client_id == client_id)
    }

    /// Look up an identity scope by name
    pub fn identity_scope(&self, name: &str) -> Option<&IdentityScope> {
        self.identity_scopes.iter().find(|s| s.name == name)
    }

    /// Look up an API scope by name
    pub fn api_scope(&self, name: &str) -> Option<&ApiScope> {
        self.api_scopes.iter().find(|s| s.name == name)
    }

    /// Look up a user by subject identifier
    pub fn user_by_subject(&self, subject_id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.subject_id == subject_id)
    }

    /// Look up a user by username
    pub fn user_by_username(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username == username)
    }

    /// All scope names advertised in the discovery document
    pub fn supported_scopes(&self) -> Vec<&str> {
        self.identity_scopes
            .iter()
            .map(|s| s.name.as_str())
            .chain(self.api_scopes.iter().map(|s| s.name.as_str()))
            .chain([scope_names::OFFLINE_ACCESS])
            .collect()
    }

    /// Demo configuration mirroring the image gallery system
    ///
    /// One confidential client, the standard identity scopes, one API scope,
    /// and two seeded users. Lifetimes are deliberately short so refresh is
    /// exercised often.
    pub fn image_gallery_demo(issuer: impl Into<String>, signing_secret: &[u8]) -> Self {
        Self {
            issuer: issuer.into(),
            signing_secret: signing_secret.to_vec(),
            authorization_code_lifetime_secs: 300,
            clients: vec![ClientConfig {
                client_id: "imagegalleryclient".to_string(),
                client_name: "Image Gallery".to_string(),
                client_secret_hash: hash_secret("secret"),
                allowed_grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
                redirect_uris: vec!["https://localhost:44389/signin-oidc".to_string()],
                post_logout_redirect_uris: vec![
                    "https://localhost:44389/signout-callback-oidc".to_string(),
                ],
                allowed_scopes: vec![
                    scope_names::OPENID.to_string(),
                    scope_names::PROFILE.to_string(),
                    scope_names::ADDRESS.to_string(),
                    scope_names::ROLES.to_string(),
                    "imagegalleryapi".to_string(),
                    scope_names::SUBSCRIPTION_LEVEL.to_string(),
                    scope_names::COUNTRY.to_string(),
                ],
                require_pkce: true,
                allow_offline_access: true,
                access_token_lifetime_secs: 120,
                absolute_refresh_token_lifetime_secs: 600,
            }],
            identity_scopes: vec![
                IdentityScope {
                    name: scope_names::OPENID.to_string(),
                    display_name: "Your user identifier".to_string(),
                    claim_types: vec![claim_types::SUB.to_string()],
                },
                IdentityScope {
                    name: scope_names::PROFILE.to_string(),
                    display_name: "User profile".to_string(),
                    claim_types: vec![
                        claim_types::GIVEN_NAME.to_string(),
                        claim_types::FAMILY_NAME.to_string(),
                    ],
                },
                IdentityScope {
                    name: scope_names::ADDRESS.to_string(),
                    display_name: "Your address".to_string(),
                    claim_types: vec![claim_types::ADDRESS.to_string()],
                },
                IdentityScope {
                    name: scope_names::ROLES.to_string(),
                    display_name: "Roles".to_string(),
                    claim_types: vec![claim_types::ROLE.to_string()],
                },
                IdentityScope {
                    name: scope_names::SUBSCRIPTION_LEVEL.to_string(),
                    display_name: "Subscription level".to_string(),
                    claim_types: vec![claim_types::SUBSCRIPTION_LEVEL.to_string()],
                },
                IdentityScope {
                    name: scope_names::COUNTRY.to_string(),
                    display_name: "Country".to_string(),
                    claim_types: vec![claim_types::COUNTRY.to_string()],
                },
            ],
            api_scopes: vec![ApiScope {
                name: "imagegalleryapi".to_string(),
                display_name: "Image Gallery API".to_string(),
                claim_types: vec![claim_types::ROLE.to_string()],
            }],
            users: vec![
                User {
                    subject_id: "f368a2f6-3a56-441f-8b06-25272acc5ce7".to_string(),
                    username: "Frank".to_string(),
                    password_hash: hash_secret("password"),
                    claims: ClaimSet::from_pairs([
                        (claim_types::GIVEN_NAME, "Frank"),
                        (claim_types::FAMILY_NAME, "Underwood"),
                        (claim_types::ADDRESS, "Main Street 1"),
                        (claim_types::ROLE, "FreeUser"),
                        (claim_types::SUBSCRIPTION_LEVEL, "FreeUser"),
                        (claim_types::COUNTRY, "be"),
                    ]),
                },
                User {
                    subject_id: "9cca3868-4c09-4104-bab5-14b06f9e61bd".to_string(),
                    username: "Claire".to_string(),
                    password_hash: hash_secret("password"),
                    claims: ClaimSet::from_pairs([
                        (claim_types::GIVEN_NAME, "Claire"),
                        (claim_types::FAMILY_NAME, "Underwood"),
                        (claim_types::ADDRESS, "Big Road 13"),
                        (claim_types::ROLE, "PayingUser"),
                        (claim_types::SUBSCRIPTION_LEVEL, "PayingUser"),
                        (claim_types::COUNTRY, "be"),
                    ]),
                },
            ],
        }
    }
}

/// Hash a secret for storage: base64url-encoded SHA-256
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    base64_url::encode(&hasher.finalize())
}

/// Verify a presented secret against a stored hash in constant time
pub fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    let computed = hash_secret(secret);
    computed.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_hash_round_trip() {
        let hash = hash_secret("secret");
        assert!(verify_secret("secret", &hash));
        assert!(!verify_secret("wrong", &hash));
    }

    #[test]
    fn test_demo_config_lookups() {
        let config = IdpConfig::image_gallery_demo("https://localhost:44318", b"test-secret");

        let client = config.client("imagegalleryclient").unwrap();
        assert!(client.require_pkce);
        assert_eq!(client.access_token_lifetime_secs, 120);
        assert_eq!(client.absolute_refresh_token_lifetime_secs, 600);

        assert!(config.client("unknown").is_none());
        assert!(config.user_by_username("Claire").is_some());
        assert!(config.api_scope("imagegalleryapi").is_some());
    }

    #[test]
    fn test_scope_subset_check() {
        let config = IdpConfig::image_gallery_demo("https://localhost:44318", b"test-secret");
        let client = config.client("imagegalleryclient").unwrap();

        assert!(client.allows_scopes(["openid", "profile", "imagegalleryapi"]));
        assert!(client.allows_scopes(["offline_access"]));
        assert!(!client.allows_scopes(["openid", "admin_api"]));
    }

    #[test]
    fn test_redirect_uri_exact_match() {
        let config = IdpConfig::image_gallery_demo("https://localhost:44318", b"test-secret");
        let client = config.client("imagegalleryclient").unwrap();

        assert!(client.allows_redirect("https://localhost:44389/signin-oidc"));
        assert!(!client.allows_redirect("https://localhost:44389/signin-oidc/"));
        assert!(!client.allows_redirect("https://evil.example/signin-oidc"));
    }
}
