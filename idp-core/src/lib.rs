//! # Marvin IDP Core
//!
//! OAuth2 / OpenID Connect token lifecycle core: a token issuer implementing
//! the authorization code (PKCE) and refresh token grants, a stateless token
//! validator, a transactional token store, and a claim-based authorization
//! policy engine, plus the axum HTTP surface for the token, discovery, and
//! userinfo endpoints.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use marvin_idp_core::{IdpConfig, InMemoryTokenStore, TokenIssuer};
//!
//! let config = Arc::new(IdpConfig::image_gallery_demo(
//!     "https://localhost:44318",
//!     b"signing-secret",
//! ));
//! let issuer = TokenIssuer::new(config, Arc::new(InMemoryTokenStore::new()));
//!
//! // After the login collaborator authenticates the user:
//! // let code = issuer.issue_authorization_code(...).await?;
//! // let tokens = issuer.exchange_authorization_code(...).await?;
//! ```
//!
//! The user-facing layer (login forms, consent, cookies, resource CRUD) is an
//! external collaborator; this crate only manages the token lifecycle and the
//! authorization decisions derived from validated tokens.

pub mod bearer;
pub mod claims;
pub mod config;
pub mod endpoints;
pub mod issuer;
pub mod jwt;
pub mod pkce;
pub mod policy;
pub mod store;

// Re-export main types
pub use bearer::{
    BearerError, WwwAuthenticate, authorize_request, extract_bearer, forbidden_response,
    require_scope, unauthorized_response,
};
pub use claims::{Claim, ClaimSet, claim_types};
pub use config::{
    ApiScope, ClientConfig, GrantType, IdentityScope, IdpConfig, User, hash_secret, scope_names,
    verify_secret,
};
pub use endpoints::{IdpState, OAuthErrorBody, TokenRequest, TokenResponse, oidc_router};
pub use issuer::{GrantError, IssuedTokenSet, TokenIssuer};
pub use jwt::{
    AccessTokenClaims, IdTokenClaims, SigningError, TokenSigner, TokenValidator, ValidationError,
};
pub use policy::{Policy, PolicyEngine, PolicyError, RequestContext, Requirement};
pub use store::{
    AuthorizationCodeRecord, InMemoryTokenStore, RefreshTokenRecord, TokenStore, TokenStoreError,
};
