//! # Marvin IDP Client
//!
//! Client-side bearer token management for services calling APIs protected by
//! a Marvin IDP issuer: a per-session token cache, a refresh transport that
//! speaks the OAuth2 refresh token grant over HTTP, and an interceptor that
//! attaches a valid access token to outbound requests, renewing it
//! transparently ahead of expiry.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use marvin_idp_client::{BearerTokenInterceptor, HttpRefreshTransport, SessionTokenCache};
//!
//! let cache = Arc::new(SessionTokenCache::new());
//! let transport = HttpRefreshTransport::new(
//!     "https://localhost:44318".parse()?,
//!     "imagegalleryclient",
//!     "secret",
//! );
//! let interceptor = BearerTokenInterceptor::new(cache, transport);
//!
//! let request = http.get("https://localhost:44366/api/images");
//! let request = interceptor.attach("session-1", request).await?;
//! ```
//!
//! This crate deliberately has no dependency on the issuer: it only consumes
//! the wire contract (discovery document, token endpoint, RFC 6749 errors).

pub mod interceptor;
pub mod token_cache;
pub mod transport;

// Re-export main types
pub use interceptor::{AttachError, BearerTokenInterceptor, DEFAULT_REFRESH_MARGIN_SECS};
pub use token_cache::{SessionTokenCache, TokenSet};
pub use transport::{
    DiscoveryDocument, HttpRefreshTransport, RefreshError, RefreshTransport, RefreshedTokens,
};
