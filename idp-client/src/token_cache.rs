//! Per-session token cache
//!
//! Each session holds one [`TokenSet`]; the whole bundle is replaced
//! atomically on refresh so a reader never observes a half-updated set.
//! Every session also carries a refresh lock so refreshes are serialized
//! per session (single-writer discipline).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// The token bundle a session persists between requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Signed id token
    pub id_token: String,
    /// Signed access token presented as the bearer credential
    pub access_token: String,
    /// Opaque rotating refresh token
    pub refresh_token: String,
    /// Access token expiry instant
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    /// Whether the access token is still comfortably inside its lifetime
    ///
    /// Fresh means `now < expires_at - margin`; anything closer to expiry
    /// (or past it) should be refreshed before use.
    pub fn is_fresh(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        now < self.expires_at - margin
    }
}

struct SessionEntry {
    tokens: TokenSet,
    refresh_lock: Arc<Mutex<()>>,
}

/// Session-keyed token storage
///
/// `store` replaces the cached set atomically; `refresh_lock` hands out the
/// per-session mutex that serializes refresh attempts.
#[derive(Default)]
pub struct SessionTokenCache {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionTokenCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or atomically replace a session's token set
    pub async fn store(&self, session_id: &str, tokens: TokenSet) {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(entry) => entry.tokens = tokens,
            None => {
                sessions.insert(
                    session_id.to_string(),
                    SessionEntry {
                        tokens,
                        refresh_lock: Arc::new(Mutex::new(())),
                    },
                );
            }
        }
    }

    /// The session's current token set, if any
    pub async fn current(&self, session_id: &str) -> Option<TokenSet> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|e| e.tokens.clone())
    }

    /// The session's refresh serialization lock
    pub async fn refresh_lock(&self, session_id: &str) -> Option<Arc<Mutex<()>>> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|e| e.refresh_lock.clone())
    }

    /// Drop a session (logout)
    pub async fn remove(&self, session_id: &str) -> Option<TokenSet> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id).map(|e| e.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(access: &str, ttl_secs: i64) -> TokenSet {
        TokenSet {
            id_token: "id".to_string(),
            access_token: access.to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
        }
    }

    #[test]
    fn test_freshness_margin() {
        let now = Utc::now();
        let set = tokens("a", 300);
        // 300s remaining with a 600s margin: stale, must refresh
        assert!(!set.is_fresh(Duration::seconds(600), now));
        // 300s remaining with a 60s margin: fresh
        assert!(set.is_fresh(Duration::seconds(60), now));
    }

    #[tokio::test]
    async fn test_store_replaces_whole_set() {
        let cache = SessionTokenCache::new();
        cache.store("session-1", tokens("old", 100)).await;
        cache.store("session-1", tokens("new", 200)).await;

        let current = cache.current("session-1").await.unwrap();
        assert_eq!(current.access_token, "new");
    }

    #[tokio::test]
    async fn test_refresh_lock_is_stable_across_store() {
        let cache = SessionTokenCache::new();
        cache.store("session-1", tokens("a", 100)).await;
        let lock_before = cache.refresh_lock("session-1").await.unwrap();
        cache.store("session-1", tokens("b", 100)).await;
        let lock_after = cache.refresh_lock("session-1").await.unwrap();
        assert!(Arc::ptr_eq(&lock_before, &lock_after));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let cache = SessionTokenCache::new();
        assert!(cache.current("nope").await.is_none());
        assert!(cache.refresh_lock("nope").await.is_none());
    }
}
