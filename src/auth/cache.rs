//! In-memory token cache keyed by (resource, client, account).

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::secure::SecureString;

/// Identifies the single live entry a token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub resource: String,
    pub client_id: String,
    pub account: String,
}

impl CacheKey {
    pub fn new(
        resource: impl Into<String>,
        client_id: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            client_id: client_id.into(),
            account: account.into(),
        }
    }
}

/// A previously issued access token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenCacheEntry {
    pub key: CacheKey,
    pub access_token: SecureString,
    /// Displayable identifier of the signed-in user (usually the UPN).
    pub display_id: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenCacheEntry {
    /// Check if the token has expired as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Token cache. Owned by the authentication context.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: HashMap<CacheKey, TokenCacheEntry>,
}

impl TokenCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry for `key` if it has not expired.
    pub fn lookup(&self, key: &CacheKey) -> Option<&TokenCacheEntry> {
        self.lookup_at(key, Utc::now())
    }

    /// Get the entry for `key` if it has not expired as of `now`.
    pub fn lookup_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<&TokenCacheEntry> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
    }

    /// Insert or replace the entry for its key. Last write wins.
    pub fn store(&mut self, entry: TokenCacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_entry(account: &str, token: &str, expires_at: DateTime<Utc>) -> TokenCacheEntry {
        TokenCacheEntry {
            key: CacheKey::new("https://graph.windows.net/", "client", account),
            access_token: SecureString::from(token),
            display_id: format!("{}@contoso.com", account),
            expires_at,
        }
    }

    #[test]
    fn test_cache_empty() {
        let cache = TokenCache::new();
        let key = CacheKey::new("https://graph.windows.net/", "client", "alice");
        assert!(cache.lookup(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_then_lookup() {
        let mut cache = TokenCache::new();
        let entry = make_entry("alice", "token-1", Utc::now() + Duration::hours(1));

        cache.store(entry.clone());

        let cached = cache.lookup(&entry.key);
        assert_eq!(cached, Some(&entry));
    }

    #[test]
    fn test_store_overwrites() {
        let mut cache = TokenCache::new();
        let expiry = Utc::now() + Duration::hours(1);
        cache.store(make_entry("alice", "token-1", expiry));
        cache.store(make_entry("alice", "token-2", expiry));

        assert_eq!(cache.len(), 1);
        let key = CacheKey::new("https://graph.windows.net/", "client", "alice");
        assert_eq!(cache.lookup(&key).unwrap().access_token.as_str(), "token-2");
    }

    #[test]
    fn test_expired_entry_not_returned() {
        let mut cache = TokenCache::new();
        let now = Utc::now();
        let entry = make_entry("alice", "token-1", now + Duration::minutes(5));
        cache.store(entry.clone());

        assert!(cache.lookup_at(&entry.key, now).is_some());
        assert!(cache.lookup_at(&entry.key, now + Duration::minutes(5)).is_none());
        // lookup does not evict
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_keys_are_distinct() {
        let mut cache = TokenCache::new();
        let expiry = Utc::now() + Duration::hours(1);
        cache.store(make_entry("alice", "token-a", expiry));
        cache.store(make_entry("bob", "token-b", expiry));

        let other_client = CacheKey::new("https://graph.windows.net/", "other", "alice");
        assert!(cache.lookup(&other_client).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut cache = TokenCache::new();
        cache.store(make_entry("alice", "token-1", Utc::now() + Duration::hours(1)));

        cache.clear();
        assert!(cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }
}
