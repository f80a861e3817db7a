//! Read/write-through caching in front of provider calls.
//!
//! [`CacheStore`] is the storage contract (`get`, `set` with TTL,
//! `invalidate` by pattern). [`MemoryCacheStore`] is the in-process
//! implementation. [`CacheGateway`] applies the read path, write-through and
//! the opt-in stale fallback on provider failure.

mod gateway;

pub use gateway::{CacheGateway, Cached};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::clock::{add_duration, Clock};

/// How a single lookup uses the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present;
    /// otherwise fetch and write the response to the cache.
    #[default]
    Use,
    /// Always fetch, ignoring any cached entry, and write the result.
    Refresh,
    /// Always fetch; neither read nor write the cache.
    Bypass,
}

/// TTL tiers for cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlTier {
    /// Fast-moving data (latest quotes).
    Live,
    /// Slow-moving data (history, news).
    Stable,
}

/// Default TTL for [`TtlTier::Live`].
pub const DEFAULT_LIVE_TTL: Duration = Duration::from_secs(60);

/// Default TTL for [`TtlTier::Stable`].
pub const DEFAULT_STABLE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTtls {
    pub live: Duration,
    pub stable: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            live: DEFAULT_LIVE_TTL,
            stable: DEFAULT_STABLE_TTL,
        }
    }
}

impl CacheTtls {
    pub fn ttl(&self, tier: TtlTier) -> Duration {
        match tier {
            TtlTier::Live => self.live,
            TtlTier::Stable => self.stable,
        }
    }
}

/// A stored value with its timing metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub written_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Storage contract for cached values.
///
/// `get` returns entries even after they expire; freshness is decided by the
/// caller so an expired value can still back the stale fallback.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<CacheEntry>;

    async fn set(&self, key: &str, value: String, ttl: Duration);

    /// Remove every key matching `pattern` (`*` matches any run of
    /// characters). Returns the number of removed entries.
    async fn invalidate(&self, pattern: &str) -> usize;
}

/// Thread-safe in-memory cache.
///
/// Expired entries stay until overwritten, invalidated or purged.
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Drop entries that expired more than `grace` ago.
    pub async fn purge_expired(&self, grace: Duration) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| add_duration(entry.expires_at, grace) > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let now = self.clock.now();
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            written_at: now,
            expires_at: add_duration(now, ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn invalidate(&self, pattern: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !glob_match(pattern, key));
        before - entries.len()
    }
}

/// Minimal glob: `*` matches any (possibly empty) run of characters.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };

    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        // No `*` at all: exact match.
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn store() -> (MemoryCacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap(),
        ));
        (MemoryCacheStore::new(clock.clone()), clock)
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("quote:AAPL*", "quote:AAPL:latest"));
        assert!(glob_match("quote:AAPL*", "quote:AAPL"));
        assert!(!glob_match("quote:AAPL*", "quote:MSFT:latest"));
        assert!(glob_match("quote:*:latest", "quote:MSFT:latest"));
        assert!(!glob_match("quote:*:latest", "quote:MSFT:history"));
        assert!(glob_match("news:AAPL", "news:AAPL"));
        assert!(!glob_match("news:AAPL", "news:AAPL:2024"));
        assert!(glob_match("*", "anything"));
    }

    #[tokio::test]
    async fn test_entries_expire_but_are_kept() {
        let (store, clock) = store();
        store
            .set("quote:AAPL:latest", "{}".to_string(), Duration::from_secs(60))
            .await;

        let entry = store.get("quote:AAPL:latest").await.unwrap();
        assert!(entry.is_fresh(clock.now()));

        clock.advance(Duration::from_secs(60));
        let entry = store.get("quote:AAPL:latest").await.unwrap();
        assert!(!entry.is_fresh(clock.now()));
    }

    #[tokio::test]
    async fn test_invalidate_by_pattern() {
        let (store, _) = store();
        let ttl = Duration::from_secs(60);
        store.set("quote:AAPL:latest", "1".to_string(), ttl).await;
        store.set("quote:AAPL:history", "2".to_string(), ttl).await;
        store.set("quote:MSFT:latest", "3".to_string(), ttl).await;

        assert_eq!(store.invalidate("quote:AAPL*").await, 2);
        assert!(store.get("quote:AAPL:latest").await.is_none());
        assert!(store.get("quote:MSFT:latest").await.is_some());
    }

    #[tokio::test]
    async fn test_purge_expired_respects_grace() {
        let (store, clock) = store();
        store
            .set("a", "1".to_string(), Duration::from_secs(10))
            .await;
        store
            .set("b", "2".to_string(), Duration::from_secs(3600))
            .await;

        clock.advance(Duration::from_secs(20));
        assert_eq!(store.purge_expired(Duration::from_secs(60)).await, 0);
        clock.advance(Duration::from_secs(60));
        assert_eq!(store.purge_expired(Duration::from_secs(60)).await, 1);
        assert_eq!(store.len().await, 1);
    }
}
