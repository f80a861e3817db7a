use std::future::Future;
use std::sync::Arc;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::clock::Clock;
use crate::errors::ProviderError;

use super::{CacheMode, CacheStore, CacheTtls, TtlTier};

/// A value served through the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cached<T> {
    pub value: T,
    /// Served from the cache instead of the provider.
    pub from_cache: bool,
    /// Served from an expired entry because the provider failed.
    pub degraded: bool,
}

impl<T> Cached<T> {
    pub fn fresh(value: T) -> Self {
        Self {
            value,
            from_cache: false,
            degraded: false,
        }
    }
}

/// Typed access to a [`CacheStore`] with TTL tiers and stale fallback.
///
/// Values are stored as JSON. An entry past its TTL is never returned by
/// [`lookup`](Self::lookup); it can only come back through
/// [`fallback`](Self::fallback), which is disabled unless
/// `fallback_on_error` was set.
#[derive(Clone)]
pub struct CacheGateway {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    ttls: CacheTtls,
    fallback_on_error: bool,
}

impl CacheGateway {
    pub fn new(
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        ttls: CacheTtls,
        fallback_on_error: bool,
    ) -> Self {
        Self {
            store,
            clock,
            ttls,
            fallback_on_error,
        }
    }

    pub fn fallback_enabled(&self) -> bool {
        self.fallback_on_error
    }

    /// Fresh cached value for `key`, if any.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.store.get(key).await?;
        if !entry.is_fresh(self.clock.now()) {
            return None;
        }
        decode(key, &entry.value)
    }

    /// Expired-or-fresh value for `key` when stale fallback is enabled.
    pub async fn fallback<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.fallback_on_error {
            return None;
        }
        let entry = self.store.get(key).await?;
        decode(key, &entry.value)
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T, tier: TtlTier) {
        match serde_json::to_string(value) {
            Ok(json) => self.store.set(key, json, self.ttls.ttl(tier)).await,
            Err(err) => warn!("Cache: could not encode value for '{}': {}", key, err),
        }
    }

    pub async fn invalidate(&self, pattern: &str) -> usize {
        let removed = self.store.invalidate(pattern).await;
        if removed > 0 {
            debug!("Cache: invalidated {} entries for '{}'", removed, pattern);
        }
        removed
    }

    /// Serve `key` from the cache or load it with `fetch`.
    ///
    /// - Fresh hit (mode `Use`): returned without calling `fetch`.
    /// - Miss, expiry, or mode `Refresh`: `fetch` is called and the result
    ///   written through with the tier's TTL (not for `Bypass`).
    /// - `fetch` fails and fallback is enabled: any existing entry is
    ///   returned with `degraded = true`; otherwise the error propagates.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        tier: TtlTier,
        mode: CacheMode,
        fetch: F,
    ) -> Result<Cached<T>, ProviderError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if mode == CacheMode::Use {
            if let Some(value) = self.lookup(key).await {
                debug!("Cache: hit for '{}'", key);
                return Ok(Cached {
                    value,
                    from_cache: true,
                    degraded: false,
                });
            }
        }

        match fetch().await {
            Ok(value) => {
                if mode != CacheMode::Bypass {
                    self.put(key, &value, tier).await;
                }
                Ok(Cached::fresh(value))
            }
            Err(err) => match self.fallback(key).await {
                Some(value) => {
                    warn!("Cache: serving stale '{}' after provider error: {}", key, err);
                    Ok(Cached {
                        value,
                        from_cache: true,
                        degraded: true,
                    })
                }
                None => Err(err),
            },
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, json: &str) -> Option<T> {
    match serde_json::from_str(json) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("Cache: dropping undecodable entry '{}': {}", key, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn gateway(fallback_on_error: bool) -> (CacheGateway, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryCacheStore::new(clock.clone()));
        (
            CacheGateway::new(store, clock.clone(), CacheTtls::default(), fallback_on_error),
            clock,
        )
    }

    fn failure() -> ProviderError {
        ProviderError::from_status("TEST", 503, "", None)
    }

    #[tokio::test]
    async fn test_hit_within_ttl_skips_fetch() {
        let (gw, clock) = gateway(false);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProviderError>(42u32)
        };

        let first = gw
            .get_or_fetch("k", TtlTier::Live, CacheMode::Use, fetch)
            .await
            .unwrap();
        assert!(!first.from_cache);

        clock.advance(Duration::from_secs(59));
        let second = gw
            .get_or_fetch("k", TtlTier::Live, CacheMode::Use, fetch)
            .await
            .unwrap();
        assert_eq!(second.value, 42);
        assert!(second.from_cache);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_fetch() {
        let (gw, clock) = gateway(false);
        gw.put("k", &1u32, TtlTier::Live).await;

        clock.advance(Duration::from_secs(60));
        let result = gw
            .get_or_fetch("k", TtlTier::Live, CacheMode::Use, || async {
                Ok::<_, ProviderError>(2u32)
            })
            .await
            .unwrap();
        assert_eq!(result, Cached::fresh(2));
        assert_eq!(gw.lookup::<u32>("k").await, Some(2));
    }

    #[tokio::test]
    async fn test_stable_tier_outlives_live_tier() {
        let (gw, clock) = gateway(false);
        gw.put("live", &1u32, TtlTier::Live).await;
        gw.put("stable", &1u32, TtlTier::Stable).await;

        clock.advance(Duration::from_secs(600));
        assert_eq!(gw.lookup::<u32>("live").await, None);
        assert_eq!(gw.lookup::<u32>("stable").await, Some(1));
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_served_without_fallback() {
        let (gw, clock) = gateway(false);
        gw.put("k", &1u32, TtlTier::Live).await;
        clock.advance(Duration::from_secs(120));

        let result = gw
            .get_or_fetch("k", TtlTier::Live, CacheMode::Use, || async {
                Err::<u32, _>(failure())
            })
            .await;
        assert_eq!(result.unwrap_err(), failure());
    }

    #[tokio::test]
    async fn test_fallback_serves_stale_value_flagged_degraded() {
        let (gw, clock) = gateway(true);
        gw.put("k", &7u32, TtlTier::Live).await;
        clock.advance(Duration::from_secs(120));

        let result = gw
            .get_or_fetch("k", TtlTier::Live, CacheMode::Use, || async {
                Err::<u32, _>(failure())
            })
            .await
            .unwrap();
        assert_eq!(result.value, 7);
        assert!(result.degraded);
    }

    #[tokio::test]
    async fn test_refresh_ignores_fresh_entry_and_bypass_does_not_write() {
        let (gw, _) = gateway(false);
        gw.put("k", &1u32, TtlTier::Live).await;

        let refreshed = gw
            .get_or_fetch("k", TtlTier::Live, CacheMode::Refresh, || async {
                Ok::<_, ProviderError>(2u32)
            })
            .await
            .unwrap();
        assert!(!refreshed.from_cache);
        assert_eq!(gw.lookup::<u32>("k").await, Some(2));

        gw.get_or_fetch("k", TtlTier::Live, CacheMode::Bypass, || async {
            Ok::<_, ProviderError>(3u32)
        })
        .await
        .unwrap();
        assert_eq!(gw.lookup::<u32>("k").await, Some(2));
    }
}
