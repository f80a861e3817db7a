//! Fixed-window credit rate limiter for market data providers.
//!
//! Each provider gets a budget of `credits` per `window`. A window starts
//! with the first reservation after the previous one expired; when a
//! reservation doesn't fit, the caller either fails fast with the time until
//! reset or waits for it, depending on [`RateLimitPolicy`].
//!
//! Window state lives in a [`WindowStore`]. [`InMemoryWindowStore`] covers a
//! single process; a database-backed store makes the budget hold across
//! processes sharing one API key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::clock::{add_duration, elapsed_between, Clock};
use crate::errors::ProviderError;

/// Default budget: 8 credits per 60 seconds.
pub const DEFAULT_WINDOW_CREDITS: u32 = 8;

/// Default window width.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// What to do when a reservation doesn't fit in the current window.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPolicy {
    /// Return [`ProviderError::RateLimited`] immediately.
    #[default]
    FailFast,
    /// Sleep until the window resets, then try again.
    Block,
}

impl std::str::FromStr for RateLimitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_fast" | "fail-fast" | "failfast" => Ok(Self::FailFast),
            "block" => Ok(Self::Block),
            other => Err(format!("unknown rate limit policy '{}'", other)),
        }
    }
}

/// Rate limiter configuration for a provider.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Credits available per window.
    pub credits: u32,
    /// Window width.
    pub window: Duration,
    pub policy: RateLimitPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            credits: DEFAULT_WINDOW_CREDITS,
            window: DEFAULT_WINDOW,
            policy: RateLimitPolicy::default(),
        }
    }
}

/// State of one provider's current window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitWindow {
    pub provider: String,
    pub window_start: DateTime<Utc>,
    pub credits_consumed: u32,
    pub credits_limit: u32,
    #[serde(with = "duration_secs")]
    pub window_width: Duration,
}

impl RateLimitWindow {
    pub fn fresh(provider: &str, now: DateTime<Utc>, limit: u32, width: Duration) -> Self {
        Self {
            provider: provider.to_string(),
            window_start: now,
            credits_consumed: 0,
            credits_limit: limit,
            window_width: width,
        }
    }

    pub fn resets_at(&self) -> DateTime<Utc> {
        add_duration(self.window_start, self.window_width)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.resets_at()
    }

    pub fn remaining(&self) -> u32 {
        self.credits_limit.saturating_sub(self.credits_consumed)
    }

    /// Apply a reservation of `cost` credits at `now`.
    ///
    /// Rolls the window over when expired. Never lets `credits_consumed`
    /// exceed `credits_limit`.
    pub fn reserve(&mut self, cost: u32, now: DateTime<Utc>) -> Reservation {
        if self.is_expired(now) {
            self.window_start = now;
            self.credits_consumed = 0;
        }

        if cost <= self.remaining() {
            self.credits_consumed += cost;
            Reservation::Granted(self.clone())
        } else {
            Reservation::Denied {
                retry_after: elapsed_between(now, self.resets_at()),
                window: self.clone(),
            }
        }
    }
}

/// Outcome of a reservation attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reservation {
    Granted(RateLimitWindow),
    Denied {
        window: RateLimitWindow,
        retry_after: Duration,
    },
}

impl Reservation {
    /// Window state after the attempt.
    pub fn window(&self) -> &RateLimitWindow {
        match self {
            Reservation::Granted(window) | Reservation::Denied { window, .. } => window,
        }
    }
}

/// Persistence for rate-limit windows.
///
/// `reserve` must be atomic with respect to other reservations for the same
/// provider, including ones made by other processes when the store is shared.
#[async_trait]
pub trait WindowStore: Send + Sync {
    async fn reserve(
        &self,
        provider: &str,
        cost: u32,
        limit: u32,
        width: Duration,
        now: DateTime<Utc>,
    ) -> Result<Reservation, ProviderError>;

    /// Current window, or `None` if the provider has never reserved.
    async fn current(&self, provider: &str) -> Result<Option<RateLimitWindow>, ProviderError>;

    async fn reset(&self, provider: &str) -> Result<(), ProviderError>;
}

/// Process-local window store.
#[derive(Default)]
pub struct InMemoryWindowStore {
    windows: Mutex<HashMap<String, RateLimitWindow>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn reserve(
        &self,
        provider: &str,
        cost: u32,
        limit: u32,
        width: Duration,
        now: DateTime<Utc>,
    ) -> Result<Reservation, ProviderError> {
        let mut windows = self.windows.lock().await;
        let window = windows
            .entry(provider.to_string())
            .or_insert_with(|| RateLimitWindow::fresh(provider, now, limit, width));
        // Config changes take effect on the live window.
        window.credits_limit = limit;
        window.window_width = width;
        Ok(window.reserve(cost, now))
    }

    async fn current(&self, provider: &str) -> Result<Option<RateLimitWindow>, ProviderError> {
        Ok(self.windows.lock().await.get(provider).cloned())
    }

    async fn reset(&self, provider: &str) -> Result<(), ProviderError> {
        self.windows.lock().await.remove(provider);
        Ok(())
    }
}

/// Diagnostics view of a limiter.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSnapshot {
    pub provider: String,
    pub policy: RateLimitPolicy,
    pub credits_limit: u32,
    pub credits_remaining: u32,
    #[serde(with = "duration_secs")]
    pub window_width: Duration,
    pub resets_at: Option<DateTime<Utc>>,
}

/// Rate limiter for a single provider.
pub struct RateLimiter {
    provider: String,
    config: RateLimitConfig,
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(
        provider: impl Into<String>,
        config: RateLimitConfig,
        store: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider: provider.into(),
            config,
            store,
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Reserve `cost` credits according to the configured policy.
    pub async fn acquire(&self, cost: u32) -> Result<RateLimitWindow, ProviderError> {
        match self.config.policy {
            RateLimitPolicy::FailFast => self.try_acquire(cost).await,
            RateLimitPolicy::Block => self.acquire_blocking(cost).await,
        }
    }

    /// Reserve `cost` credits or fail with the time until the window resets.
    pub async fn try_acquire(&self, cost: u32) -> Result<RateLimitWindow, ProviderError> {
        self.check_cost(cost)?;
        match self.reserve(cost).await? {
            Reservation::Granted(window) => {
                debug!(
                    "Rate limiter: reserved {} credit(s) for '{}' ({}/{})",
                    cost, self.provider, window.credits_consumed, window.credits_limit
                );
                Ok(window)
            }
            Reservation::Denied { retry_after, .. } => {
                warn!(
                    "Rate limiter: window exhausted for '{}', resets in {:?}",
                    self.provider, retry_after
                );
                Err(ProviderError::RateLimited {
                    provider: self.provider.clone(),
                    retry_after,
                })
            }
        }
    }

    /// Reserve `cost` credits, waiting for window resets as needed.
    pub async fn acquire_blocking(&self, cost: u32) -> Result<RateLimitWindow, ProviderError> {
        self.check_cost(cost)?;
        loop {
            match self.reserve(cost).await? {
                Reservation::Granted(window) => return Ok(window),
                Reservation::Denied { retry_after, .. } => {
                    debug!(
                        "Rate limiter: waiting {:?} for provider '{}'",
                        retry_after, self.provider
                    );
                    // A zero wait would spin if the store clock lags ours.
                    tokio::time::sleep(retry_after.max(Duration::from_millis(10))).await;
                }
            }
        }
    }

    /// Credits still available in the current window.
    pub async fn headroom(&self) -> Result<u32, ProviderError> {
        let now = self.clock.now();
        Ok(match self.store.current(&self.provider).await? {
            Some(window) if !window.is_expired(now) => {
                self.config.credits.saturating_sub(window.credits_consumed)
            }
            _ => self.config.credits,
        })
    }

    pub async fn snapshot(&self) -> Result<RateLimitSnapshot, ProviderError> {
        let now = self.clock.now();
        let window = self
            .store
            .current(&self.provider)
            .await?
            .filter(|w| !w.is_expired(now));

        Ok(RateLimitSnapshot {
            provider: self.provider.clone(),
            policy: self.config.policy,
            credits_limit: self.config.credits,
            credits_remaining: window
                .as_ref()
                .map(|w| self.config.credits.saturating_sub(w.credits_consumed))
                .unwrap_or(self.config.credits),
            window_width: self.config.window,
            resets_at: window.map(|w| w.resets_at()),
        })
    }

    pub async fn reset(&self) -> Result<(), ProviderError> {
        self.store.reset(&self.provider).await
    }

    async fn reserve(&self, cost: u32) -> Result<Reservation, ProviderError> {
        self.store
            .reserve(
                &self.provider,
                cost,
                self.config.credits,
                self.config.window,
                self.clock.now(),
            )
            .await
    }

    fn check_cost(&self, cost: u32) -> Result<(), ProviderError> {
        if cost > self.config.credits {
            return Err(ProviderError::Config {
                provider: self.provider.clone(),
                message: format!(
                    "request costs {} credits but the window only allows {}",
                    cost, self.config.credits
                ),
            });
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use chrono::TimeZone;

    fn limiter(credits: u32, policy: RateLimitPolicy) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap(),
        ));
        let limiter = RateLimiter::new(
            "TEST_PROVIDER",
            RateLimitConfig {
                credits,
                window: Duration::from_secs(60),
                policy,
            },
            Arc::new(InMemoryWindowStore::new()),
            clock.clone(),
        );
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_ninth_request_in_window_is_rejected_with_remaining_time() {
        let (limiter, clock) = limiter(8, RateLimitPolicy::FailFast);

        for _ in 0..8 {
            limiter.try_acquire(1).await.unwrap();
            clock.advance(Duration::from_secs(5));
        }

        let err = limiter.try_acquire(1).await.unwrap_err();
        // 8 requests 5s apart: the window opened 40s ago
        assert_eq!(
            err,
            ProviderError::RateLimited {
                provider: "TEST_PROVIDER".to_string(),
                retry_after: Duration::from_secs(20),
            }
        );
    }

    #[tokio::test]
    async fn test_window_resets_after_width() {
        let (limiter, clock) = limiter(2, RateLimitPolicy::FailFast);

        limiter.try_acquire(1).await.unwrap();
        limiter.try_acquire(1).await.unwrap();
        assert!(limiter.try_acquire(1).await.is_err());
        assert_eq!(limiter.headroom().await.unwrap(), 0);

        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.headroom().await.unwrap(), 2);
        let window = limiter.try_acquire(1).await.unwrap();
        assert_eq!(window.credits_consumed, 1);
    }

    #[tokio::test]
    async fn test_cost_is_charged_and_never_exceeds_limit() {
        let (limiter, _) = limiter(8, RateLimitPolicy::FailFast);

        limiter.try_acquire(5).await.unwrap();
        assert!(limiter.try_acquire(4).await.is_err());
        let window = limiter.try_acquire(3).await.unwrap();
        assert_eq!(window.credits_consumed, 8);
        assert_eq!(window.remaining(), 0);
    }

    #[tokio::test]
    async fn test_cost_above_window_is_config_error() {
        let (limiter, _) = limiter(8, RateLimitPolicy::FailFast);
        let err = limiter.try_acquire(9).await.unwrap_err();
        assert!(matches!(err, ProviderError::Config { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_reports_remaining_and_reset() {
        let (limiter, clock) = limiter(8, RateLimitPolicy::FailFast);
        let start = clock.now();

        let idle = limiter.snapshot().await.unwrap();
        assert_eq!(idle.credits_remaining, 8);
        assert_eq!(idle.resets_at, None);

        limiter.try_acquire(3).await.unwrap();
        let busy = limiter.snapshot().await.unwrap();
        assert_eq!(busy.credits_remaining, 5);
        assert_eq!(
            busy.resets_at,
            Some(add_duration(start, Duration::from_secs(60)))
        );
    }

    #[tokio::test]
    async fn test_providers_do_not_share_windows() {
        let store: Arc<dyn WindowStore> = Arc::new(InMemoryWindowStore::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let config = RateLimitConfig {
            credits: 1,
            ..Default::default()
        };
        let a = RateLimiter::new("PROVIDER_A", config.clone(), store.clone(), clock.clone());
        let b = RateLimiter::new("PROVIDER_B", config, store, clock);

        a.try_acquire(1).await.unwrap();
        assert!(a.try_acquire(1).await.is_err());
        assert!(b.try_acquire(1).await.is_ok());
    }

    #[tokio::test]
    async fn test_block_policy_waits_for_reset() {
        let limiter = RateLimiter::new(
            "BLOCKING_PROVIDER",
            RateLimitConfig {
                credits: 1,
                window: Duration::from_millis(50),
                policy: RateLimitPolicy::Block,
            },
            Arc::new(InMemoryWindowStore::new()),
            Arc::new(SystemClock),
        );

        limiter.acquire(1).await.unwrap();
        let start = std::time::Instant::now();
        limiter.acquire(1).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "fail_fast".parse::<RateLimitPolicy>().unwrap(),
            RateLimitPolicy::FailFast
        );
        assert_eq!(
            "BLOCK".parse::<RateLimitPolicy>().unwrap(),
            RateLimitPolicy::Block
        );
        assert!("sometimes".parse::<RateLimitPolicy>().is_err());
    }
}
