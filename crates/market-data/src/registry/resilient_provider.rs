//! Resilience pipeline around a single provider.
//!
//! [`ResilientProvider::execute`] is the only way a provider's transport is
//! invoked. Every call runs through the same steps:
//!
//! ```text
//! execute(request)
//!   1. CircuitBreaker::admit          deny  -> CircuitOpen (no network call)
//!   2. RateLimiter::acquire(cost)     deny  -> RateLimited(retry_after) or wait
//!   3. RetryPolicy::run(do_request)   each attempt under a hard timeout
//!   4. success -> breaker success, stats success
//!   5. failure -> stats error, typed error; the breaker only counts
//!      transient failures left after retries
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::clock::Clock;
use crate::errors::{ProviderError, RetryClass};
use crate::models::{ProviderRequest, ProviderResponse};
use crate::provider::{HealthStatus, MarketDataProvider, ProviderCapabilities};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
use super::rate_limiter::{RateLimitConfig, RateLimitSnapshot, RateLimiter, WindowStore};
use super::retry::RetryPolicy;
use super::stats::{ProviderStats, StatsTracker};

/// Default hard timeout for a single provider call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed to wrap one provider.
#[derive(Clone, Debug)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Read-only view of a provider's resilience state.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDiagnostics {
    pub provider: String,
    pub capabilities: ProviderCapabilities,
    pub health: HealthStatus,
    pub circuit: CircuitSnapshot,
    pub stats: ProviderStats,
    /// `None` when the window store could not be read.
    pub rate_limit: Option<RateLimitSnapshot>,
}

/// A provider wrapped with its circuit breaker, rate limiter, retry policy
/// and statistics. One instance per provider, shared via `Arc`.
pub struct ResilientProvider {
    provider: Arc<dyn MarketDataProvider>,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    retry: RetryPolicy,
    stats: StatsTracker,
    request_timeout: Duration,
    health: Mutex<HealthStatus>,
}

impl ResilientProvider {
    /// Wrap `provider`, validating its configuration first.
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        config: ResilienceConfig,
        window_store: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ProviderError> {
        provider.validate_config()?;

        let id = provider.id();
        if config.rate_limit.credits == 0 {
            return Err(ProviderError::Config {
                provider: id.to_string(),
                message: "rate limit must allow at least one credit per window".to_string(),
            });
        }
        info!(
            "Registering provider '{}' ({} credits/{:?}, breaker threshold {})",
            id,
            config.rate_limit.credits,
            config.rate_limit.window,
            config.circuit_breaker.failure_threshold
        );

        Ok(Self {
            breaker: CircuitBreaker::new(id, config.circuit_breaker, clock.clone()),
            limiter: RateLimiter::new(id, config.rate_limit, window_store, clock.clone()),
            retry: config.retry,
            stats: StatsTracker::new(id, clock),
            request_timeout: config.request_timeout,
            health: Mutex::new(HealthStatus::Unknown),
            provider,
        })
    }

    pub fn id(&self) -> &'static str {
        self.provider.id()
    }

    pub fn provider(&self) -> &dyn MarketDataProvider {
        self.provider.as_ref()
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        self.provider.capabilities()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Credits left in the current rate-limit window.
    pub async fn headroom(&self) -> Result<u32, ProviderError> {
        self.limiter.headroom().await
    }

    /// Run `request` through the full resilience pipeline.
    pub async fn execute(
        &self,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let id = self.provider.id();

        if !self.breaker.admit() {
            debug!(
                "Provider '{}': circuit open, rejecting {} request",
                id, request.endpoint
            );
            return Err(ProviderError::CircuitOpen {
                provider: id.to_string(),
            });
        }

        if let Err(err) = self.limiter.acquire(request.cost).await {
            self.breaker.release_trial();
            return Err(err);
        }

        self.stats.record_request();
        let (result, attempts) = self
            .retry
            .run(id, |attempt| self.attempt(request, attempt))
            .await;

        match &result {
            Ok(_) => {
                self.breaker.record_success();
                self.stats.record_success();
                debug!(
                    "Provider '{}': {} request for {} symbol(s) succeeded after {} attempt(s)",
                    id,
                    request.endpoint,
                    request.symbols.len(),
                    attempts
                );
            }
            Err(err) => {
                self.record_breaker_outcome(err);
                self.stats.record_error();
                warn!(
                    "Provider '{}': {} request for {:?} failed after {} attempt(s): {}",
                    id, request.endpoint, request.symbols, attempts, err
                );
            }
        }

        result
    }

    /// A permanent error is an answer from a reachable provider, so it
    /// closes a trial and resets the count like a success.
    fn record_breaker_outcome(&self, err: &ProviderError) {
        match err.retry_class() {
            RetryClass::WithBackoff => self.breaker.record_failure(),
            RetryClass::Never => self.breaker.record_success(),
            RetryClass::ShortCircuit => self.breaker.release_trial(),
        }
    }

    async fn attempt(
        &self,
        request: &ProviderRequest,
        attempt: u32,
    ) -> Result<ProviderResponse, ProviderError> {
        let id = self.provider.id();
        debug!(
            "Provider '{}': attempt {} for {} request",
            id, attempt, request.endpoint
        );

        match tokio::time::timeout(self.request_timeout, self.provider.do_request(request)).await
        {
            Ok(Ok(response)) => response.into_result(id),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ProviderError::timeout(id, self.request_timeout)),
        }
    }

    fn lock_health(&self) -> MutexGuard<'_, HealthStatus> {
        self.health.lock().unwrap_or_else(|poisoned| {
            warn!("Health status mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Last recorded health status.
    pub fn health(&self) -> HealthStatus {
        *self.lock_health()
    }

    /// Probe the provider and record the result.
    ///
    /// An open circuit reports Unhealthy without a call. The probe costs one
    /// rate-limit credit; when none is left the previous status is kept.
    pub async fn check_health(&self) -> HealthStatus {
        let status = if self.breaker.is_blocking() {
            HealthStatus::Unhealthy
        } else if self.limiter.try_acquire(1).await.is_err() {
            return self.health();
        } else {
            match tokio::time::timeout(self.request_timeout, self.provider.health_check()).await {
                Ok(status) => status,
                Err(_) => HealthStatus::Unhealthy,
            }
        };

        *self.lock_health() = status;
        status
    }

    pub async fn diagnostics(&self) -> ProviderDiagnostics {
        let rate_limit = match self.limiter.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(
                    "Provider '{}': could not read rate limit window: {}",
                    self.id(),
                    err
                );
                None
            }
        };

        ProviderDiagnostics {
            provider: self.id().to_string(),
            capabilities: self.capabilities(),
            health: self.health(),
            circuit: self.breaker.snapshot(),
            stats: self.stats.snapshot(),
            rate_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Endpoint, Quote};
    use crate::registry::rate_limiter::InMemoryWindowStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider replaying scripted responses; counts transport calls.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
        fallback: Result<ProviderResponse, ProviderError>,
        calls: AtomicU32,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn always(result: Result<ProviderResponse, ProviderError>) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: result,
                calls: AtomicU32::new(0),
                delay: None,
            }
        }

        fn then(self, result: Result<ProviderResponse, ProviderError>) -> Self {
            self.script.lock().unwrap().push_back(result);
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataProvider for ScriptedProvider {
        fn id(&self) -> &'static str {
            "SCRIPTED"
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::default()
        }

        fn validate_config(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn do_request(
            &self,
            _request: &ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }

        fn quote_request(&self, symbols: &[String]) -> ProviderRequest {
            ProviderRequest::new(Endpoint::Quote, symbols.to_vec())
        }

        fn parse_quotes(
            &self,
            _request: &ProviderRequest,
            _response: &ProviderResponse,
        ) -> Result<Vec<Quote>, ProviderError> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        provider: Arc<ScriptedProvider>,
        resilient: ResilientProvider,
        clock: Arc<ManualClock>,
    }

    fn harness(provider: ScriptedProvider, config: ResilienceConfig) -> Harness {
        let provider = Arc::new(provider);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap(),
        ));
        let resilient = ResilientProvider::new(
            provider.clone(),
            config,
            Arc::new(InMemoryWindowStore::new()),
            clock.clone(),
        )
        .unwrap();
        Harness {
            provider,
            resilient,
            clock,
        }
    }

    fn no_retry() -> ResilienceConfig {
        ResilienceConfig {
            retry: RetryPolicy::no_retry(),
            rate_limit: RateLimitConfig {
                credits: 100,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest::new(Endpoint::Quote, vec!["AAPL".to_string()])
    }

    fn server_error() -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse::with_status(503, "unavailable"))
    }

    #[tokio::test]
    async fn test_five_failures_open_circuit_and_sixth_call_makes_no_request() {
        let h = harness(ScriptedProvider::always(server_error()), no_retry());

        for _ in 0..5 {
            let err = h.resilient.execute(&request()).await.unwrap_err();
            assert!(matches!(err, ProviderError::Transient { .. }));
        }
        assert_eq!(h.resilient.circuit_state(), CircuitState::Open);
        assert_eq!(h.provider.calls(), 5);

        let err = h.resilient.execute(&request()).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::CircuitOpen {
                provider: "SCRIPTED".to_string()
            }
        );
        assert_eq!(h.provider.calls(), 5);
    }

    #[tokio::test]
    async fn test_trial_after_recovery_timeout_closes_circuit() {
        let provider = ScriptedProvider::always(Ok(ProviderResponse::ok("{}")))
            .then(server_error())
            .then(server_error())
            .then(server_error())
            .then(server_error())
            .then(server_error());
        let h = harness(provider, no_retry());

        for _ in 0..5 {
            let _ = h.resilient.execute(&request()).await;
        }
        assert_eq!(h.resilient.circuit_state(), CircuitState::Open);

        h.clock.advance(Duration::from_secs(60));
        h.resilient.execute(&request()).await.unwrap();
        assert_eq!(h.resilient.circuit_state(), CircuitState::Closed);
        assert_eq!(h.provider.calls(), 6);
    }

    #[tokio::test]
    async fn test_failed_trial_reopens_circuit() {
        let h = harness(ScriptedProvider::always(server_error()), no_retry());
        for _ in 0..5 {
            let _ = h.resilient.execute(&request()).await;
        }

        h.clock.advance(Duration::from_secs(60));
        assert!(h.resilient.execute(&request()).await.is_err());
        assert_eq!(h.resilient.circuit_state(), CircuitState::Open);
        assert_eq!(h.provider.calls(), 6);
    }

    #[tokio::test]
    async fn test_rate_limited_request_makes_no_call() {
        let config = ResilienceConfig {
            retry: RetryPolicy::no_retry(),
            rate_limit: RateLimitConfig {
                credits: 8,
                ..Default::default()
            },
            ..Default::default()
        };
        let h = harness(ScriptedProvider::always(Ok(ProviderResponse::ok("{}"))), config);

        for _ in 0..8 {
            h.resilient.execute(&request()).await.unwrap();
        }
        h.clock.advance(Duration::from_secs(15));
        let err = h.resilient.execute(&request()).await.unwrap_err();

        assert_eq!(
            err,
            ProviderError::RateLimited {
                provider: "SCRIPTED".to_string(),
                retry_after: Duration::from_secs(45),
            }
        );
        assert_eq!(h.provider.calls(), 8);
        assert_eq!(h.resilient.stats().snapshot().request_count, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_within_one_execute() {
        let provider = ScriptedProvider::always(Ok(ProviderResponse::ok("{}")))
            .then(server_error())
            .then(server_error());
        let h = harness(
            provider,
            ResilienceConfig {
                rate_limit: RateLimitConfig {
                    credits: 100,
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        h.resilient.execute(&request()).await.unwrap();
        assert_eq!(h.provider.calls(), 3);

        let stats = h.resilient.stats().snapshot();
        assert_eq!(stats.request_count, 1);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.error_count, 0);
        assert_eq!(h.resilient.circuit_breaker().failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let h = harness(
            ScriptedProvider::always(Ok(ProviderResponse::with_status(404, "unknown symbol"))),
            ResilienceConfig::default(),
        );

        let err = h.resilient.execute(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Permanent {
                status: Some(404),
                ..
            }
        ));
        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.resilient.stats().snapshot().error_count, 1);
        assert_eq!(h.resilient.circuit_breaker().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_permanent_failures_keep_circuit_closed() {
        let h = harness(
            ScriptedProvider::always(Ok(ProviderResponse::with_status(403, "premium only"))),
            no_retry(),
        );

        for _ in 0..8 {
            let err = h.resilient.execute(&request()).await.unwrap_err();
            assert!(matches!(err, ProviderError::Permanent { .. }));
        }
        assert_eq!(h.resilient.circuit_state(), CircuitState::Closed);
        assert_eq!(h.provider.calls(), 8);
        assert_eq!(h.resilient.stats().snapshot().error_count, 8);
    }

    #[tokio::test]
    async fn test_permanent_answer_closes_half_open_trial() {
        let provider = ScriptedProvider::always(Ok(ProviderResponse::with_status(404, "unknown")))
            .then(server_error())
            .then(server_error())
            .then(server_error())
            .then(server_error())
            .then(server_error());
        let h = harness(provider, no_retry());
        for _ in 0..5 {
            let _ = h.resilient.execute(&request()).await;
        }
        assert_eq!(h.resilient.circuit_state(), CircuitState::Open);

        h.clock.advance(Duration::from_secs(60));
        let err = h.resilient.execute(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Permanent { .. }));
        assert_eq!(h.resilient.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out_as_transient() {
        let mut provider = ScriptedProvider::always(Ok(ProviderResponse::ok("{}")));
        provider.delay = Some(Duration::from_secs(30));
        let h = harness(
            provider,
            ResilienceConfig {
                request_timeout: Duration::from_secs(2),
                ..no_retry()
            },
        );

        let err = h.resilient.execute(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transient { .. }));
        assert_eq!(h.resilient.circuit_breaker().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_at_construction() {
        struct Unconfigured;

        #[async_trait]
        impl MarketDataProvider for Unconfigured {
            fn id(&self) -> &'static str {
                "UNCONFIGURED"
            }
            fn capabilities(&self) -> ProviderCapabilities {
                ProviderCapabilities::default()
            }
            fn validate_config(&self) -> Result<(), ProviderError> {
                Err(ProviderError::Config {
                    provider: "UNCONFIGURED".to_string(),
                    message: "missing API key".to_string(),
                })
            }
            async fn do_request(
                &self,
                _request: &ProviderRequest,
            ) -> Result<ProviderResponse, ProviderError> {
                unreachable!()
            }
            fn quote_request(&self, symbols: &[String]) -> ProviderRequest {
                ProviderRequest::new(Endpoint::Quote, symbols.to_vec())
            }
            fn parse_quotes(
                &self,
                _request: &ProviderRequest,
                _response: &ProviderResponse,
            ) -> Result<Vec<Quote>, ProviderError> {
                Ok(Vec::new())
            }
        }

        let result = ResilientProvider::new(
            Arc::new(Unconfigured),
            ResilienceConfig::default(),
            Arc::new(InMemoryWindowStore::new()),
            Arc::new(crate::clock::SystemClock),
        );
        assert!(matches!(result, Err(ProviderError::Config { .. })));
    }

    #[tokio::test]
    async fn test_health_reports_unhealthy_when_circuit_open() {
        let h = harness(ScriptedProvider::always(server_error()), no_retry());
        for _ in 0..5 {
            let _ = h.resilient.execute(&request()).await;
        }
        assert_eq!(h.resilient.check_health().await, HealthStatus::Unhealthy);

        let diagnostics = h.resilient.diagnostics().await;
        assert_eq!(diagnostics.circuit.state, CircuitState::Open);
        assert_eq!(diagnostics.stats.error_count, 5);
        assert_eq!(diagnostics.health, HealthStatus::Unhealthy);
        assert!(diagnostics.rate_limit.is_some());
    }
}
