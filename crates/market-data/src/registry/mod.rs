//! Per-provider resilience.
//!
//! This module provides the guards wrapped around every provider call:
//! - Circuit breaking for fault tolerance
//! - Fixed-window credit rate limiting
//! - Retry with exponential backoff
//! - Request statistics
//!
//! [`ResilientProvider`] composes them around a [`MarketDataProvider`](crate::provider::MarketDataProvider).

mod circuit_breaker;
mod rate_limiter;
mod resilient_provider;
mod retry;
mod stats;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT,
};
pub use rate_limiter::{
    InMemoryWindowStore, RateLimitConfig, RateLimitPolicy, RateLimitSnapshot, RateLimitWindow,
    RateLimiter, Reservation, WindowStore, DEFAULT_WINDOW, DEFAULT_WINDOW_CREDITS,
};
pub use resilient_provider::{
    ProviderDiagnostics, ResilienceConfig, ResilientProvider, DEFAULT_REQUEST_TIMEOUT,
};
pub use retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES};
pub use stats::{ProviderStats, StatsTracker};
