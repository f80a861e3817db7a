//! Folio Market Data Crate
//!
//! Resilient access to external market data and news providers.
//!
//! # Overview
//!
//! Every provider call goes through the same pipeline:
//!
//! ```text
//! +------------------+
//! | MarketDataClient |  (domain mapping + cache gateway)
//! +------------------+
//!          |
//!          v
//! +-------------------+     +----------------------------------------+
//! | ResilientProvider | --> | CircuitBreaker, RateLimiter,           |
//! +-------------------+     | RetryPolicy, StatsTracker              |
//!          |                +----------------------------------------+
//!          v
//! +--------------------+
//! | MarketDataProvider |  (Finnhub, ...: one raw HTTP call)
//! +--------------------+
//! ```
//!
//! # Core Types
//!
//! - [`ResilientProvider`] - `execute(request)` with breaker, rate limit,
//!   retry and timeout
//! - [`MarketDataProvider`] - what a concrete provider implements
//! - [`CacheGateway`] - TTL-tiered cache with opt-in stale fallback
//! - [`ProviderError`] - error taxonomy shared by every layer
//! - [`Quote`] / [`NewsArticle`] - domain records

pub mod cache;
pub mod client;
pub mod clock;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;

pub use cache::{
    CacheEntry, CacheGateway, CacheMode, CacheStore, CacheTtls, Cached, MemoryCacheStore, TtlTier,
};
pub use client::{history_key, history_pattern, latest_quote_key, MarketDataClient, QuoteBatch};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{ProviderError, RetryClass};
pub use models::{Endpoint, NewsArticle, ProviderRequest, ProviderResponse, Quote};
pub use provider::finnhub::FinnhubProvider;
pub use provider::{HealthStatus, MarketDataProvider, ProviderCapabilities};
pub use registry::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, InMemoryWindowStore,
    ProviderDiagnostics, ProviderStats, RateLimitConfig, RateLimitPolicy, RateLimitSnapshot,
    RateLimitWindow, RateLimiter, Reservation, ResilienceConfig, ResilientProvider, RetryPolicy,
    StatsTracker, WindowStore,
};
