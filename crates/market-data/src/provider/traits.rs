//! Market data provider trait definitions.
//!
//! A provider only knows how to talk to its upstream API: it turns domain
//! requests into [`ProviderRequest`]s, performs one raw call per request, and
//! maps responses back to domain types. Circuit breaking, rate limiting,
//! retries and caching are applied around it by
//! [`ResilientProvider`](crate::registry::ResilientProvider); providers never
//! call themselves.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::errors::ProviderError;
use crate::models::{NewsArticle, ProviderRequest, ProviderResponse, Quote};

use super::capabilities::ProviderCapabilities;

/// Result of a provider health probe.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    /// Reachable but slow or partially failing.
    Degraded,
    Unhealthy,
    /// Not probed yet.
    #[default]
    Unknown,
}

/// Trait for market data providers.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use folio_market_data::provider::{MarketDataProvider, ProviderCapabilities};
///
/// struct MyProvider {
///     api_key: String,
/// }
///
/// #[async_trait]
/// impl MarketDataProvider for MyProvider {
///     fn id(&self) -> &'static str {
///         "MY_PROVIDER"
///     }
///
///     fn capabilities(&self) -> ProviderCapabilities {
///         ProviderCapabilities::default()
///     }
///
///     // ... implement validate_config, do_request and the quote mapping
/// }
/// ```
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Should be a constant string like "FINNHUB". Used for logging, circuit
    /// breaker and rate-limit bookkeeping, and as the quote source.
    fn id(&self) -> &'static str;

    /// Describes what this provider can do.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Check static configuration (credentials, URLs).
    ///
    /// Called once when the provider is wrapped; an error here is fatal at
    /// startup.
    fn validate_config(&self) -> Result<(), ProviderError>;

    /// Probe the upstream API.
    async fn health_check(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    /// Perform exactly one raw call.
    ///
    /// Transport failures (connect errors, client-side timeouts) are returned
    /// as [`ProviderError::Transient`]; any HTTP response, successful or not,
    /// is returned as a [`ProviderResponse`] for central classification.
    async fn do_request(&self, request: &ProviderRequest)
        -> Result<ProviderResponse, ProviderError>;

    /// Build the request for the latest quotes of `symbols`.
    ///
    /// `symbols.len()` never exceeds `capabilities().max_batch_size`.
    fn quote_request(&self, symbols: &[String]) -> ProviderRequest;

    /// Map a successful quote response.
    fn parse_quotes(
        &self,
        request: &ProviderRequest,
        response: &ProviderResponse,
    ) -> Result<Vec<Quote>, ProviderError>;

    /// Build the request for daily history of `symbol` between `start` and
    /// `end` (inclusive).
    fn history_request(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ProviderRequest, ProviderError> {
        let _ = (symbol, start, end);
        Err(unsupported(self.id(), "historical quotes"))
    }

    fn parse_history(
        &self,
        request: &ProviderRequest,
        response: &ProviderResponse,
    ) -> Result<Vec<Quote>, ProviderError> {
        let _ = (request, response);
        Err(unsupported(self.id(), "historical quotes"))
    }

    /// Build the request for news about `symbol` published between `from`
    /// and `to` (inclusive).
    fn news_request(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ProviderRequest, ProviderError> {
        let _ = (symbol, from, to);
        Err(unsupported(self.id(), "news"))
    }

    fn parse_news(
        &self,
        request: &ProviderRequest,
        response: &ProviderResponse,
    ) -> Result<Vec<NewsArticle>, ProviderError> {
        let _ = (request, response);
        Err(unsupported(self.id(), "news"))
    }
}

fn unsupported(provider: &str, what: &str) -> ProviderError {
    ProviderError::Permanent {
        provider: provider.to_string(),
        status: None,
        message: format!("{} not supported", what),
    }
}
