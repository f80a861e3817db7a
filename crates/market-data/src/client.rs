//! Domain-level access to a resilient provider.
//!
//! [`MarketDataClient`] turns symbol/date questions into [`ProviderRequest`]s,
//! sends them through [`ResilientProvider::execute`] and maps the responses
//! back to domain records, with the [`CacheGateway`] in front.

use std::sync::Arc;

use chrono::NaiveDate;
use log::{debug, warn};
use serde::Serialize;

use crate::cache::{CacheGateway, CacheMode, Cached, TtlTier};
use crate::errors::ProviderError;
use crate::models::{NewsArticle, Quote};
use crate::registry::{ProviderDiagnostics, ResilientProvider};

/// Cache key for the latest quote of `symbol`.
pub fn latest_quote_key(symbol: &str) -> String {
    format!("quote:{}:latest", symbol)
}

/// Cache key for daily history of `symbol` between `start` and `end`.
pub fn history_key(symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
    format!("quote:{}:history:{}:{}", symbol, start, end)
}

/// Pattern matching every cached history range of `symbol`.
pub fn history_pattern(symbol: &str) -> String {
    format!("quote:{}:history:*", symbol)
}

/// Latest quotes for one batch of symbols.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteBatch {
    pub quotes: Vec<Quote>,
    /// Quotes served from the cache.
    pub from_cache: usize,
    /// At least one quote is a stale fallback value.
    pub degraded: bool,
}

#[derive(Clone)]
pub struct MarketDataClient {
    provider: Arc<ResilientProvider>,
    cache: CacheGateway,
}

impl MarketDataClient {
    pub fn new(provider: Arc<ResilientProvider>, cache: CacheGateway) -> Self {
        Self { provider, cache }
    }

    pub fn provider_id(&self) -> &'static str {
        self.provider.id()
    }

    pub fn resilient_provider(&self) -> &Arc<ResilientProvider> {
        &self.provider
    }

    pub fn cache(&self) -> &CacheGateway {
        &self.cache
    }

    /// Largest number of symbols a single provider request may carry.
    pub fn max_batch_size(&self) -> usize {
        self.provider.capabilities().max_batch_size.max(1)
    }

    /// Credits left in the current rate-limit window.
    pub async fn headroom(&self) -> Result<u32, ProviderError> {
        self.provider.headroom().await
    }

    /// Credits granted per rate-limit window.
    pub fn credits_per_window(&self) -> u32 {
        self.provider.rate_limiter().config().credits
    }

    /// True while the circuit rejects calls.
    pub fn is_blocked(&self) -> bool {
        self.provider.circuit_breaker().is_blocking()
    }

    pub async fn diagnostics(&self) -> ProviderDiagnostics {
        self.provider.diagnostics().await
    }

    /// Latest quotes for `symbols`.
    ///
    /// Fresh cache entries are used when `mode` is [`CacheMode::Use`]; the
    /// remaining symbols are fetched in provider-sized requests and written
    /// through. The batch fails as a whole on the first provider error unless
    /// every affected symbol has a fallback entry.
    pub async fn fetch_quotes(
        &self,
        symbols: &[String],
        mode: CacheMode,
    ) -> Result<QuoteBatch, ProviderError> {
        let mut batch = QuoteBatch::default();
        let mut misses = Vec::new();

        for symbol in symbols {
            if mode == CacheMode::Use {
                if let Some(quote) = self.cache.lookup::<Quote>(&latest_quote_key(symbol)).await {
                    batch.quotes.push(quote);
                    batch.from_cache += 1;
                    continue;
                }
            }
            misses.push(symbol.clone());
        }

        for chunk in misses.chunks(self.max_batch_size()) {
            match self.request_quotes(chunk).await {
                Ok(quotes) => {
                    if mode != CacheMode::Bypass {
                        for quote in &quotes {
                            self.cache
                                .put(&latest_quote_key(&quote.symbol), quote, TtlTier::Live)
                                .await;
                        }
                    }
                    batch.quotes.extend(quotes);
                }
                Err(err) => {
                    let stale = self.stale_quotes(chunk).await.ok_or_else(|| err.clone())?;
                    warn!(
                        "Serving {} stale quote(s) for {:?} after provider error: {}",
                        stale.len(),
                        chunk,
                        err
                    );
                    batch.from_cache += stale.len();
                    batch.degraded = true;
                    batch.quotes.extend(stale);
                }
            }
        }

        Ok(batch)
    }

    /// Daily history for `symbol` between `start` and `end`.
    pub async fn fetch_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        mode: CacheMode,
    ) -> Result<Cached<Vec<Quote>>, ProviderError> {
        let key = history_key(symbol, start, end);
        self.cache
            .get_or_fetch(&key, TtlTier::Stable, mode, move || async move {
                let inner = self.provider.provider();
                let request = inner.history_request(symbol, start, end)?;
                let response = self.provider.execute(&request).await?;
                inner.parse_history(&request, &response)
            })
            .await
    }

    /// News about `symbol` published between `from` and `to`.
    pub async fn fetch_news(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        mode: CacheMode,
    ) -> Result<Cached<Vec<NewsArticle>>, ProviderError> {
        let key = format!("news:{}:{}:{}", symbol, from, to);
        self.cache
            .get_or_fetch(&key, TtlTier::Stable, mode, move || async move {
                let inner = self.provider.provider();
                let request = inner.news_request(symbol, from, to)?;
                let response = self.provider.execute(&request).await?;
                inner.parse_news(&request, &response)
            })
            .await
    }

    /// Drop cached history ranges for `symbols` once new quotes are stored.
    ///
    /// The latest-quote entries are left in place: they were written through
    /// by [`fetch_quotes`](Self::fetch_quotes) and back the degraded fallback.
    pub async fn invalidate_history(&self, symbols: &[String]) -> usize {
        let mut removed = 0;
        for symbol in symbols {
            removed += self.cache.invalidate(&history_pattern(symbol)).await;
        }
        debug!("Invalidated {} cache entries for {} symbol(s)", removed, symbols.len());
        removed
    }

    async fn request_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, ProviderError> {
        let inner = self.provider.provider();
        let request = inner.quote_request(symbols);
        let response = self.provider.execute(&request).await?;
        inner.parse_quotes(&request, &response)
    }

    async fn stale_quotes(&self, symbols: &[String]) -> Option<Vec<Quote>> {
        let mut quotes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            quotes.push(self.cache.fallback::<Quote>(&latest_quote_key(symbol)).await?);
        }
        Some(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheTtls, MemoryCacheStore};
    use crate::clock::ManualClock;
    use crate::models::{Endpoint, ProviderRequest, ProviderResponse};
    use crate::provider::{MarketDataProvider, ProviderCapabilities};
    use crate::registry::{InMemoryWindowStore, ResilienceConfig, RetryPolicy};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    /// Echoes a fixed close price for every requested symbol.
    struct EchoProvider {
        calls: AtomicU32,
        failing: AtomicBool,
    }

    #[async_trait]
    impl MarketDataProvider for EchoProvider {
        fn id(&self) -> &'static str {
            "ECHO"
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                max_batch_size: 2,
                supports_historical: false,
                supports_news: false,
            }
        }

        fn validate_config(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn do_request(
            &self,
            _request: &ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Ok(ProviderResponse::with_status(404, "gone"))
            } else {
                Ok(ProviderResponse::ok("100.5"))
            }
        }

        fn quote_request(&self, symbols: &[String]) -> ProviderRequest {
            ProviderRequest::new(Endpoint::Quote, symbols.to_vec())
        }

        fn parse_quotes(
            &self,
            request: &ProviderRequest,
            response: &ProviderResponse,
        ) -> Result<Vec<Quote>, ProviderError> {
            let close: rust_decimal::Decimal = response
                .body
                .parse()
                .map_err(|_| ProviderError::malformed("ECHO", "bad price"))?;
            let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
            Ok(request
                .symbols
                .iter()
                .map(|s| Quote::new(s.clone(), day, close, "USD", "ECHO", Utc::now()))
                .collect())
        }
    }

    fn client(fallback_on_error: bool) -> (MarketDataClient, Arc<EchoProvider>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap(),
        ));
        let echo = Arc::new(EchoProvider {
            calls: AtomicU32::new(0),
            failing: AtomicBool::new(false),
        });
        let config = ResilienceConfig {
            retry: RetryPolicy::no_retry(),
            request_timeout: Duration::from_secs(5),
            ..ResilienceConfig::default()
        };
        let provider = ResilientProvider::new(
            echo.clone(),
            config,
            Arc::new(InMemoryWindowStore::new()),
            clock.clone(),
        )
        .unwrap();
        let gateway = CacheGateway::new(
            Arc::new(MemoryCacheStore::new(clock.clone())),
            clock.clone(),
            CacheTtls::default(),
            fallback_on_error,
        );
        (
            MarketDataClient::new(Arc::new(provider), gateway),
            echo,
            clock,
        )
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fetch_quotes_splits_by_batch_size_and_caches() {
        let (client, echo, _) = client(false);
        let wanted = symbols(&["AAPL", "MSFT", "NVDA"]);

        let batch = client.fetch_quotes(&wanted, CacheMode::Use).await.unwrap();
        assert_eq!(batch.quotes.len(), 3);
        assert_eq!(batch.from_cache, 0);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);

        let again = client.fetch_quotes(&wanted, CacheMode::Use).await.unwrap();
        assert_eq!(again.from_cache, 3);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
        assert!(again.quotes.iter().all(|q| q.close == dec!(100.5)));
    }

    #[tokio::test]
    async fn test_refresh_mode_ignores_fresh_cache() {
        let (client, echo, _) = client(false);
        let wanted = symbols(&["AAPL"]);
        client.fetch_quotes(&wanted, CacheMode::Use).await.unwrap();
        client.fetch_quotes(&wanted, CacheMode::Refresh).await.unwrap();
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_provider_error_without_fallback_fails_batch() {
        let (client, echo, _) = client(false);
        echo.failing.store(true, Ordering::SeqCst);

        let err = client
            .fetch_quotes(&symbols(&["AAPL"]), CacheMode::Use)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "permanent_api_error");
    }

    #[tokio::test]
    async fn test_stale_fallback_marks_batch_degraded() {
        let (client, echo, clock) = client(true);
        let wanted = symbols(&["AAPL"]);
        client.fetch_quotes(&wanted, CacheMode::Use).await.unwrap();

        clock.advance(Duration::from_secs(300));
        echo.failing.store(true, Ordering::SeqCst);

        let batch = client.fetch_quotes(&wanted, CacheMode::Use).await.unwrap();
        assert!(batch.degraded);
        assert_eq!(batch.from_cache, 1);
        assert_eq!(batch.quotes[0].symbol, "AAPL");
    }

    #[tokio::test]
    async fn test_invalidate_history_keeps_latest_entries() {
        let (client, _, _) = client(false);
        let wanted = symbols(&["AAPL", "AAPLX"]);
        client.fetch_quotes(&wanted, CacheMode::Use).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        for symbol in &wanted {
            client
                .cache()
                .put(&history_key(symbol, day, day), &Vec::<Quote>::new(), TtlTier::Stable)
                .await;
        }

        assert_eq!(client.invalidate_history(&symbols(&["AAPL"])).await, 1);
        let cache = client.cache();
        assert!(cache.lookup::<Vec<Quote>>(&history_key("AAPL", day, day)).await.is_none());
        assert!(cache.lookup::<Vec<Quote>>(&history_key("AAPLX", day, day)).await.is_some());
        assert!(cache.lookup::<Quote>(&latest_quote_key("AAPL")).await.is_some());
    }

    #[tokio::test]
    async fn test_unsupported_news_is_permanent_error() {
        let (client, _, _) = client(false);
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let err = client
            .fetch_news("AAPL", day, day, CacheMode::Use)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Permanent { .. }));
    }
}
