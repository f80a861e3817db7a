//! Finnhub market data provider implementation.
//!
//! This module provides market data from Finnhub API:
//! - Latest equity quotes via /quote
//! - Daily history via /stock/candle
//! - Company news via /company-news
//!
//! Finnhub's /quote endpoint takes one symbol, so the batch size is 1.
//! API documentation: https://finnhub.io/docs/api

mod models;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::models::{Endpoint, NewsArticle, ProviderRequest, ProviderResponse, Quote};
use crate::provider::{HealthStatus, MarketDataProvider, ProviderCapabilities};

use models::{CandleResponse, NewsItem, QuoteResponse};

pub const DEFAULT_BASE_URL: &str = "https://finnhub.io/api/v1";
pub const PROVIDER_ID: &str = "FINNHUB";

/// Finnhub market data provider.
///
/// Supports equities with global coverage for major exchanges, plus
/// company news.
pub struct FinnhubProvider {
    client: Client,
    api_key: String,
    base_url: String,
    currency: String,
}

impl FinnhubProvider {
    /// Create a new Finnhub provider with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            currency: "USD".to_string(),
        }
    }

    /// Point the provider at a different host (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Currency reported on quotes. Finnhub quotes carry none.
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    fn route(request: &ProviderRequest) -> Result<(&'static str, Vec<(String, String)>), ProviderError> {
        let symbol = || {
            request.symbols.first().cloned().ok_or_else(|| {
                ProviderError::malformed(PROVIDER_ID, format!("{} request without symbol", request.endpoint))
            })
        };

        let mut params: Vec<(String, String)> = Vec::new();
        let path = match request.endpoint {
            Endpoint::Quote => {
                params.push(("symbol".to_string(), symbol()?));
                "/quote"
            }
            Endpoint::Historical => {
                params.push(("symbol".to_string(), symbol()?));
                params.push(("resolution".to_string(), "D".to_string()));
                "/stock/candle"
            }
            Endpoint::News => {
                params.push(("symbol".to_string(), symbol()?));
                "/company-news"
            }
            Endpoint::Health => {
                params.push(("exchange".to_string(), "US".to_string()));
                "/stock/market-status"
            }
        };

        params.extend(request.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok((path, params))
    }

    fn decimal(value: f64, field: &str) -> Result<Decimal, ProviderError> {
        Decimal::try_from(value).map_err(|_| {
            ProviderError::malformed(PROVIDER_ID, format!("Invalid {} price: {}", field, value))
        })
    }
}

#[async_trait]
impl MarketDataProvider for FinnhubProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            max_batch_size: 1,
            supports_historical: true,
            supports_news: true,
        }
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::Config {
                provider: PROVIDER_ID.to_string(),
                message: "API key is missing".to_string(),
            });
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ProviderError::Config {
                provider: PROVIDER_ID.to_string(),
                message: format!("Invalid base URL: {}", self.base_url),
            });
        }
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        let probe = ProviderRequest::new(Endpoint::Health, Vec::new());
        match self.do_request(&probe).await {
            Ok(response) if response.is_success() => HealthStatus::Healthy,
            Ok(response) if response.status == 429 || response.status >= 500 => {
                HealthStatus::Degraded
            }
            Ok(_) => HealthStatus::Unhealthy,
            Err(_) => HealthStatus::Unhealthy,
        }
    }

    /// Make a GET request to the Finnhub API.
    async fn do_request(
        &self,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let (path, params) = Self::route(request)?;
        let url = format!("{}{}", self.base_url, path);

        debug!("Finnhub request: {} with {} params", path, params.len());

        // API key as header rather than query param
        let response = self
            .client
            .get(&url)
            .header("X-Finnhub-Token", &self.api_key)
            .query(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Transient {
                provider: PROVIDER_ID.to_string(),
                message: if e.is_timeout() {
                    "Request timed out".to_string()
                } else {
                    format!("Request failed: {}", e)
                },
                retry_after: None,
            })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.map_err(|e| ProviderError::Transient {
            provider: PROVIDER_ID.to_string(),
            message: format!("Failed to read response: {}", e),
            retry_after: None,
        })?;

        Ok(ProviderResponse {
            status,
            body,
            retry_after,
        })
    }

    fn quote_request(&self, symbols: &[String]) -> ProviderRequest {
        ProviderRequest::new(Endpoint::Quote, symbols.to_vec())
    }

    fn parse_quotes(
        &self,
        request: &ProviderRequest,
        response: &ProviderResponse,
    ) -> Result<Vec<Quote>, ProviderError> {
        let symbol = request.symbols.first().cloned().unwrap_or_default();
        let parsed: QuoteResponse = serde_json::from_str(&response.body).map_err(|e| {
            ProviderError::malformed(PROVIDER_ID, format!("Failed to parse quote response: {}", e))
        })?;

        let close = parsed.c.ok_or_else(|| {
            ProviderError::malformed(PROVIDER_ID, format!("No quote data for symbol: {}", symbol))
        })?;

        // Finnhub returns zeros for unknown symbols instead of an error
        if close == 0.0 && parsed.o.unwrap_or(0.0) == 0.0 {
            return Err(ProviderError::Permanent {
                provider: PROVIDER_ID.to_string(),
                status: None,
                message: format!("Symbol not found or no trading data: {}", symbol),
            });
        }

        let fetched_at = Utc::now();
        let day = parsed
            .t
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or(fetched_at)
            .date_naive();

        let mut quote = Quote::new(
            symbol,
            day,
            Self::decimal(close, "close")?,
            self.currency.clone(),
            PROVIDER_ID,
            fetched_at,
        );
        if let (Some(o), Some(h), Some(l)) = (parsed.o, parsed.h, parsed.l) {
            quote = quote.with_range(
                Self::decimal(o, "open")?,
                Self::decimal(h, "high")?,
                Self::decimal(l, "low")?,
            );
        }

        Ok(vec![quote])
    }

    fn history_request(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ProviderRequest, ProviderError> {
        let from = start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let to = end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(from);

        Ok(
            ProviderRequest::new(Endpoint::Historical, vec![symbol.to_string()])
                .with_param("from", from.to_string())
                .with_param("to", to.to_string()),
        )
    }

    fn parse_history(
        &self,
        request: &ProviderRequest,
        response: &ProviderResponse,
    ) -> Result<Vec<Quote>, ProviderError> {
        let symbol = request.symbols.first().cloned().unwrap_or_default();
        let parsed: CandleResponse = serde_json::from_str(&response.body).map_err(|e| {
            ProviderError::malformed(PROVIDER_ID, format!("Failed to parse candle response: {}", e))
        })?;

        if parsed.s == "no_data" {
            return Ok(Vec::new());
        }
        if parsed.s != "ok" {
            return Err(ProviderError::malformed(
                PROVIDER_ID,
                format!("Unexpected candle status: {}", parsed.s),
            ));
        }

        let len = parsed.t.len();
        if parsed.c.len() != len
            || parsed.o.len() != len
            || parsed.h.len() != len
            || parsed.l.len() != len
        {
            return Err(ProviderError::malformed(
                PROVIDER_ID,
                "Mismatched array lengths in candle response",
            ));
        }

        let fetched_at = Utc::now();
        let mut quotes = Vec::with_capacity(len);
        for i in 0..len {
            let Some(timestamp) = Utc.timestamp_opt(parsed.t[i], 0).single() else {
                warn!("Invalid timestamp at index {}: {}", i, parsed.t[i]);
                continue;
            };

            let mut quote = Quote::new(
                symbol.clone(),
                timestamp.date_naive(),
                Self::decimal(parsed.c[i], "close")?,
                self.currency.clone(),
                PROVIDER_ID,
                fetched_at,
            )
            .with_range(
                Self::decimal(parsed.o[i], "open")?,
                Self::decimal(parsed.h[i], "high")?,
                Self::decimal(parsed.l[i], "low")?,
            );
            if let Some(volume) = parsed.v.get(i) {
                quote = quote.with_volume(Self::decimal(*volume, "volume")?);
            }
            quotes.push(quote);
        }

        Ok(quotes)
    }

    fn news_request(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ProviderRequest, ProviderError> {
        Ok(
            ProviderRequest::new(Endpoint::News, vec![symbol.to_string()])
                .with_param("from", from.format("%Y-%m-%d").to_string())
                .with_param("to", to.format("%Y-%m-%d").to_string()),
        )
    }

    fn parse_news(
        &self,
        request: &ProviderRequest,
        response: &ProviderResponse,
    ) -> Result<Vec<NewsArticle>, ProviderError> {
        let symbol = request.symbols.first().cloned().unwrap_or_default();
        let items: Vec<NewsItem> = serde_json::from_str(&response.body).map_err(|e| {
            ProviderError::malformed(PROVIDER_ID, format!("Failed to parse news response: {}", e))
        })?;

        Ok(items
            .into_iter()
            .filter_map(|item| {
                let published_at: DateTime<Utc> = Utc.timestamp_opt(item.datetime, 0).single()?;
                Some(NewsArticle {
                    id: item.id.to_string(),
                    symbol: symbol.clone(),
                    headline: item.headline,
                    summary: item.summary,
                    source: item.source,
                    url: item.url,
                    published_at,
                    sentiment: None,
                })
            })
            .collect())
    }
}
