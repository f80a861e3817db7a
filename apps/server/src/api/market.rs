use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    main_lib::AppState,
};
use folio_core::errors::Error as CoreError;
use folio_core::quotes::{normalize_symbol, Quote};
use folio_market_data::{CacheMode, Cached, NewsArticle};

#[derive(Debug, Deserialize)]
struct ProviderRangeQuery {
    start: NaiveDate,
    end: NaiveDate,
    /// Skip fresh cache entries and ask the provider.
    #[serde(default)]
    refresh: bool,
}

impl ProviderRangeQuery {
    fn validate(&self) -> ApiResult<()> {
        if self.start > self.end {
            return Err(ApiError::BadRequest(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    fn cache_mode(&self) -> CacheMode {
        if self.refresh {
            CacheMode::Refresh
        } else {
            CacheMode::Use
        }
    }
}

/// Daily history straight from the provider, through the stable cache tier.
async fn provider_history(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<ProviderRangeQuery>,
) -> ApiResult<Json<Cached<Vec<Quote>>>> {
    query.validate()?;
    let symbol = normalize_symbol(&symbol)?;
    let history = state
        .orchestrator
        .client()
        .fetch_history(&symbol, query.start, query.end, query.cache_mode())
        .await
        .map_err(CoreError::from)?;
    Ok(Json(history))
}

async fn company_news(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<ProviderRangeQuery>,
) -> ApiResult<Json<Cached<Vec<NewsArticle>>>> {
    query.validate()?;
    let symbol = normalize_symbol(&symbol)?;
    let news = state
        .orchestrator
        .client()
        .fetch_news(&symbol, query.start, query.end, query.cache_mode())
        .await
        .map_err(CoreError::from)?;
    Ok(Json(news))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/market/{symbol}/history", get(provider_history))
        .route("/market/{symbol}/news", get(company_news))
}
