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
use folio_core::quotes::{normalize_symbol, normalize_symbols, Quote};

#[derive(Debug, Deserialize)]
struct LatestQuery {
    /// Comma separated.
    symbols: String,
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    start: NaiveDate,
    end: NaiveDate,
}

/// Latest stored quote per symbol. Symbols without data are omitted.
async fn latest_quotes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LatestQuery>,
) -> ApiResult<Json<Vec<Quote>>> {
    let requested: Vec<String> = query
        .symbols
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .collect();
    let symbols = normalize_symbols(&requested)?;

    let mut quotes: Vec<Quote> = state.quote_store.read_latest(&symbols)?.into_values().collect();
    quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    Ok(Json(quotes))
}

async fn quote_history(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Json<Vec<Quote>>> {
    if range.start > range.end {
        return Err(ApiError::BadRequest(format!(
            "start {} is after end {}",
            range.start, range.end
        )));
    }
    let symbol = normalize_symbol(&symbol)?;
    Ok(Json(
        state
            .quote_store
            .quotes_in_range(&symbol, range.start, range.end)?,
    ))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/quotes/latest", get(latest_quotes))
        .route("/quotes/{symbol}/history", get(quote_history))
}
