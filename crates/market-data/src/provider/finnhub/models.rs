//! Finnhub API response structures.

use serde::Deserialize;

/// Response from /quote endpoint
#[derive(Debug, Deserialize)]
pub(super) struct QuoteResponse {
    /// Current price
    pub c: Option<f64>,
    /// High price of the day
    pub h: Option<f64>,
    /// Low price of the day
    pub l: Option<f64>,
    /// Open price of the day
    pub o: Option<f64>,
    /// Timestamp (Unix)
    pub t: Option<i64>,
}

/// Response from /stock/candle endpoint
#[derive(Debug, Deserialize)]
pub(super) struct CandleResponse {
    /// Status: "ok" or "no_data"
    pub s: String,
    #[serde(default)]
    pub c: Vec<f64>,
    #[serde(default)]
    pub h: Vec<f64>,
    #[serde(default)]
    pub l: Vec<f64>,
    #[serde(default)]
    pub o: Vec<f64>,
    #[serde(default)]
    pub v: Vec<f64>,
    /// Timestamps (Unix)
    #[serde(default)]
    pub t: Vec<i64>,
}

/// Item from /company-news endpoint
#[derive(Debug, Deserialize)]
pub(super) struct NewsItem {
    pub id: i64,
    /// Publication time (Unix)
    pub datetime: i64,
    pub headline: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub url: String,
}
