use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A news article attached to a symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsArticle {
    /// Provider-assigned article id
    pub id: String,
    pub symbol: String,
    pub headline: String,
    #[serde(default)]
    pub summary: String,
    /// Publisher name
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    /// Provider sentiment score in `[-1, 1]`, when supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<f64>,
}
