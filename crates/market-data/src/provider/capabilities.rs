//! Provider capabilities.
//!
//! Describes what a provider can serve and how work should be shaped for it.

use serde::Serialize;

/// Describes the capabilities of a market data provider.
///
/// Used by callers to decide which requests can be sent and how many
/// symbols may be packed into one request.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    /// Maximum number of symbols a single quote request may carry.
    pub max_batch_size: usize,

    /// Whether the provider supports daily history.
    pub supports_historical: bool,

    /// Whether the provider supports company news.
    pub supports_news: bool,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            max_batch_size: 1,
            supports_historical: false,
            supports_news: false,
        }
    }
}
