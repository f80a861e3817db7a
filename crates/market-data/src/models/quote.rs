use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Daily market data quote for one symbol.
///
/// Identity is `(symbol, day)`; storing the same pair twice replaces the
/// earlier values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Upper-case ticker
    pub symbol: String,

    /// Trading day the quote belongs to (UTC)
    pub day: NaiveDate,

    /// Opening price (optional for intraday)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<Decimal>,

    /// High price (optional for intraday)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<Decimal>,

    /// Low price (optional for intraday)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<Decimal>,

    /// Closing/current price (required)
    pub close: Decimal,

    /// Trading volume (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,

    /// Quote currency
    pub currency: String,

    /// Provider that produced the quote (FINNHUB, ...)
    pub source: String,

    /// When the quote was fetched
    pub fetched_at: DateTime<Utc>,
}

impl Quote {
    /// Create a new quote with minimal required fields
    pub fn new(
        symbol: impl Into<String>,
        day: NaiveDate,
        close: Decimal,
        currency: impl Into<String>,
        source: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            day,
            open: None,
            high: None,
            low: None,
            close,
            volume: None,
            currency: currency.into(),
            source: source.into(),
            fetched_at,
        }
    }

    /// Attach open/high/low values
    pub fn with_range(mut self, open: Decimal, high: Decimal, low: Decimal) -> Self {
        self.open = Some(open);
        self.high = Some(high);
        self.low = Some(low);
        self
    }

    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Storage key `(symbol, day)`.
    pub fn key(&self) -> (&str, NaiveDate) {
        (&self.symbol, self.day)
    }
}
