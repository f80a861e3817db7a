//! Database models for daily quotes and tracked symbols.

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::errors::StorageError;
use folio_market_data::Quote;

pub(crate) const DAY_FORMAT: &str = "%Y-%m-%d";

/// Database model for a daily quote. Decimals are stored as text.
#[derive(Queryable, Selectable, Insertable, QueryableByName, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::daily_quotes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct QuoteDB {
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub symbol: String,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub day: String,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    pub open: Option<String>,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    pub high: Option<String>,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    pub low: Option<String>,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub close: String,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    pub volume: Option<String>,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub currency: String,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub source: String,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub fetched_at: String,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub updated_at: String,
}

impl QuoteDB {
    pub fn from_quote(quote: &Quote, updated_at: &str) -> Self {
        QuoteDB {
            symbol: quote.symbol.clone(),
            day: quote.day.format(DAY_FORMAT).to_string(),
            open: quote.open.map(|d| d.to_string()),
            high: quote.high.map(|d| d.to_string()),
            low: quote.low.map(|d| d.to_string()),
            close: quote.close.to_string(),
            volume: quote.volume.map(|d| d.to_string()),
            currency: quote.currency.clone(),
            source: quote.source.clone(),
            fetched_at: quote.fetched_at.to_rfc3339(),
            updated_at: updated_at.to_string(),
        }
    }
}

fn decimal(field: &str, raw: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(raw)
        .map_err(|e| StorageError::Decode(format!("{} '{}': {}", field, raw, e)))
}

fn optional_decimal(field: &str, raw: Option<&str>) -> Result<Option<Decimal>, StorageError> {
    raw.map(|r| decimal(field, r)).transpose()
}

impl TryFrom<QuoteDB> for Quote {
    type Error = StorageError;

    fn try_from(db: QuoteDB) -> Result<Self, Self::Error> {
        let day = NaiveDate::parse_from_str(&db.day, DAY_FORMAT)
            .map_err(|e| StorageError::Decode(format!("day '{}': {}", db.day, e)))?;
        let fetched_at = DateTime::parse_from_rfc3339(&db.fetched_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::Decode(format!("fetched_at '{}': {}", db.fetched_at, e)))?;

        Ok(Quote {
            open: optional_decimal("open", db.open.as_deref())?,
            high: optional_decimal("high", db.high.as_deref())?,
            low: optional_decimal("low", db.low.as_deref())?,
            close: decimal("close", &db.close)?,
            volume: optional_decimal("volume", db.volume.as_deref())?,
            symbol: db.symbol,
            day,
            currency: db.currency,
            source: db.source,
            fetched_at,
        })
    }
}

/// A tracked symbol.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::symbols)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SymbolDB {
    pub symbol: String,
    pub created_at: String,
}
