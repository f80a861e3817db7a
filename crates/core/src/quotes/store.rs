//! Quote storage traits.
//!
//! This module defines the storage interface for daily quotes and the set of
//! tracked symbols. Implementations live in the storage crates.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::Result;
use folio_market_data::Quote;

/// Counts reported by an upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertOutcome {
    /// Rows whose `(symbol, day)` did not exist before.
    pub inserted: usize,
    /// Rows that replaced an existing `(symbol, day)`.
    pub updated: usize,
}

impl UpsertOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Storage interface for quote data.
///
/// # Method Naming Convention
///
/// - Async methods go through the single writer
/// - Sync methods are plain reads
#[async_trait]
pub trait QuoteStore: Send + Sync {
    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert or replace quotes keyed by `(symbol, day)` in one unit of work.
    ///
    /// Upserting the same records twice leaves the store unchanged; the
    /// second call reports them as `updated`.
    async fn upsert_quotes(&self, quotes: &[Quote]) -> Result<UpsertOutcome>;

    /// Register `symbols` as tracked. Already tracked symbols are left alone.
    ///
    /// Returns the number of newly registered symbols.
    async fn ensure_symbols(&self, symbols: &[String]) -> Result<usize>;

    // =========================================================================
    // Queries
    // =========================================================================

    /// Most recent stored quote per symbol. Symbols without quotes are absent.
    fn read_latest(&self, symbols: &[String]) -> Result<HashMap<String, Quote>>;

    /// Every tracked symbol, sorted.
    fn list_symbols(&self) -> Result<Vec<String>>;

    /// Quotes of `symbol` with `start <= day <= end`, oldest first.
    fn quotes_in_range(&self, symbol: &str, start: NaiveDate, end: NaiveDate)
        -> Result<Vec<Quote>>;
}
