//! Quote storage contract and symbol handling.
//!
//! - [`store`] - Storage traits for persisting and querying daily quotes
//! - [`symbols`] - Validation and normalization of ticker symbols
//!
//! The stored record is [`folio_market_data::Quote`]; identity is
//! `(symbol, day)`.

pub mod store;
pub mod symbols;

pub use folio_market_data::Quote;
pub use store::{QuoteStore, UpsertOutcome};
pub use symbols::{normalize_symbol, normalize_symbols, universe_key};
