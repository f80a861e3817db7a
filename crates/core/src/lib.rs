//! Folio Core - Refresh orchestration and storage contracts.
//!
//! This crate contains the refresh logic on top of `folio-market-data`.
//! It is database-agnostic and defines traits that are implemented
//! by the `storage-sqlite` crate.

pub mod errors;
pub mod quotes;
pub mod refresh;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
