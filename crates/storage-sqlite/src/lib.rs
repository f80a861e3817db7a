//! SQLite storage for folio.
//!
//! Implements the storage traits from `folio-core` and the shared
//! rate-limit window store from `folio-market-data`:
//! - Connection pooling, PRAGMAs and embedded Diesel migrations
//! - A single writer actor; every mutation is one immediate transaction
//! - [`QuoteRepository`]: daily quotes keyed by `(symbol, day)`
//! - [`SqliteWindowStore`]: provider credit windows shared across processes
//!
//! ```text
//! core (refresh)      market-data (rate limiter)
//!       │                      │
//!       └──────────┬───────────┘
//!                  ▼
//!          storage-sqlite (this crate)
//!                  │
//!                  ▼
//!              SQLite DB
//! ```

pub mod db;
pub mod errors;
pub mod quotes;
pub mod rate_limits;
pub mod schema;
mod utils;

pub use db::{
    create_pool, get_connection, get_db_path, init, open, run_migrations, spawn_writer,
    DbConnection, DbPool, WriteHandle,
};
pub use errors::{IntoCore, StorageError};
pub use quotes::QuoteRepository;
pub use rate_limits::SqliteWindowStore;

pub use folio_core::errors::{DatabaseError, Error, Result};
