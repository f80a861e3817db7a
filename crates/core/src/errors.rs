//! Core error types for Folio.
//!
//! This module defines database-agnostic error types. Storage-specific errors
//! (from Diesel, SQLite, etc.) are converted to these types by the storage layer.

use folio_market_data::ProviderError;
use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the refresh layer.
///
/// Data-source problems inside a run never surface here; they are recorded
/// on the run itself. These variants are what a caller of the orchestrator
/// or a store can see.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Input validation failed: {0}")]
    Validation(String),

    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("Database operation failed: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("Provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Stable code used in run error lists and API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::MissingPrerequisite(_) => "missing_prerequisite",
            Error::Persistence(_) => "persistence_error",
            Error::Provider(err) => err.code(),
            Error::Cancelled(_) => "cancelled",
            Error::NotFound(_) => "not_found",
            Error::Unexpected(_) => "unexpected_error",
        }
    }
}

/// Database-agnostic error type for storage operations.
///
/// This enum uses `String` for all error details, allowing the storage layer
/// to convert storage-specific errors (Diesel, SQLite, etc.) into this format.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish a database connection.
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to create or configure the connection pool.
    #[error("Failed to create database pool: {0}")]
    PoolCreationFailed(String),

    /// A database query failed to execute.
    #[error("Database query failed: {0}")]
    QueryFailed(String),

    /// The requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A database transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Database migration failed.
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Internal/unexpected database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}
