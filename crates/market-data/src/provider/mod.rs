//! Market data provider implementations.
//!
//! This module defines the provider trait and concrete implementations
//! for the upstream APIs the application talks to.

pub mod capabilities;
pub mod finnhub;
pub mod traits;

pub use capabilities::ProviderCapabilities;
pub use traits::{HealthStatus, MarketDataProvider};
