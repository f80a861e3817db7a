//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`ProviderError`]: The error taxonomy for every call made through a provider
//! - [`RetryClass`]: Classification for determining retry and short-circuit behavior

mod retry;

pub use retry::RetryClass;

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to an external data provider.
///
/// Each variant is classified into a [`RetryClass`] via the
/// [`retry_class`](Self::retry_class) method, which determines whether the
/// retry policy may try again and whether the orchestrator should stop
/// issuing further calls to the provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The provider is misconfigured (missing API key, bad base URL, a request
    /// costing more than the whole rate-limit window).
    /// Surfaced at startup; retrying won't help.
    #[error("Configuration error: {provider} - {message}")]
    Config {
        /// The misconfigured provider
        provider: String,
        /// What is wrong
        message: String,
    },

    /// The local credit budget for the current window is exhausted.
    #[error("Rate limited: {provider} (retry after {}s)", .retry_after.as_secs())]
    RateLimited {
        /// The provider whose window is exhausted
        provider: String,
        /// Time until the current window resets
        retry_after: Duration,
    },

    /// The circuit breaker is open for this provider.
    /// No network call was made.
    #[error("Circuit open: {provider}")]
    CircuitOpen {
        /// The provider with an open circuit
        provider: String,
    },

    /// A failure that may succeed on a later attempt: network error, 5xx,
    /// timeout, or an upstream 429.
    #[error("Transient error: {provider} - {message}")]
    Transient {
        /// The provider that failed
        provider: String,
        /// Error detail
        message: String,
        /// Server-supplied Retry-After hint, if any
        retry_after: Option<Duration>,
    },

    /// A failure that will not succeed on retry: non-429 4xx, unparseable
    /// payload, unknown symbol.
    #[error("Permanent error: {provider} - {message}")]
    Permanent {
        /// The provider that failed
        provider: String,
        /// HTTP status, when the failure came from a response
        status: Option<u16>,
        /// Error detail
        message: String,
    },

    /// The shared rate-limit window store could not be read or written.
    #[error("Rate limit store error: {0}")]
    WindowStore(String),
}

impl ProviderError {
    /// Builds the error for a hard per-attempt timeout.
    pub fn timeout(provider: &str, after: Duration) -> Self {
        Self::Transient {
            provider: provider.to_string(),
            message: format!("request timed out after {}ms", after.as_millis()),
            retry_after: None,
        }
    }

    /// Classifies a non-success HTTP status.
    ///
    /// 429 and 5xx are transient (429 keeps the Retry-After hint); every other
    /// status is permanent.
    pub fn from_status(
        provider: &str,
        status: u16,
        body: &str,
        retry_after: Option<Duration>,
    ) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {} - {}", status, truncate(body, 200))
        };

        if status == 429 || status >= 500 {
            Self::Transient {
                provider: provider.to_string(),
                message,
                retry_after,
            }
        } else {
            Self::Permanent {
                provider: provider.to_string(),
                status: Some(status),
                message,
            }
        }
    }

    /// Builds a permanent error for a payload that could not be mapped.
    pub fn malformed(provider: &str, message: impl Into<String>) -> Self {
        Self::Permanent {
            provider: provider.to_string(),
            status: None,
            message: message.into(),
        }
    }

    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use folio_market_data::errors::{ProviderError, RetryClass};
    ///
    /// let error = ProviderError::from_status("FINNHUB", 503, "", None);
    /// assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    ///
    /// let error = ProviderError::from_status("FINNHUB", 404, "", None);
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Transient { .. } => RetryClass::WithBackoff,
            Self::CircuitOpen { .. } | Self::RateLimited { .. } => RetryClass::ShortCircuit,
            Self::Config { .. } | Self::Permanent { .. } | Self::WindowStore(_) => {
                RetryClass::Never
            }
        }
    }

    /// Server or limiter supplied wait hint.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Stable machine-readable code, used in run error lists and API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Transient { .. } => "transient_api_error",
            Self::Permanent { .. } => "permanent_api_error",
            Self::WindowStore(_) => "rate_limit_store_error",
        }
    }

    /// Name of the provider the error belongs to, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Config { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::CircuitOpen { provider }
            | Self::Transient { provider, .. }
            | Self::Permanent { provider, .. } => Some(provider),
            Self::WindowStore(_) => None,
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_transient() {
        for status in [500, 502, 503, 504] {
            let error = ProviderError::from_status("FINNHUB", status, "", None);
            assert_eq!(error.retry_class(), RetryClass::WithBackoff, "{}", status);
        }
    }

    #[test]
    fn test_upstream_429_is_transient_and_keeps_hint() {
        let error =
            ProviderError::from_status("FINNHUB", 429, "slow down", Some(Duration::from_secs(7)));
        assert_eq!(error.retry_class(), RetryClass::WithBackoff);
        assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_client_errors_are_permanent() {
        for status in [400, 401, 403, 404, 422] {
            let error = ProviderError::from_status("FINNHUB", status, "", None);
            assert_eq!(error.retry_class(), RetryClass::Never, "{}", status);
            assert!(matches!(
                error,
                ProviderError::Permanent { status: Some(s), .. } if s == status
            ));
        }
    }

    #[test]
    fn test_short_circuit_classes() {
        let open = ProviderError::CircuitOpen {
            provider: "FINNHUB".to_string(),
        };
        assert_eq!(open.retry_class(), RetryClass::ShortCircuit);

        let limited = ProviderError::RateLimited {
            provider: "FINNHUB".to_string(),
            retry_after: Duration::from_secs(12),
        };
        assert_eq!(limited.retry_class(), RetryClass::ShortCircuit);
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_timeout_is_transient() {
        let error = ProviderError::timeout("FINNHUB", Duration::from_secs(10));
        assert_eq!(error.retry_class(), RetryClass::WithBackoff);
        assert_eq!(error.code(), "transient_api_error");
    }

    #[test]
    fn test_error_display() {
        let error = ProviderError::from_status("FINNHUB", 404, "", None);
        assert_eq!(format!("{}", error), "Permanent error: FINNHUB - HTTP 404");

        let error = ProviderError::RateLimited {
            provider: "FINNHUB".to_string(),
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(
            format!("{}", error),
            "Rate limited: FINNHUB (retry after 42s)"
        );
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let error = ProviderError::from_status("FINNHUB", 500, &body, None);
        let ProviderError::Transient { message, .. } = error else {
            panic!("expected transient");
        };
        assert!(message.len() < 250);
    }
}
