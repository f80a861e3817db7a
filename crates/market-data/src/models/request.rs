use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;

/// Logical endpoint a request targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Latest quote
    Quote,
    /// Daily candles over a date range
    Historical,
    /// Company news
    News,
    /// Cheap liveness probe
    Health,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Historical => "historical",
            Self::News => "news",
            Self::Health => "health",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-neutral description of one outbound call.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderRequest {
    pub endpoint: Endpoint,
    pub symbols: Vec<String>,
    /// Extra query parameters; ordered so cache keys are stable.
    pub params: BTreeMap<String, String>,
    /// Credits the call consumes from the provider's rate-limit window.
    pub cost: u32,
}

impl ProviderRequest {
    pub fn new(endpoint: Endpoint, symbols: Vec<String>) -> Self {
        Self {
            endpoint,
            symbols,
            params: BTreeMap::new(),
            cost: 1,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    /// Canonical cache key for this request against `provider`.
    pub fn cache_key(&self, provider: &str) -> String {
        let mut key = format!("provider:{}:{}", provider, self.endpoint);
        if !self.symbols.is_empty() {
            key.push(':');
            key.push_str(&self.symbols.join(","));
        }
        for (k, v) in &self.params {
            key.push(':');
            key.push_str(k);
            key.push('=');
            key.push_str(v);
        }
        key
    }
}

/// Raw response returned by a transport.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header, if present
    pub retry_after: Option<Duration>,
}

impl ProviderResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into the matching [`ProviderError`].
    pub fn into_result(self, provider: &str) -> Result<Self, ProviderError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ProviderError::from_status(
                provider,
                self.status,
                &self.body,
                self.retry_after,
            ))
        }
    }
}
