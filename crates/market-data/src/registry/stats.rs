//! Cumulative request counters per provider.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::clock::Clock;

/// Snapshot of a provider's counters.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub provider: String,
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// `error_count / max(request_count, 1)`
    pub error_rate: f64,
    pub last_request_at: Option<DateTime<Utc>>,
}

/// Lock-free request/success/error counters.
///
/// Counters only grow; nothing resets them except [`StatsTracker::reset`].
pub struct StatsTracker {
    provider: String,
    requests: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    /// Millisecond timestamp of the last request, `i64::MIN` when none.
    last_request_ms: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl StatsTracker {
    pub fn new(provider: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider: provider.into(),
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_request_ms: AtomicI64::new(i64::MIN),
            clock,
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.last_request_ms
            .store(self.clock.now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProviderStats {
        let request_count = self.requests.load(Ordering::Relaxed);
        let error_count = self.errors.load(Ordering::Relaxed);
        let last_ms = self.last_request_ms.load(Ordering::Relaxed);

        ProviderStats {
            provider: self.provider.clone(),
            request_count,
            success_count: self.successes.load(Ordering::Relaxed),
            error_count,
            error_rate: error_count as f64 / request_count.max(1) as f64,
            last_request_at: if last_ms == i64::MIN {
                None
            } else {
                Utc.timestamp_millis_opt(last_ms).single()
            },
        }
    }

    pub fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.last_request_ms.store(i64::MIN, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_error_rate_with_no_requests_is_zero() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let stats = StatsTracker::new("TEST", clock);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.last_request_at, None);
    }

    #[test]
    fn test_counts_and_error_rate() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
        let stats = StatsTracker::new("TEST", Arc::new(ManualClock::new(now)));

        for i in 0..4 {
            stats.record_request();
            if i == 0 {
                stats.record_error();
            } else {
                stats.record_success();
            }
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.request_count, 4);
        assert_eq!(snapshot.success_count, 3);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.error_rate, 0.25);
        assert_eq!(snapshot.last_request_at, Some(now));

        stats.reset();
        assert_eq!(stats.snapshot().request_count, 0);
    }
}
