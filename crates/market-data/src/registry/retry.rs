//! Retry policy with exponential backoff.
//!
//! The decision of whether and how long to wait is a pure function of the
//! attempt number and the error ([`RetryPolicy::next_delay`]); the sleeping
//! loop lives in [`RetryPolicy::run`].

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;

use crate::errors::{ProviderError, RetryClass};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay before the first retry; doubles for each further retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for any single wait, including server-supplied hints.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Adds up to a quarter of the computed delay at random.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff for retry number `retry` (0-based), before jitter and hints.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// How long to wait before retry number `retry` (0-based) after `error`,
    /// or `None` when no further attempt should be made.
    ///
    /// Only [`RetryClass::WithBackoff`] errors are retried. A Retry-After hint
    /// on the error replaces the computed backoff (still capped by
    /// `max_delay`).
    pub fn next_delay(&self, retry: u32, error: &ProviderError) -> Option<Duration> {
        if retry >= self.max_retries || error.retry_class() != RetryClass::WithBackoff {
            return None;
        }

        if let Some(hint) = error.retry_after() {
            return Some(hint.min(self.max_delay));
        }

        let delay = self.backoff(retry);
        if self.jitter && !delay.is_zero() {
            let extra_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
            Some((delay + Duration::from_millis(extra_ms)).min(self.max_delay))
        } else {
            Some(delay)
        }
    }

    /// Run `op` until it succeeds or the policy gives up.
    ///
    /// Returns the final result and the number of attempts made.
    pub async fn run<T, F, Fut>(&self, provider: &str, mut op: F) -> (Result<T, ProviderError>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut retry = 0;
        loop {
            let attempt = retry + 1;
            match op(attempt).await {
                Ok(value) => return (Ok(value), attempt),
                Err(err) => match self.next_delay(retry, &err) {
                    Some(delay) => {
                        debug!(
                            "Retry: attempt {} for '{}' failed ({}), retrying in {:?}",
                            attempt, provider, err, delay
                        );
                        tokio::time::sleep(delay).await;
                        retry += 1;
                    }
                    None => {
                        if attempt > 1 {
                            warn!(
                                "Retry: giving up on '{}' after {} attempts: {}",
                                provider, attempt, err
                            );
                        }
                        return (Err(err), attempt);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> ProviderError {
        ProviderError::from_status("TEST", 503, "", None)
    }

    #[test]
    fn test_default_delays_double() {
        let policy = RetryPolicy::default();
        let err = transient();

        assert_eq!(policy.next_delay(0, &err), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(1, &err), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(2, &err), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(3, &err), None);
    }

    #[test]
    fn test_permanent_errors_are_never_retried() {
        let policy = RetryPolicy::default();
        for status in [400, 401, 403, 404, 422] {
            let err = ProviderError::from_status("TEST", status, "", None);
            assert_eq!(policy.next_delay(0, &err), None, "{}", status);
        }
    }

    #[test]
    fn test_short_circuit_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let err = ProviderError::CircuitOpen {
            provider: "TEST".to_string(),
        };
        assert_eq!(policy.next_delay(0, &err), None);
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = RetryPolicy::default();
        let err = ProviderError::from_status("TEST", 429, "", Some(Duration::from_secs(9)));
        assert_eq!(policy.next_delay(0, &err), Some(Duration::from_secs(9)));

        let err = ProviderError::from_status("TEST", 429, "", Some(Duration::from_secs(600)));
        assert_eq!(policy.next_delay(0, &err), Some(DEFAULT_MAX_DELAY));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            max_delay: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(policy.next_delay(8, &transient()), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_jittered_delays_stay_strictly_increasing() {
        let policy = RetryPolicy {
            jitter: true,
            ..Default::default()
        };
        let err = transient();
        for _ in 0..50 {
            let d0 = policy.next_delay(0, &err).unwrap();
            let d1 = policy.next_delay(1, &err).unwrap();
            let d2 = policy.next_delay(2, &err).unwrap();
            assert!(d0 >= Duration::from_secs(1) && d0 <= Duration::from_millis(1250));
            assert!(d0 < d1 && d1 < d2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let (result, attempts) = policy
            .run("TEST", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let start = tokio::time::Instant::now();

        let (result, attempts): (Result<(), _>, _) = policy
            .run("TEST", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let (result, attempts): (Result<(), _>, _) = RetryPolicy::default()
            .run("TEST", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::from_status("TEST", 404, "", None)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
