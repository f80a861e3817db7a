//! Per-provider circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to prevent cascading failures
//! when a provider is experiencing issues. The circuit has three states:
//!
//! - **Closed**: Normal operation, requests are allowed through.
//! - **Open**: Provider is failing, requests are blocked.
//! - **HalfOpen**: One trial request is let through to test recovery.
//!
//! One breaker exists per provider. It is in-memory and resets on restart.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::clock::{add_duration, elapsed_between, Clock};

/// Default number of consecutive failures before opening the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time to wait before transitioning from Open to HalfOpen.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests are allowed.
    Closed,
    /// Provider is failing - requests are blocked.
    Open,
    /// Testing recovery - a single trial request is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to wait before testing recovery.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Consecutive failures since the last success.
    failure_count: u32,
    last_failure: Option<DateTime<Utc>>,
    /// When the circuit last opened; the recovery timer runs from here.
    opened_at: Option<DateTime<Utc>>,
    /// Start of the in-flight HalfOpen trial.
    trial_started: Option<DateTime<Utc>>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            opened_at: None,
            trial_started: None,
        }
    }
}

/// Point-in-time view of a breaker, for diagnostics.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// When an Open circuit becomes eligible for a trial request.
    pub recovery_deadline: Option<DateTime<Utc>>,
}

/// Circuit breaker for a single provider.
///
/// Thread-safe: every state transition happens under one mutex, so at most
/// one caller observes the Open -> HalfOpen transition and gets the trial.
pub struct CircuitBreaker {
    provider: String,
    circuit: Mutex<Circuit>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(
        provider: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider: provider.into(),
            circuit: Mutex::new(Circuit::new()),
            config,
            clock,
        }
    }

    /// Lock the circuit mutex, recovering from poison if necessary.
    ///
    /// The worst case after a poisoned lock is a slightly stale circuit
    /// state, which is preferable to panicking on every later call.
    fn lock_circuit(&self) -> MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(|poisoned| {
            warn!(
                "Circuit breaker mutex for '{}' was poisoned, recovering",
                self.provider
            );
            poisoned.into_inner()
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Decide whether a request may proceed.
    ///
    /// - Closed: always allowed.
    /// - Open: denied until the recovery timeout elapses, then the circuit
    ///   moves to HalfOpen and this caller becomes the trial.
    /// - HalfOpen: denied while the trial is in flight. A trial that never
    ///   reported back is considered lost after another recovery timeout.
    pub fn admit(&self) -> bool {
        let now = self.clock.now();
        let mut circuit = self.lock_circuit();

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = circuit.opened_at.unwrap_or(now);
                if elapsed_between(opened_at, now) >= self.config.recovery_timeout {
                    info!(
                        "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                        self.provider
                    );
                    circuit.state = CircuitState::HalfOpen;
                    circuit.trial_started = Some(now);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => match circuit.trial_started {
                Some(started)
                    if elapsed_between(started, now) < self.config.recovery_timeout =>
                {
                    debug!(
                        "Circuit breaker: trial already in flight for '{}'",
                        self.provider
                    );
                    false
                }
                _ => {
                    circuit.trial_started = Some(now);
                    true
                }
            },
        }
    }

    /// Give back a HalfOpen trial slot without reporting an outcome.
    ///
    /// Used when an admitted request is refused further down the pipeline
    /// (e.g. by the rate limiter) before reaching the provider.
    pub fn release_trial(&self) {
        let mut circuit = self.lock_circuit();
        if circuit.state == CircuitState::HalfOpen {
            circuit.trial_started = None;
        }
    }

    /// Record a successful request.
    ///
    /// In Closed state: resets the failure count.
    /// In HalfOpen state: the trial succeeded, close the circuit.
    pub fn record_success(&self) {
        let mut circuit = self.lock_circuit();

        match circuit.state {
            CircuitState::Closed => {
                if circuit.failure_count > 0 {
                    debug!(
                        "Circuit breaker: success for '{}', failure count reset",
                        self.provider
                    );
                }
                circuit.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: closing circuit for '{}' after successful trial",
                    self.provider
                );
                *circuit = Circuit::new();
            }
            CircuitState::Open => {
                // A request admitted before the circuit opened finished late.
                debug!(
                    "Circuit breaker: late success for '{}' while Open, ignored",
                    self.provider
                );
            }
        }
    }

    /// Record a failed request.
    ///
    /// Increments the failure count and may open the circuit.
    /// In HalfOpen state, a failure immediately reopens the circuit and
    /// restarts the recovery timer.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut circuit = self.lock_circuit();

        circuit.failure_count += 1;
        circuit.last_failure = Some(now);

        match circuit.state {
            CircuitState::Closed => {
                if circuit.failure_count >= self.config.failure_threshold {
                    info!(
                        "Circuit breaker: opening circuit for '{}' after {} failures",
                        self.provider, circuit.failure_count
                    );
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(now);
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        self.provider, circuit.failure_count, self.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: reopening circuit for '{}' after failed trial",
                    self.provider
                );
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(now);
                circuit.trial_started = None;
            }
            CircuitState::Open => {
                debug!(
                    "Circuit breaker: additional failure for '{}' (already open)",
                    self.provider
                );
            }
        }
    }

    /// Current state, without performing any transition.
    pub fn state(&self) -> CircuitState {
        self.lock_circuit().state
    }

    /// True when a call right now would be denied.
    ///
    /// Does not consume the HalfOpen trial; used for planning decisions.
    pub fn is_blocking(&self) -> bool {
        let now = self.clock.now();
        let circuit = self.lock_circuit();
        match circuit.state {
            CircuitState::Closed => false,
            CircuitState::Open => circuit
                .opened_at
                .map(|at| elapsed_between(at, now) < self.config.recovery_timeout)
                .unwrap_or(false),
            CircuitState::HalfOpen => circuit
                .trial_started
                .map(|at| elapsed_between(at, now) < self.config.recovery_timeout)
                .unwrap_or(false),
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.lock_circuit().failure_count
    }

    /// Reset the circuit to Closed state.
    pub fn reset(&self) {
        let mut circuit = self.lock_circuit();
        info!(
            "Circuit breaker: manually resetting circuit for '{}'",
            self.provider
        );
        *circuit = Circuit::new();
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let circuit = self.lock_circuit();
        let recovery_deadline = match circuit.state {
            CircuitState::Open => circuit
                .opened_at
                .map(|at| add_duration(at, self.config.recovery_timeout)),
            _ => None,
        };

        CircuitSnapshot {
            provider: self.provider.clone(),
            state: circuit.state,
            failure_count: circuit.failure_count,
            last_failure_at: circuit.last_failure,
            recovery_deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn breaker(threshold: u32, recovery: Duration) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap(),
        ));
        let cb = CircuitBreaker::new(
            "TEST_PROVIDER",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: recovery,
            },
            clock.clone(),
        );
        (cb, clock)
    }

    #[test]
    fn test_circuit_starts_closed() {
        let (cb, _) = breaker(5, DEFAULT_RECOVERY_TIMEOUT);
        assert!(cb.admit());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let (cb, _) = breaker(3, DEFAULT_RECOVERY_TIMEOUT);

        cb.record_failure();
        cb.record_failure();
        assert!(cb.admit());
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert!(!cb.admit());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_blocking());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (cb, _) = breaker(3, DEFAULT_RECOVERY_TIMEOUT);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.failure_count(), 2);

        cb.record_success();
        assert_eq!(cb.failure_count(), 0);

        // Two more failures don't reach the threshold again
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_denies_until_recovery_timeout() {
        let (cb, clock) = breaker(1, Duration::from_secs(60));

        cb.record_failure();
        clock.advance(Duration::from_secs(59));
        assert!(!cb.admit());

        clock.advance(Duration::from_secs(1));
        assert!(cb.admit());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let (cb, clock) = breaker(1, Duration::from_secs(60));

        cb.record_failure();
        clock.advance(Duration::from_secs(60));

        assert!(cb.admit());
        assert!(!cb.admit());
        assert!(!cb.admit());
    }

    #[test]
    fn test_half_open_closes_on_success() {
        let (cb, clock) = breaker(2, Duration::from_secs(60));

        cb.record_failure();
        cb.record_failure();
        clock.advance(Duration::from_secs(61));
        assert!(cb.admit());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.admit());
    }

    #[test]
    fn test_half_open_reopens_on_failure_and_resets_timer() {
        let (cb, clock) = breaker(1, Duration::from_secs(60));

        cb.record_failure();
        clock.advance(Duration::from_secs(60));
        assert!(cb.admit());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // Timer restarted at the trial failure
        clock.advance(Duration::from_secs(30));
        assert!(!cb.admit());
        clock.advance(Duration::from_secs(30));
        assert!(cb.admit());
    }

    #[test]
    fn test_released_trial_can_be_retaken() {
        let (cb, clock) = breaker(1, Duration::from_secs(60));

        cb.record_failure();
        clock.advance(Duration::from_secs(60));
        assert!(cb.admit());
        cb.release_trial();
        assert!(cb.admit());
    }

    #[test]
    fn test_lost_trial_expires() {
        let (cb, clock) = breaker(1, Duration::from_secs(60));

        cb.record_failure();
        clock.advance(Duration::from_secs(60));
        assert!(cb.admit());

        clock.advance(Duration::from_secs(60));
        assert!(cb.admit());
    }

    #[test]
    fn test_manual_reset() {
        let (cb, _) = breaker(1, DEFAULT_RECOVERY_TIMEOUT);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_snapshot_reports_recovery_deadline() {
        let (cb, clock) = breaker(1, Duration::from_secs(60));
        let opened = clock.now();

        cb.record_failure();
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.last_failure_at, Some(opened));
        assert_eq!(
            snapshot.recovery_deadline,
            Some(add_duration(opened, Duration::from_secs(60)))
        );
    }

    #[test]
    fn test_concurrent_admit_yields_one_trial() {
        let (cb, clock) = breaker(1, Duration::from_secs(60));
        cb.record_failure();
        clock.advance(Duration::from_secs(60));

        let cb = Arc::new(cb);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = cb.clone();
                std::thread::spawn(move || cb.admit())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(admitted, 1);
    }
}
