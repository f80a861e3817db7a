/// Classification for retry policy.
///
/// Used by the retry policy to decide whether another attempt is allowed and
/// by the refresh orchestrator to decide whether further calls to the same
/// provider make sense.
///
/// # Behavior Summary
///
/// | Class | Retried by `RetryPolicy`? | Stops remaining batches? |
/// |-------|---------------------------|--------------------------|
/// | `Never` | No | No |
/// | `WithBackoff` | Yes (until retries exhausted) | No |
/// | `ShortCircuit` | No | Yes |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Never retry - bad request, unknown symbol, malformed payload, or
    /// configuration problem. Retrying won't help.
    Never,

    /// Retry with exponential backoff.
    ///
    /// Used for network errors, 5xx responses, timeouts and upstream 429s.
    /// Once retries are exhausted the failure counts against the circuit breaker.
    WithBackoff,

    /// The provider refused the call locally (open circuit or exhausted
    /// credit window). No network call was made; callers should skip the
    /// provider instead of queueing more work for it.
    ShortCircuit,
}
