/// Classification for retry policy.
///
/// Used by the request executor to decide what to do with a failed attempt.
///
/// # Behavior Summary
///
/// | Class | Retried locally? | Counts against `max_retries`? |
/// |-------|------------------|-------------------------------|
/// | `Never` | No | No |
/// | `WithBackoff` | Yes, after `base * 2^attempt` | Yes |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Never retry - caller error, 4xx, auth failure or pre-flight refusal.
    /// Retrying the same request won't help.
    Never,

    /// Retry with exponential backoff.
    ///
    /// Used for transient failures: timeouts, 5xx responses and transport
    /// errors. The executor stops once `max_retries` is exhausted and surfaces
    /// the last error.
    WithBackoff,
}
