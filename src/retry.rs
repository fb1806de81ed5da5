//! Retry policies and backoff schedules.
//!
//! A [`RetryPolicy`] decides, after each completed attempt, whether another
//! attempt should be made. A [`Backoff`] decides how long to wait before it.
//! Both are used by [`with_retry`](crate::middleware::with_retry).

use crate::{Error, Response, Result};
use http::StatusCode;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with a one-second jitter window.
///
/// The result lies in `[2^attempt s, 2^attempt s + 1 s)`, so attempt 0 waits
/// between one and two seconds, attempt 1 between two and three, attempt 2
/// between four and five.
pub fn calculate_backoff(attempt: usize) -> Duration {
    let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
    let base = Duration::from_secs(2u64.saturating_pow(exponent));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1_000));
    base.saturating_add(jitter)
}

/// Defines how long to wait between attempts.
///
/// Attempts are 0-indexed: `delay(0)` is the wait after the first attempt.
///
/// # Examples
///
/// ```
/// use tether::Backoff;
/// use std::time::Duration;
///
/// // 1s + jitter, 2s + jitter, 4s + jitter...
/// let standard = Backoff::Standard;
///
/// // 100ms, 200ms, 400ms... capped at 5s
/// let exponential = Backoff::Exponential {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(5),
///     jitter: false,
/// };
/// assert_eq!(exponential.delay(2), Duration::from_millis(400));
///
/// let fixed = Backoff::Fixed(Duration::from_millis(250));
/// assert_eq!(fixed.delay(7), Duration::from_millis(250));
/// # let _ = standard;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub enum Backoff {
    /// [`calculate_backoff`]: powers of two seconds plus up to one second of jitter.
    #[default]
    Standard,

    /// Waits `initial_delay * 2^attempt` (capped at `max_delay`).
    ///
    /// Optional jitter scales each delay by a random factor in `[0.5, 1.0]`.
    Exponential {
        /// The delay after the first attempt.
        initial_delay: Duration,
        /// The maximum delay between attempts.
        max_delay: Duration,
        /// Whether to add random jitter to delays.
        jitter: bool,
    },

    /// The same delay between every attempt.
    Fixed(Duration),

    /// A caller-supplied schedule taking the 0-indexed attempt.
    Custom(fn(usize) -> Duration),
}

impl Backoff {
    /// Returns the delay to wait after the given attempt.
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Standard => calculate_backoff(attempt),
            Backoff::Exponential {
                initial_delay,
                max_delay,
                jitter,
            } => {
                let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
                let multiplier = 2u32.saturating_pow(exponent);
                let delay = initial_delay.saturating_mul(multiplier).min(*max_delay);

                if *jitter {
                    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
                    delay.mul_f64(jitter_factor)
                } else {
                    delay
                }
            }
            Backoff::Fixed(delay) => *delay,
            Backoff::Custom(delay_fn) => delay_fn(attempt),
        }
    }
}

/// Decides whether a completed attempt should be followed by another.
///
/// Called exactly once per completed attempt with its outcome and 0-indexed
/// attempt number. Implementations must be free of side effects. Any matching
/// closure is a policy.
///
/// # Examples
///
/// ```
/// use tether::{Response, Result, RetryPolicy};
///
/// // Retry only 503 Service Unavailable.
/// let policy = |outcome: &Result<Response>, _attempt: usize| {
///     matches!(outcome, Ok(response) if response.status() == 503)
/// };
/// # fn assert_policy(_: impl RetryPolicy) {}
/// # assert_policy(policy);
/// ```
pub trait RetryPolicy: Send + Sync {
    /// Returns `true` if another attempt should be made.
    fn should_retry(&self, outcome: &Result<Response>, attempt: usize) -> bool;
}

impl<F> RetryPolicy for F
where
    F: Fn(&Result<Response>, usize) -> bool + Send + Sync,
{
    fn should_retry(&self, outcome: &Result<Response>, attempt: usize) -> bool {
        self(outcome, attempt)
    }
}

/// The default policy; see [`default_should_retry`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultShouldRetry;

impl RetryPolicy for DefaultShouldRetry {
    fn should_retry(&self, outcome: &Result<Response>, attempt: usize) -> bool {
        default_should_retry(outcome, attempt)
    }
}

/// The default retry decision.
///
/// - Cancellation and deadline errors are terminal: never retried.
/// - Any other error is treated as a transient transport failure: retried.
/// - 429 Too Many Requests and every 5xx status: retried.
/// - Everything else (success, other client errors): not retried.
pub fn default_should_retry(outcome: &Result<Response>, _attempt: usize) -> bool {
    match outcome {
        Err(err) => !err.is_cancellation(),
        Ok(response) => is_retryable_status(response.status()),
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Retry responses whose status is in an explicit list.
#[derive(Debug, Clone)]
pub struct RetryOnStatus {
    statuses: Vec<StatusCode>,
}

impl RetryOnStatus {
    /// Creates a policy retrying exactly `statuses`.
    pub fn new(statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }
}

impl RetryPolicy for RetryOnStatus {
    fn should_retry(&self, outcome: &Result<Response>, _attempt: usize) -> bool {
        matches!(outcome, Ok(response) if self.statuses.contains(&response.status()))
    }
}

/// Retry only transport-level failures (never statuses, never cancellation).
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTransportError;

impl RetryPolicy for RetryOnTransportError {
    fn should_retry(&self, outcome: &Result<Response>, _attempt: usize) -> bool {
        matches!(outcome, Err(Error::Network(_) | Error::Transport(_)))
    }
}

/// Combine multiple retry policies with OR logic.
///
/// Retries if ANY of the policies return `true`.
///
/// # Examples
///
/// ```
/// use tether::retry::{AnyPolicy, RetryOnStatus, RetryOnTransportError};
/// use http::StatusCode;
///
/// let policy = AnyPolicy::new(vec![
///     Box::new(RetryOnStatus::new([StatusCode::BAD_GATEWAY])),
///     Box::new(RetryOnTransportError),
/// ]);
/// # let _ = policy;
/// ```
pub struct AnyPolicy {
    policies: Vec<Box<dyn RetryPolicy>>,
}

impl AnyPolicy {
    /// Creates a new `AnyPolicy` from a list of policies.
    pub fn new(policies: Vec<Box<dyn RetryPolicy>>) -> Self {
        Self { policies }
    }
}

impl RetryPolicy for AnyPolicy {
    fn should_retry(&self, outcome: &Result<Response>, attempt: usize) -> bool {
        self.policies
            .iter()
            .any(|p| p.should_retry(outcome, attempt))
    }
}

/// Combine multiple retry policies with AND logic.
///
/// Retries only if ALL of the policies return `true`.
pub struct AllPolicy {
    policies: Vec<Box<dyn RetryPolicy>>,
}

impl AllPolicy {
    /// Creates a new `AllPolicy` from a list of policies.
    pub fn new(policies: Vec<Box<dyn RetryPolicy>>) -> Self {
        Self { policies }
    }
}

impl RetryPolicy for AllPolicy {
    fn should_retry(&self, outcome: &Result<Response>, attempt: usize) -> bool {
        self.policies
            .iter()
            .all(|p| p.should_retry(outcome, attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Body;

    fn status(code: u16) -> Result<Response> {
        let mut response = http::Response::new(Body::empty());
        *response.status_mut() = StatusCode::from_u16(code).unwrap();
        Ok(response)
    }

    #[test]
    fn test_calculate_backoff_windows() {
        for (attempt, min_secs) in [(0usize, 1u64), (1, 2), (2, 4)] {
            for _ in 0..50 {
                let backoff = calculate_backoff(attempt);
                assert!(backoff >= Duration::from_secs(min_secs));
                assert!(backoff < Duration::from_secs(min_secs + 1));
            }
        }
    }

    #[test]
    fn test_calculate_backoff_saturates() {
        assert!(calculate_backoff(usize::MAX) >= Duration::from_secs(u64::MAX / 2));
    }

    #[test]
    fn test_default_should_retry() {
        let cases: Vec<(&str, Result<Response>, bool)> = vec![
            ("context canceled", Err(Error::Cancelled), false),
            ("deadline exceeded", Err(Error::DeadlineExceeded), false),
            ("network error", Err(Error::transport("network error")), true),
            ("500 error", status(500), true),
            ("503 error", status(503), true),
            ("429 error", status(429), true),
            ("200 success", status(200), false),
            ("400 error", status(400), false),
            ("404 error", status(404), false),
        ];

        for (name, outcome, expected) in cases {
            assert_eq!(
                default_should_retry(&outcome, 0),
                expected,
                "case: {}",
                name
            );
            assert_eq!(DefaultShouldRetry.should_retry(&outcome, 0), expected);
        }
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let backoff = Backoff::Exponential {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: false,
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_secs(1));
        assert_eq!(backoff.delay(60), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_jitter_bounds() {
        let backoff = Backoff::Exponential {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        };
        for _ in 0..50 {
            let delay = backoff.delay(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_custom_backoff() {
        let backoff = Backoff::Custom(|attempt| Duration::from_millis(attempt as u64 * 10));
        assert_eq!(backoff.delay(3), Duration::from_millis(30));
    }

    #[test]
    fn test_policy_combinators() {
        let any = AnyPolicy::new(vec![
            Box::new(RetryOnStatus::new([StatusCode::BAD_GATEWAY])),
            Box::new(RetryOnTransportError),
        ]);
        assert!(any.should_retry(&status(502), 0));
        assert!(any.should_retry(&Err(Error::transport("reset")), 0));
        assert!(!any.should_retry(&status(500), 0));
        assert!(!any.should_retry(&Err(Error::Cancelled), 0));

        let first_two = |_: &Result<Response>, attempt: usize| attempt < 2;
        let all = AllPolicy::new(vec![Box::new(DefaultShouldRetry), Box::new(first_two)]);
        assert!(all.should_retry(&status(500), 1));
        assert!(!all.should_retry(&status(500), 2));
        assert!(!all.should_retry(&status(200), 0));
    }
}
