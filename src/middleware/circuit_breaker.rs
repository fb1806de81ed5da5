use super::Middleware;
use crate::{Error, Request, Response, Result, RoundTripper, SharedRoundTripper};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A consecutive-failure counter that stops calls once a threshold is reached.
///
/// State is shared by every concurrent caller and only changes through
/// [`record_success`](Self::record_success) (reset to zero) and
/// [`record_failure`](Self::record_failure) (increment). [`allow`](Self::allow)
/// is a pure read of `failure_count < threshold`.
///
/// The breaker recovers only when a success is recorded. `cooldown` is kept
/// for a time-based half-open state but does not currently reopen the circuit.
///
/// # Examples
///
/// ```
/// use tether::middleware::CircuitBreaker;
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(2, Duration::from_secs(1));
/// breaker.record_failure();
/// breaker.record_failure();
/// assert!(!breaker.allow());
///
/// breaker.record_success();
/// assert_eq!(breaker.failure_count(), 0);
/// assert!(breaker.allow());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: usize,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

#[derive(Debug, Default)]
struct BreakerState {
    failures: usize,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(threshold: usize, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Returns `true` while the consecutive failure count is below the threshold.
    pub fn allow(&self) -> bool {
        self.state.lock().failures < self.threshold
    }

    /// Resets the consecutive failure count.
    pub fn record_success(&self) {
        self.state.lock().failures = 0;
    }

    /// Counts one more consecutive failure.
    pub fn record_failure(&self) {
        let failures = {
            let mut state = self.state.lock();
            state.failures += 1;
            state.last_failure = Some(Instant::now());
            state.failures
        };

        if failures == self.threshold {
            tracing::warn!(
                failures = failures,
                threshold = self.threshold,
                "Circuit breaker opened"
            );
        }
    }

    /// The current consecutive failure count.
    pub fn failure_count(&self) -> usize {
        self.state.lock().failures
    }

    /// When the most recent failure was recorded.
    pub fn last_failure(&self) -> Option<Instant> {
        self.state.lock().last_failure
    }

    /// The failure count at which the circuit opens.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Reserved recovery window; see the type documentation.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

/// Short-circuits calls once `threshold` consecutive failures were recorded.
///
/// A call fails when it returns an error or a 5xx response. While open, calls
/// return [`Error::CircuitOpen`] without reaching the next stage. One breaker
/// is created per middleware value and shared by every transport it wraps.
pub fn with_circuit_breaker(threshold: usize, cooldown: Duration) -> Middleware {
    with_shared_circuit_breaker(Arc::new(CircuitBreaker::new(threshold, cooldown)))
}

/// Like [`with_circuit_breaker`], but around a breaker the caller keeps a handle to.
pub fn with_shared_circuit_breaker(breaker: Arc<CircuitBreaker>) -> Middleware {
    Arc::new(move |next: SharedRoundTripper| {
        let stage: SharedRoundTripper = Arc::new(Breaker {
            next,
            breaker: breaker.clone(),
        });
        stage
    })
}

struct Breaker {
    next: SharedRoundTripper,
    breaker: Arc<CircuitBreaker>,
}

#[async_trait]
impl RoundTripper for Breaker {
    async fn round_trip(&self, request: Request) -> Result<Response> {
        if !self.breaker.allow() {
            tracing::debug!(
                failures = self.breaker.failure_count(),
                path = request.uri().path(),
                "Circuit breaker rejected request"
            );
            return Err(Error::CircuitOpen);
        }

        let outcome = self.next.round_trip(request).await;

        let failed = match &outcome {
            Err(_) => true,
            Ok(response) => response.status().is_server_error(),
        };
        if failed {
            self.breaker.record_failure();
        } else {
            self.breaker.record_success();
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_allows_requests() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(1));
        assert!(breaker.allow());
        assert!(breaker.last_failure().is_none());
    }

    #[test]
    fn test_allows_requests_under_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(1));
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(breaker.allow());
        assert!(breaker.last_failure().is_some());
    }

    #[test]
    fn test_blocks_requests_at_threshold() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(1));
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.allow());
    }

    #[test]
    fn test_resets_failure_count_on_success() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(1));
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.allow());
    }

    #[test]
    fn test_cooldown_does_not_reopen() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!breaker.allow());
        assert_eq!(breaker.cooldown(), Duration::ZERO);
    }

    #[test]
    fn test_concurrent_failures_are_counted_exactly() {
        let breaker = Arc::new(CircuitBreaker::new(1_000, Duration::from_secs(1)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = breaker.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        breaker.record_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(breaker.failure_count(), 800);
        assert!(breaker.allow());
    }
}
