//! Composable decorators around a [`RoundTripper`](crate::RoundTripper).
//!
//! A [`Middleware`] takes the next stage of the pipeline and returns a new
//! stage wrapping it. [`chain`] composes any number of them; the first one in
//! the list is outermost, so it sees the request first and the response last.
//!
//! ```text
//! chain([request_id, logging, breaker, retry, timeout])(transport)
//!
//!   request ──▶ request_id ──▶ logging ──▶ breaker ──▶ retry ──▶ timeout ──▶ transport
//!   response ◀─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Composition has no side effects: nothing is logged, counted or sent until a
//! request is executed. Stateful middlewares such as the circuit breaker create
//! their state when the middleware value is created, so every transport the
//! same value is applied to shares it.
//!
//! # Examples
//!
//! ```
//! use tether::middleware::{chain, with_circuit_breaker, with_request_id, with_retry, with_timeout};
//! use tether::{DefaultShouldRetry, ReqwestTransport, SharedRoundTripper};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let pipeline = chain([
//!     with_request_id(tether::uuid_request_id),
//!     with_circuit_breaker(5, Duration::from_secs(30)),
//!     with_retry(3, DefaultShouldRetry),
//!     with_timeout(Duration::from_secs(10)),
//! ]);
//!
//! let raw: SharedRoundTripper = Arc::new(ReqwestTransport::default());
//! let transport = pipeline(raw);
//! # let _ = transport;
//! ```

mod circuit_breaker;
mod headers;
mod logging;
mod metrics;
mod request_id;
mod retry;
mod timeout;

use crate::SharedRoundTripper;
use std::sync::Arc;

pub use circuit_breaker::{with_circuit_breaker, with_shared_circuit_breaker, CircuitBreaker};
pub use headers::{with_headers, with_user_agent};
pub use logging::{with_logging, LogEvent, LogPhase, NoopLogger, RequestLogger, TracingLogger};
pub use self::metrics::{
    with_metrics, DurationStats, FacadeCollector, InMemoryCollector, MetricsCollector, Stats,
};
pub use request_id::{uuid_request_id, with_request_id};
pub use retry::{with_retry, with_retry_backoff, RetryAttempts};
pub use timeout::with_timeout;

pub(crate) use headers::with_default_header_map;
pub(crate) use logging::with_shared_logging;
pub(crate) use retry::with_shared_retry;
pub(crate) use self::metrics::with_shared_metrics;

/// A function from the next pipeline stage to a decorated stage.
pub type Middleware = Arc<dyn Fn(SharedRoundTripper) -> SharedRoundTripper + Send + Sync>;

/// Wraps a closure as a [`Middleware`].
pub fn middleware_fn<F>(f: F) -> Middleware
where
    F: Fn(SharedRoundTripper) -> SharedRoundTripper + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Composes middlewares into one, outermost first.
///
/// An empty list yields the identity. Grouping does not matter:
/// `chain([a, chain([b, c])])` behaves exactly like `chain([a, b, c])`.
pub fn chain(middlewares: impl IntoIterator<Item = Middleware>) -> Middleware {
    let middlewares: Vec<Middleware> = middlewares.into_iter().collect();
    Arc::new(move |next: SharedRoundTripper| {
        middlewares
            .iter()
            .rev()
            .fold(next, |next, middleware| middleware(next))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Body, Error, Request, Response, RoundTripper, RoundTripperFn};
    use parking_lot::Mutex;

    /// Records the order in which stages see the request.
    fn tag(label: &'static str, seen: Arc<Mutex<Vec<&'static str>>>) -> Middleware {
        middleware_fn(move |next: SharedRoundTripper| {
            let seen = seen.clone();
            let stage: SharedRoundTripper = Arc::new(RoundTripperFn::new(move |request: Request| {
                seen.lock().push(label);
                let next = next.clone();
                async move { next.round_trip(request).await }
            }));
            stage
        })
    }

    fn ok_transport() -> SharedRoundTripper {
        Arc::new(RoundTripperFn::new(|_request: Request| async {
            Ok::<Response, Error>(http::Response::new(Body::empty()))
        }))
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let transport = chain(Vec::new())(ok_transport());
        let response = transport
            .round_trip(http::Request::new(Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_chain_order_outermost_first() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let transport = chain([
            tag("a", seen.clone()),
            tag("b", seen.clone()),
            tag("c", seen.clone()),
        ])(ok_transport());

        transport
            .round_trip(http::Request::new(Body::empty()))
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_chain_is_associative() {
        let flat_seen = Arc::new(Mutex::new(Vec::new()));
        let flat = chain([
            tag("a", flat_seen.clone()),
            tag("b", flat_seen.clone()),
            tag("c", flat_seen.clone()),
        ])(ok_transport());

        let nested_seen = Arc::new(Mutex::new(Vec::new()));
        let nested = chain([
            chain([tag("a", nested_seen.clone()), tag("b", nested_seen.clone())]),
            chain([tag("c", nested_seen.clone())]),
        ])(ok_transport());

        flat.round_trip(http::Request::new(Body::empty()))
            .await
            .unwrap();
        nested
            .round_trip(http::Request::new(Body::empty()))
            .await
            .unwrap();

        assert_eq!(*flat_seen.lock(), *nested_seen.lock());
    }
}
