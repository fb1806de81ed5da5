use super::Middleware;
use crate::{Request, RequestContextExt, Response, Result, RoundTripper, SharedRoundTripper};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Bounds the deadline of every request that does not already have one.
///
/// An existing deadline is never shortened or replaced, whoever set it. The
/// derived context is cancelled as soon as the call returns. A zero duration
/// makes this middleware the identity.
pub fn with_timeout(timeout: Duration) -> Middleware {
    Arc::new(move |next: SharedRoundTripper| {
        let stage: SharedRoundTripper = Arc::new(Timeout { next, timeout });
        stage
    })
}

struct Timeout {
    next: SharedRoundTripper,
    timeout: Duration,
}

#[async_trait]
impl RoundTripper for Timeout {
    async fn round_trip(&self, mut request: Request) -> Result<Response> {
        let ctx = request.context();
        if self.timeout.is_zero() || ctx.deadline().is_some() {
            return self.next.round_trip(request).await;
        }

        let scoped = ctx.child_with_timeout(self.timeout);
        let _release = scoped.cancellation_token().clone().drop_guard();
        request.set_context(scoped);

        self.next.round_trip(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Body, Context, Error, RoundTripperFn};
    use parking_lot::Mutex;
    use tokio::time::Instant;

    /// A transport that remembers the context of the last request it saw.
    fn capturing() -> (SharedRoundTripper, Arc<Mutex<Option<Context>>>) {
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        let transport: SharedRoundTripper = Arc::new(RoundTripperFn::new(move |request: Request| {
            *slot.lock() = Some(request.context());
            async { Ok::<Response, Error>(http::Response::new(Body::empty())) }
        }));
        (transport, seen)
    }

    #[tokio::test]
    async fn test_adds_deadline_when_missing() {
        let (transport, seen) = capturing();
        let stage = with_timeout(Duration::from_secs(1))(transport);

        stage
            .round_trip(http::Request::new(Body::empty()))
            .await
            .unwrap();

        let ctx = seen.lock().take().unwrap();
        let deadline = ctx.deadline().unwrap();
        let expected = Instant::now() + Duration::from_secs(1);
        let drift = if deadline > expected {
            deadline - expected
        } else {
            expected - deadline
        };
        assert!(drift < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_preserves_existing_deadline() {
        let (transport, seen) = capturing();
        let stage = with_timeout(Duration::from_secs(1))(transport);

        let ctx = Context::new().with_timeout(Duration::from_secs(2));
        let original_deadline = ctx.deadline();
        let request = http::Request::new(Body::empty()).with_context(ctx);

        stage.round_trip(request).await.unwrap();

        let seen_ctx = seen.lock().take().unwrap();
        assert_eq!(seen_ctx.deadline(), original_deadline);
    }

    #[tokio::test]
    async fn test_zero_timeout_does_nothing() {
        let (transport, seen) = capturing();
        let stage = with_timeout(Duration::ZERO)(transport);

        stage
            .round_trip(http::Request::new(Body::empty()))
            .await
            .unwrap();

        assert!(seen.lock().take().unwrap().deadline().is_none());
    }

    #[tokio::test]
    async fn test_unbounded_timeout_sends_without_deadline() {
        let (transport, seen) = capturing();
        let stage = with_timeout(Duration::MAX)(transport);

        let response = stage
            .round_trip(http::Request::new(Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert!(seen.lock().take().unwrap().deadline().is_none());
    }

    #[tokio::test]
    async fn test_scoped_context_released_after_call() {
        let (transport, seen) = capturing();
        let stage = with_timeout(Duration::from_secs(30))(transport);

        let parent = Context::new();
        let request = http::Request::new(Body::empty()).with_context(parent.clone());
        stage.round_trip(request).await.unwrap();

        let scoped = seen.lock().take().unwrap();
        assert!(matches!(scoped.err(), Some(Error::Cancelled)));
        assert!(parent.err().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_slow_transport() {
        let slow: SharedRoundTripper = Arc::new(RoundTripperFn::new(|request: Request| async move {
            let ctx = request.context();
            ctx.run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(http::Response::new(Body::empty()))
            })
            .await
        }));
        let stage = with_timeout(Duration::from_millis(200))(slow);

        let err = stage
            .round_trip(http::Request::new(Body::empty()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DeadlineExceeded));
    }
}
