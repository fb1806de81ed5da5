//! The round-tripper abstraction and the `reqwest`-backed transport.
//!
//! Everything in this crate decorates a [`RoundTripper`]: one request in, one
//! response or error out.

use crate::{Body, Error, Request, RequestContextExt, Response, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Executes one request and returns one response or error.
///
/// A non-2xx status is a normal `Ok` response. Implementations must be safe to
/// share between concurrently running requests.
#[async_trait]
pub trait RoundTripper: Send + Sync {
    /// Sends `request` and waits for the response head.
    async fn round_trip(&self, request: Request) -> Result<Response>;
}

/// A round-tripper shared between middlewares and callers.
pub type SharedRoundTripper = Arc<dyn RoundTripper>;

#[async_trait]
impl<T> RoundTripper for Arc<T>
where
    T: RoundTripper + ?Sized,
{
    async fn round_trip(&self, request: Request) -> Result<Response> {
        (**self).round_trip(request).await
    }
}

/// Adapts an async closure into a [`RoundTripper`].
///
/// # Examples
///
/// ```
/// use tether::{Body, RoundTripper, RoundTripperFn};
///
/// # async fn example() -> tether::Result<()> {
/// let transport = RoundTripperFn::new(|_request: tether::Request| async {
///     Ok::<_, tether::Error>(http::Response::new(Body::from("ok")))
/// });
///
/// let request = http::Request::new(Body::empty());
/// let response = transport.round_trip(request).await?;
/// assert_eq!(response.status(), 200);
/// # Ok(())
/// # }
/// ```
pub struct RoundTripperFn<F> {
    f: F,
}

impl<F> RoundTripperFn<F> {
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> RoundTripper for RoundTripperFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    async fn round_trip(&self, request: Request) -> Result<Response> {
        (self.f)(request).await
    }
}

/// The raw transport: sends requests with a [`reqwest::Client`].
///
/// The request [`Context`](crate::Context) is honoured: if it is cancelled or
/// its deadline passes before the response head arrives, the call returns
/// [`Error::Cancelled`] or [`Error::DeadlineExceeded`]. Connection pooling and
/// TLS stay with the wrapped client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport around an existing client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// The wrapped client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl RoundTripper for ReqwestTransport {
    async fn round_trip(&self, request: Request) -> Result<Response> {
        let ctx = request.context();
        let request = reqwest::Request::try_from(request)?;

        tracing::trace!(
            method = %request.method(),
            url = %request.url(),
            "Dispatching request to transport"
        );

        let response = ctx.run(async { Ok(self.client.execute(request).await?) }).await?;

        let mut builder = http::Response::builder()
            .status(response.status())
            .version(response.version());
        if let Some(headers) = builder.headers_mut() {
            *headers = response.headers().clone();
        }
        builder
            .body(Body::from(response))
            .map_err(Error::transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_round_tripper_fn() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let transport = RoundTripperFn::new(move |_request: Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(http::Response::new(Body::empty())) }
        });

        let response = transport
            .round_trip(http::Request::new(Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shared_round_tripper_delegates() {
        let transport: SharedRoundTripper =
            Arc::new(RoundTripperFn::new(|_request: Request| async {
                Err::<Response, _>(Error::transport("network error"))
            }));

        let err = transport
            .round_trip(http::Request::new(Body::empty()))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Transport error: network error");
    }
}
