//! Per-request cancellation, deadline and correlation state.
//!
//! A [`Context`] lives in the extensions of a [`Request`](crate::Request).
//! Middlewares read it with [`RequestContextExt::context`] and replace it with
//! [`RequestContextExt::set_context`]. A request that never had a context set
//! behaves as if it carried a background context: no deadline, never cancelled.

use crate::{Error, Result};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Header carrying the correlation identifier on outgoing requests.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// An opaque correlation identifier attached to one logical request.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl RequestId {
    /// Creates a request id from any string.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cancellation, deadline and correlation state carried by a request.
///
/// Cloning a context is cheap and every clone observes the same cancellation.
///
/// # Examples
///
/// ```
/// use tether::{Body, Context, RequestContextExt};
/// use std::time::Duration;
///
/// let ctx = Context::new().with_timeout(Duration::from_secs(5));
/// let request = http::Request::builder()
///     .uri("http://scheduler.local/jobs")
///     .body(Body::empty())
///     .unwrap()
///     .with_context(ctx.clone());
///
/// assert_eq!(request.context().deadline(), ctx.deadline());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    token: CancellationToken,
    request_id: Option<RequestId>,
}

impl Context {
    /// A background context: no deadline, cancelled only through [`Context::cancel`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a context cancelled whenever `token` is.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Sets an absolute deadline, replacing any existing one.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline `timeout` from now, replacing any existing one.
    ///
    /// A timeout too large to represent as an instant leaves no deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = deadline_after(timeout);
        self
    }

    /// Attaches a correlation id.
    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Derives a child context with a deadline `timeout` from now.
    ///
    /// The child is cancelled when the parent is, but cancelling the child
    /// leaves the parent untouched.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Self {
            deadline: deadline_after(timeout),
            token: self.token.child_token(),
            request_id: self.request_id.clone(),
        }
    }

    /// The deadline, if one is set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The correlation id, if one is set.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// The token that cancels this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the terminal error if the context is already finished.
    pub fn err(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline elapses.
    ///
    /// Never resolves for a background context that nobody cancels.
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => Error::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Error::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                Error::Cancelled
            }
        }
    }

    /// Drives `fut` to completion unless the context finishes first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`] when the
    /// context wins the race, otherwise whatever `fut` returns.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = fut => result,
        }
    }
}

fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Access to the [`Context`] stored in a request.
pub trait RequestContextExt {
    /// Returns the request's context, or a background context if none was set.
    fn context(&self) -> Context;

    /// Replaces the request's context.
    fn set_context(&mut self, ctx: Context);

    /// Builder-style [`RequestContextExt::set_context`].
    fn with_context(mut self, ctx: Context) -> Self
    where
        Self: Sized,
    {
        self.set_context(ctx);
        self
    }
}

impl<B> RequestContextExt for http::Request<B> {
    fn context(&self) -> Context {
        self.extensions().get::<Context>().cloned().unwrap_or_default()
    }

    fn set_context(&mut self, ctx: Context) {
        self.extensions_mut().insert(ctx);
    }
}
