use super::Middleware;
use crate::{Error, Request, RequestContextExt, Response, Result, RoundTripper, SharedRoundTripper};
use async_trait::async_trait;
use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which point of a call a [`LogEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPhase {
    /// The request is about to be handed to the next stage.
    Started,
    /// The next stage returned a response.
    Completed,
    /// The next stage returned an error.
    Failed,
}

/// One observation of a request made by [`with_logging`].
#[derive(Debug, Clone, Copy)]
pub struct LogEvent<'a> {
    /// Which point of the call this is.
    pub phase: LogPhase,
    /// The request method.
    pub method: &'a Method,
    /// The request path.
    pub path: &'a str,
    /// The request host, if the target has one.
    pub host: Option<&'a str>,
    /// The correlation id from the request context.
    pub request_id: Option<&'a str>,
    /// The response status, for [`LogPhase::Completed`].
    pub status: Option<StatusCode>,
    /// Wall-clock time spent in the next stage, once it returned.
    pub duration: Option<Duration>,
    /// The error, for [`LogPhase::Failed`].
    pub error: Option<&'a Error>,
}

/// Receives [`LogEvent`]s.
pub trait RequestLogger: Send + Sync {
    /// Records one event.
    fn log(&self, event: &LogEvent<'_>);
}

impl<T> RequestLogger for Arc<T>
where
    T: RequestLogger + ?Sized,
{
    fn log(&self, event: &LogEvent<'_>) {
        (**self).log(event)
    }
}

/// Emits events through `tracing`.
///
/// `Started` is logged at debug, `Completed` at info and `Failed` at warn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl RequestLogger for TracingLogger {
    fn log(&self, event: &LogEvent<'_>) {
        let request_id = event.request_id.unwrap_or("");
        let duration_ms = event.duration.map(|d| d.as_millis() as u64).unwrap_or(0);
        match event.phase {
            LogPhase::Started => tracing::debug!(
                method = %event.method,
                path = event.path,
                host = event.host.unwrap_or(""),
                request_id = request_id,
                "sending request"
            ),
            LogPhase::Completed => tracing::info!(
                method = %event.method,
                path = event.path,
                request_id = request_id,
                status_code = event.status.map(|s| s.as_u16()).unwrap_or(0),
                duration_ms = duration_ms,
                "request completed"
            ),
            LogPhase::Failed => tracing::warn!(
                method = %event.method,
                path = event.path,
                request_id = request_id,
                duration_ms = duration_ms,
                error = event.error.map(|e| e.to_string()).unwrap_or_default(),
                "request failed"
            ),
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl RequestLogger for NoopLogger {
    fn log(&self, _event: &LogEvent<'_>) {}
}

/// Logs every call made through the next stage.
///
/// The request, the response and the error are passed through untouched.
pub fn with_logging(logger: impl RequestLogger + 'static) -> Middleware {
    let logger: Arc<dyn RequestLogger> = Arc::new(logger);
    with_shared_logging(logger)
}

pub(crate) fn with_shared_logging(logger: Arc<dyn RequestLogger>) -> Middleware {
    Arc::new(move |next: SharedRoundTripper| {
        let stage: SharedRoundTripper = Arc::new(Logging {
            next,
            logger: logger.clone(),
        });
        stage
    })
}

struct Logging {
    next: SharedRoundTripper,
    logger: Arc<dyn RequestLogger>,
}

#[async_trait]
impl RoundTripper for Logging {
    async fn round_trip(&self, request: Request) -> Result<Response> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let host = request.uri().host().map(str::to_string);
        let request_id = request
            .context()
            .request_id()
            .map(|id| id.as_str().to_string());

        let mut event = LogEvent {
            phase: LogPhase::Started,
            method: &method,
            path: &path,
            host: host.as_deref(),
            request_id: request_id.as_deref(),
            status: None,
            duration: None,
            error: None,
        };
        self.logger.log(&event);

        let start = Instant::now();
        let outcome = self.next.round_trip(request).await;
        event.duration = Some(start.elapsed());

        match &outcome {
            Ok(response) => {
                event.phase = LogPhase::Completed;
                event.status = Some(response.status());
                self.logger.log(&event);
            }
            Err(err) => {
                event.phase = LogPhase::Failed;
                event.error = Some(err);
                self.logger.log(&event);
            }
        }

        outcome
    }
}
