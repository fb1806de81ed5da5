use super::Middleware;
use crate::{
    clone_request, Backoff, Error, Request, RequestContextExt, Response, Result, RetryPolicy,
    RoundTripper, SharedRoundTripper,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Response extension recording how many attempts produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempts(pub usize);

/// Re-invokes the next stage up to `max_attempts` times with [`Backoff::Standard`].
///
/// See [`with_retry_backoff`].
pub fn with_retry(max_attempts: usize, policy: impl RetryPolicy + 'static) -> Middleware {
    with_retry_backoff(max_attempts, policy, Backoff::Standard)
}

/// Re-invokes the next stage up to `max_attempts` times.
///
/// After every attempt `policy` is asked whether to try again. The first
/// attempt sends the request as given; later attempts send a fresh
/// [`clone_request`] copy, so bodies are replayed. Buffering the body and
/// the sleep of `backoff.delay(attempt)` between attempts both stop early
/// with the context's error once the request context finishes.
///
/// The policy is consulted on the last attempt too. There a retryable error
/// becomes [`Error::RetriesExhausted`] and a retryable response, such as a
/// 503, is returned as is. `max_attempts` of zero behaves like one.
pub fn with_retry_backoff(
    max_attempts: usize,
    policy: impl RetryPolicy + 'static,
    backoff: Backoff,
) -> Middleware {
    with_shared_retry(max_attempts, Arc::new(policy), backoff)
}

pub(crate) fn with_shared_retry(
    max_attempts: usize,
    policy: Arc<dyn RetryPolicy>,
    backoff: Backoff,
) -> Middleware {
    let max_attempts = max_attempts.max(1);
    Arc::new(move |next: SharedRoundTripper| {
        let stage: SharedRoundTripper = Arc::new(Retry {
            next,
            max_attempts,
            policy: policy.clone(),
            backoff,
        });
        stage
    })
}

struct Retry {
    next: SharedRoundTripper,
    max_attempts: usize,
    policy: Arc<dyn RetryPolicy>,
    backoff: Backoff,
}

#[async_trait]
impl RoundTripper for Retry {
    async fn round_trip(&self, mut request: Request) -> Result<Response> {
        let ctx = request.context();
        let mut template = if self.max_attempts > 1 {
            Some(ctx.run(clone_request(&mut request)).await?)
        } else {
            None
        };
        let mut first = Some(request);
        let mut attempt = 0;

        loop {
            let current = match (first.take(), template.as_mut()) {
                (Some(request), _) => request,
                (None, Some(template)) => ctx.run(clone_request(template)).await?,
                (None, None) => {
                    return Err(Error::ConfigurationError(
                        "retry has no request left to send".to_string(),
                    ))
                }
            };

            let outcome = self.next.round_trip(current).await;
            let attempts = attempt + 1;

            if !self.policy.should_retry(&outcome, attempt) {
                return tag_attempts(outcome, attempts);
            }

            if attempts >= self.max_attempts {
                return match outcome {
                    Err(err) => {
                        tracing::warn!(attempts = attempts, error = %err, "All retry attempts failed");
                        Err(Error::RetriesExhausted {
                            attempts,
                            last_error: Box::new(err),
                        })
                    }
                    ok => tag_attempts(ok, attempts),
                };
            }

            match &outcome {
                Ok(response) => tracing::debug!(
                    status = response.status().as_u16(),
                    attempt = attempt,
                    "Retryable status received"
                ),
                Err(err) => tracing::debug!(
                    error = %err,
                    attempt = attempt,
                    "Retryable error received"
                ),
            }
            drop(outcome);

            let delay = self.backoff.delay(attempt);
            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                attempt = attempt,
                "Retrying request after delay"
            );

            tokio::select! {
                biased;
                err = ctx.done() => {
                    tracing::debug!(error = %err, attempt = attempt, "Retry aborted by context");
                    return Err(err);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

fn tag_attempts(outcome: Result<Response>, attempts: usize) -> Result<Response> {
    outcome.map(|mut response| {
        response.extensions_mut().insert(RetryAttempts(attempts));
        response
    })
}
