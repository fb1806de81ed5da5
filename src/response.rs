//! Decoded results of the [`Client`](crate::Client) JSON helpers.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A 2xx reply decoded into `T`, plus what it took to get it.
///
/// ```no_run
/// # use serde::Deserialize;
/// # #[derive(Deserialize)]
/// # struct Ping { pings: Vec<serde_json::Value> }
/// # async fn example(client: tether::Client) -> Result<(), tether::Error> {
/// let ping = client.get::<Ping>("/slurm/v0.0.40/ping").await?;
/// if ping.was_retried() {
///     tracing::warn!(attempts = ping.attempts, "slurmrestd needed retries");
/// }
/// println!("{} controllers in {:?}", ping.pings.len(), ping.latency);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub data: T,

    /// Body text exactly as received, kept for diagnostics.
    pub raw_body: String,

    pub status: StatusCode,

    pub headers: HeaderMap,

    /// Wall time of the whole call: every attempt, every backoff and the body read.
    pub latency: Duration,

    /// Attempts the retry stage spent; `1` when nothing was retried.
    pub attempts: usize,
}

impl<T> ApiResponse<T> {
    /// Whether more than one attempt was sent.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// A header as text; `None` when missing or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Discards the transaction details.
    pub fn into_data(self) -> T {
        self.data
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        let Self {
            data,
            raw_body,
            status,
            headers,
            latency,
            attempts,
        } = self;
        ApiResponse {
            data: f(data),
            raw_body,
            status,
            headers,
            latency,
            attempts,
        }
    }
}

impl<T> std::ops::Deref for ApiResponse<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}
