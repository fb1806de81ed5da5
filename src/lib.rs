//! # Tether - a resilient HTTP middleware pipeline
//!
//! Tether wraps an HTTP round-tripper in composable middlewares: per-call
//! timeouts, retries with exponential backoff and jitter, a consecutive-failure
//! circuit breaker, request-ID propagation, static headers, and logging and
//! metrics hooks. A typed JSON [`Client`] sits on top of the pipeline.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tether::Client;
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Job {
//!     job_id: u64,
//!     job_state: Vec<String>,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tether::Error> {
//!     let client = Client::builder()
//!         .base_url("http://slurmrestd.local:6820")?
//!         .user_agent("slurm-dash/1.0")?
//!         .timeout(Duration::from_secs(10))
//!         .retry(3)
//!         .circuit_breaker(5, Duration::from_secs(30))
//!         .request_ids()
//!         .build()?;
//!
//!     let job = client.get::<Job>("/slurm/v0.0.40/job/42").await?;
//!     println!("job {} is {:?} after {} attempts", job.job_id, job.job_state, job.attempts);
//!     Ok(())
//! }
//! ```
//!
//! ## Composing a pipeline by hand
//!
//! Every middleware maps a [`SharedRoundTripper`] to a new one. [`chain`] puts
//! them together, outermost first:
//!
//! ```
//! use tether::middleware::{chain, with_circuit_breaker, with_retry, with_timeout};
//! use tether::{DefaultShouldRetry, ReqwestTransport, SharedRoundTripper};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let transport: SharedRoundTripper = Arc::new(ReqwestTransport::default());
//! let resilient = chain([
//!     with_circuit_breaker(5, Duration::from_secs(30)),
//!     with_retry(3, DefaultShouldRetry),
//!     with_timeout(Duration::from_secs(2)),
//! ])(transport);
//! # let _ = resilient;
//! ```
//!
//! ## Error Handling
//!
//! The pipeline never turns a status code into an error; only the JSON helpers
//! on [`Client`] do:
//!
//! ```no_run
//! use tether::{Client, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().base_url("http://slurmrestd.local:6820")?.build()?;
//! match client.get::<serde_json::Value>("/slurm/v0.0.40/diag").await {
//!     Ok(response) => println!("diag: {}", response.data),
//!     Err(Error::HttpError { status, raw_response, .. }) => {
//!         eprintln!("HTTP error {}: {}", status, raw_response);
//!     }
//!     Err(Error::CircuitOpen) => eprintln!("controller is unhealthy, backing off"),
//!     Err(e) => eprintln!("other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

mod body;
mod client;
mod config;
mod context;
mod error;
pub mod metadata;
pub mod middleware;
mod request;
mod response;
pub mod retry;
mod transport;

/// A request flowing through the pipeline.
pub type Request = http::Request<Body>;

/// A response flowing back through the pipeline.
pub type Response = http::Response<Body>;

pub use body::Body;
pub use client::{Client, ClientBuilder};
pub use config::{CircuitBreakerConfig, PipelineConfig, RetryConfig};
pub use context::{Context, RequestContextExt, RequestId, REQUEST_ID_HEADER};
pub use error::{BoxError, Error, Result};
pub use metadata::RequestMetadata;
pub use middleware::{chain, uuid_request_id, Middleware};
pub use request::clone_request;
pub use response::ApiResponse;
pub use retry::{calculate_backoff, default_should_retry, Backoff, DefaultShouldRetry, RetryPolicy};
pub use transport::{ReqwestTransport, RoundTripper, RoundTripperFn, SharedRoundTripper};
