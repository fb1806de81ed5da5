//! Example composing a middleware pipeline by hand.
//!
//! This example shows how to:
//! - Stack request IDs, logging, metrics, a circuit breaker, retries and timeouts
//! - Choose a retry policy and backoff schedule
//! - Inspect breaker state and collected metrics afterwards
//!
//! Run with: `cargo run --example pipeline`

use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tether::middleware::{
    chain, with_logging, with_metrics, with_request_id, with_retry_backoff,
    with_shared_circuit_breaker, with_timeout, with_user_agent, CircuitBreaker,
    InMemoryCollector, TracingLogger,
};
use tether::retry::{AnyPolicy, RetryOnStatus, RetryOnTransportError};
use tether::{
    Backoff, Body, Context, Error, RequestContextExt, ReqwestTransport, RoundTripper,
    SharedRoundTripper,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("tether=debug,pipeline=info")
        .init();

    let breaker = Arc::new(CircuitBreaker::new(3, Duration::from_secs(30)));
    let collector = Arc::new(InMemoryCollector::new());

    let policy = AnyPolicy::new(vec![
        Box::new(RetryOnStatus::new([
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ])),
        Box::new(RetryOnTransportError),
    ]);

    let raw: SharedRoundTripper = Arc::new(ReqwestTransport::default());
    let transport = chain([
        with_request_id(tether::uuid_request_id),
        with_user_agent("tether-pipeline-demo/0.1")?,
        with_logging(TracingLogger),
        with_metrics(collector.clone()),
        with_shared_circuit_breaker(breaker.clone()),
        with_retry_backoff(
            4,
            policy,
            Backoff::Exponential {
                initial_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(2),
                jitter: true,
            },
        ),
        with_timeout(Duration::from_secs(5)),
    ])(raw);

    println!("=== Example 1: A healthy endpoint ===");
    let request = http::Request::get("https://httpbin.org/get")
        .body(Body::empty())
        .map_err(|e| Error::ConfigurationError(e.to_string()))?;
    match transport.round_trip(request).await {
        Ok(response) => println!("Status: {}", response.status()),
        Err(e) => println!("Failed: {}", e),
    }
    println!();

    println!("=== Example 2: An endpoint that keeps failing ===");
    for i in 0..4 {
        let request = http::Request::get("https://httpbin.org/status/503")
            .body(Body::empty())
            .map_err(|e| Error::ConfigurationError(e.to_string()))?;
        match transport.round_trip(request).await {
            Ok(response) => println!("Call {}: status {}", i, response.status()),
            Err(e) if e.is_circuit_open() => println!("Call {}: short-circuited", i),
            Err(e) => println!("Call {}: failed: {}", i, e),
        }
    }
    println!("Breaker failure count: {}", breaker.failure_count());
    println!();

    println!("=== Example 3: A caller-imposed deadline ===");
    let ctx = Context::new().with_timeout(Duration::from_millis(500));
    let request = http::Request::get("https://httpbin.org/delay/3")
        .body(Body::empty())
        .map_err(|e| Error::ConfigurationError(e.to_string()))?
        .with_context(ctx);
    match transport.round_trip(request).await {
        Ok(response) => println!("Status: {}", response.status()),
        Err(e) => println!("Gave up: {}", e),
    }
    println!();

    let stats = collector.stats();
    println!("=== Metrics ===");
    println!("Requests: {}", stats.total_requests);
    println!("Responses by status: {:?}", stats.responses_by_status);
    println!("Errors by kind: {:?}", stats.errors_by_kind);
    println!("Average latency: {:?}", stats.response_times.average);

    Ok(())
}
