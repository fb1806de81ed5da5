use super::Middleware;
use crate::{Error, Request, Response, Result, RoundTripper, SharedRoundTripper};
use async_trait::async_trait;
use http::{Method, StatusCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

/// Receives request, response and error events from [`with_metrics`].
pub trait MetricsCollector: Send + Sync {
    /// A request is about to be sent.
    fn record_request(&self, method: &Method, path: &str);

    /// A response was received after `duration`.
    fn record_response(&self, method: &Method, path: &str, status: StatusCode, duration: Duration);

    /// The call failed with `error`.
    fn record_error(&self, method: &Method, path: &str, error: &Error);
}

impl<T> MetricsCollector for Arc<T>
where
    T: MetricsCollector + ?Sized,
{
    fn record_request(&self, method: &Method, path: &str) {
        (**self).record_request(method, path)
    }

    fn record_response(&self, method: &Method, path: &str, status: StatusCode, duration: Duration) {
        (**self).record_response(method, path, status, duration)
    }

    fn record_error(&self, method: &Method, path: &str, error: &Error) {
        (**self).record_error(method, path, error)
    }
}

/// Reports every call made through the next stage to `collector`.
///
/// The request, the response and the error are passed through untouched.
pub fn with_metrics(collector: impl MetricsCollector + 'static) -> Middleware {
    let collector: Arc<dyn MetricsCollector> = Arc::new(collector);
    with_shared_metrics(collector)
}

pub(crate) fn with_shared_metrics(collector: Arc<dyn MetricsCollector>) -> Middleware {
    Arc::new(move |next: SharedRoundTripper| {
        let stage: SharedRoundTripper = Arc::new(Metrics {
            next,
            collector: collector.clone(),
        });
        stage
    })
}

struct Metrics {
    next: SharedRoundTripper,
    collector: Arc<dyn MetricsCollector>,
}

#[async_trait]
impl RoundTripper for Metrics {
    async fn round_trip(&self, request: Request) -> Result<Response> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        self.collector.record_request(&method, &path);
        let start = Instant::now();
        let outcome = self.next.round_trip(request).await;

        match &outcome {
            Ok(response) => {
                self.collector
                    .record_response(&method, &path, response.status(), start.elapsed())
            }
            Err(err) => self.collector.record_error(&method, &path, err),
        }

        outcome
    }
}

/// Count, total, min, max and mean of a set of durations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurationStats {
    /// Number of samples.
    pub count: u64,
    /// Sum of all samples.
    pub total: Duration,
    /// Smallest sample.
    pub min: Duration,
    /// Largest sample.
    pub max: Duration,
    /// Mean sample.
    pub average: Duration,
}

impl DurationStats {
    fn add(&mut self, sample: Duration) {
        if self.count == 0 || sample < self.min {
            self.min = sample;
        }
        if sample > self.max {
            self.max = sample;
        }
        self.count += 1;
        self.total += sample;
        self.average = self.total / u32::try_from(self.count).unwrap_or(u32::MAX);
    }
}

/// A snapshot of what an [`InMemoryCollector`] has seen.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    /// Requests started.
    pub total_requests: u64,
    /// Requests started but not yet answered or failed.
    pub active_requests: u64,
    /// Requests keyed by `"METHOD /path"`.
    pub requests_by_path: HashMap<String, u64>,
    /// Responses received.
    pub total_responses: u64,
    /// Responses keyed by status code.
    pub responses_by_status: HashMap<u16, u64>,
    /// Response latencies.
    pub response_times: DurationStats,
    /// Response latencies keyed by `"METHOD /path"`.
    pub response_times_by_path: HashMap<String, DurationStats>,
    /// Failed calls.
    pub total_errors: u64,
    /// Failed calls keyed by [`Error::kind`].
    pub errors_by_kind: HashMap<String, u64>,
    /// Failed calls keyed by `"METHOD /path"`.
    pub errors_by_path: HashMap<String, u64>,
    /// Time since the collector was created or last reset.
    pub uptime: Duration,
}

/// Aggregates metrics in memory; read them back with [`stats`](Self::stats).
///
/// # Examples
///
/// ```
/// use tether::middleware::{InMemoryCollector, MetricsCollector};
/// use http::{Method, StatusCode};
/// use std::time::Duration;
///
/// let collector = InMemoryCollector::new();
/// collector.record_request(&Method::GET, "/slurm/v0.0.40/jobs");
/// collector.record_response(&Method::GET, "/slurm/v0.0.40/jobs", StatusCode::OK, Duration::from_millis(12));
///
/// let stats = collector.stats();
/// assert_eq!(stats.total_requests, 1);
/// assert_eq!(stats.active_requests, 0);
/// assert_eq!(stats.responses_by_status[&200], 1);
/// ```
#[derive(Debug)]
pub struct InMemoryCollector {
    total_requests: AtomicU64,
    active_requests: AtomicU64,
    total_responses: AtomicU64,
    total_errors: AtomicU64,
    inner: Mutex<Aggregates>,
}

#[derive(Debug)]
struct Aggregates {
    requests_by_path: HashMap<String, u64>,
    responses_by_status: HashMap<u16, u64>,
    response_times: DurationStats,
    response_times_by_path: HashMap<String, DurationStats>,
    errors_by_kind: HashMap<String, u64>,
    errors_by_path: HashMap<String, u64>,
    started: Instant,
}

impl Aggregates {
    fn new() -> Self {
        Self {
            requests_by_path: HashMap::new(),
            responses_by_status: HashMap::new(),
            response_times: DurationStats::default(),
            response_times_by_path: HashMap::new(),
            errors_by_kind: HashMap::new(),
            errors_by_path: HashMap::new(),
            started: Instant::now(),
        }
    }
}

fn path_key(method: &Method, path: &str) -> String {
    format!("{} {}", method, path)
}

impl InMemoryCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            active_requests: AtomicU64::new(0),
            total_responses: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            inner: Mutex::new(Aggregates::new()),
        }
    }

    /// Returns a snapshot of everything recorded so far.
    pub fn stats(&self) -> Stats {
        let inner = self.inner.lock();
        Stats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            active_requests: self.active_requests.load(Ordering::Relaxed),
            requests_by_path: inner.requests_by_path.clone(),
            total_responses: self.total_responses.load(Ordering::Relaxed),
            responses_by_status: inner.responses_by_status.clone(),
            response_times: inner.response_times,
            response_times_by_path: inner.response_times_by_path.clone(),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            errors_by_kind: inner.errors_by_kind.clone(),
            errors_by_path: inner.errors_by_path.clone(),
            uptime: inner.started.elapsed(),
        }
    }

    /// Clears every counter.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = Aggregates::new();
        self.total_requests.store(0, Ordering::Relaxed);
        self.active_requests.store(0, Ordering::Relaxed);
        self.total_responses.store(0, Ordering::Relaxed);
        self.total_errors.store(0, Ordering::Relaxed);
    }

    fn finish_active(&self) {
        let _ = self
            .active_requests
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}

impl Default for InMemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector for InMemoryCollector {
    fn record_request(&self, method: &Method, path: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        *self
            .inner
            .lock()
            .requests_by_path
            .entry(path_key(method, path))
            .or_default() += 1;
    }

    fn record_response(&self, method: &Method, path: &str, status: StatusCode, duration: Duration) {
        self.total_responses.fetch_add(1, Ordering::Relaxed);
        self.finish_active();

        let mut inner = self.inner.lock();
        *inner.responses_by_status.entry(status.as_u16()).or_default() += 1;
        inner.response_times.add(duration);
        inner
            .response_times_by_path
            .entry(path_key(method, path))
            .or_default()
            .add(duration);
    }

    fn record_error(&self, method: &Method, path: &str, error: &Error) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.finish_active();

        let mut inner = self.inner.lock();
        *inner
            .errors_by_kind
            .entry(error.kind().to_string())
            .or_default() += 1;
        *inner
            .errors_by_path
            .entry(path_key(method, path))
            .or_default() += 1;
    }
}

static DESCRIBE: Once = Once::new();

/// Forwards events to the `metrics` facade.
///
/// Install a recorder (for example a Prometheus exporter) to collect them;
/// without one every call is a no-op.
///
/// ## Metrics Provided
///
/// - `tether_requests_total` - Counter (labels: method, path)
/// - `tether_responses_total` - Counter (labels: method, path, status)
/// - `tether_errors_total` - Counter (labels: method, path, kind)
/// - `tether_request_duration_seconds` - Histogram (labels: method, path)
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeCollector;

impl FacadeCollector {
    /// Creates the collector and registers metric descriptions once per process.
    pub fn new() -> Self {
        DESCRIBE.call_once(|| {
            ::metrics::describe_counter!("tether_requests_total", "Requests sent through the pipeline");
            ::metrics::describe_counter!("tether_responses_total", "Responses received, by status");
            ::metrics::describe_counter!("tether_errors_total", "Failed calls, by error kind");
            ::metrics::describe_histogram!(
                "tether_request_duration_seconds",
                "Time from sending a request to receiving its response head"
            );
        });
        Self
    }
}

impl MetricsCollector for FacadeCollector {
    fn record_request(&self, method: &Method, path: &str) {
        ::metrics::counter!(
            "tether_requests_total",
            "method" => method.to_string(),
            "path" => path.to_owned()
        )
        .increment(1);
    }

    fn record_response(&self, method: &Method, path: &str, status: StatusCode, duration: Duration) {
        ::metrics::counter!(
            "tether_responses_total",
            "method" => method.to_string(),
            "path" => path.to_owned(),
            "status" => status.as_u16().to_string()
        )
        .increment(1);
        ::metrics::histogram!(
            "tether_request_duration_seconds",
            "method" => method.to_string(),
            "path" => path.to_owned()
        )
        .record(duration.as_secs_f64());
    }

    fn record_error(&self, method: &Method, path: &str, error: &Error) {
        ::metrics::counter!(
            "tether_errors_total",
            "method" => method.to_string(),
            "path" => path.to_owned(),
            "kind" => error.kind()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_stats_aggregate() {
        let mut stats = DurationStats::default();
        stats.add(Duration::from_millis(30));
        stats.add(Duration::from_millis(10));
        stats.add(Duration::from_millis(20));

        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Duration::from_millis(10));
        assert_eq!(stats.max, Duration::from_millis(30));
        assert_eq!(stats.average, Duration::from_millis(20));
    }

    #[test]
    fn test_in_memory_collector_errors() {
        let collector = InMemoryCollector::new();
        collector.record_request(&Method::POST, "/jobs");
        collector.record_error(&Method::POST, "/jobs", &Error::CircuitOpen);

        let stats = collector.stats();
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.active_requests, 0);
        assert_eq!(stats.errors_by_kind["circuit_open"], 1);
        assert_eq!(stats.errors_by_path["POST /jobs"], 1);
    }

    #[test]
    fn test_in_memory_collector_reset() {
        let collector = InMemoryCollector::new();
        collector.record_request(&Method::GET, "/jobs");
        collector.reset();

        let stats = collector.stats();
        assert_eq!(stats.total_requests, 0);
        assert!(stats.requests_by_path.is_empty());
    }

    #[test]
    fn test_facade_collector_without_recorder() {
        let collector = FacadeCollector::new();
        collector.record_request(&Method::GET, "/jobs");
        collector.record_response(&Method::GET, "/jobs", StatusCode::OK, Duration::from_millis(5));
        collector.record_error(&Method::GET, "/jobs", &Error::Cancelled);
    }
}
