//! A typed JSON client on top of the middleware pipeline.
//!
//! The [`Client`] type is the main entry point for making HTTP requests.
//! Use [`ClientBuilder`] to configure the pipeline and create clients.

use crate::{
    metadata::RequestMetadata,
    middleware::{
        chain, uuid_request_id, with_default_header_map, with_request_id,
        with_shared_circuit_breaker, with_shared_logging, with_shared_metrics, with_shared_retry,
        with_timeout, CircuitBreaker, MetricsCollector, Middleware, RequestLogger, RetryAttempts,
        TracingLogger,
    },
    ApiResponse, Backoff, Body, DefaultShouldRetry, Error, PipelineConfig, Request,
    RequestContextExt, ReqwestTransport, Response, Result, RetryPolicy, RoundTripper,
    SharedRoundTripper,
};
use http::header::{CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

type RequestIdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// An HTTP client whose requests run through a resilient middleware pipeline.
///
/// The client is designed to be reused across multiple requests. Clones share
/// the pipeline, including circuit breaker state and the connection pool.
///
/// # Examples
///
/// ```no_run
/// use tether::{ApiResponse, Client};
/// use std::time::Duration;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize)]
/// struct SubmitJob {
///     script: String,
///     partition: String,
/// }
///
/// #[derive(Deserialize)]
/// struct Submitted {
///     job_id: u64,
/// }
///
/// # async fn example() -> Result<(), tether::Error> {
/// let client = Client::builder()
///     .base_url("http://slurmrestd.local:6820")?
///     .timeout(Duration::from_secs(10))
///     .retry(3)
///     .build()?;
///
/// let job = SubmitJob {
///     script: "#!/bin/bash\nsrun hostname".to_string(),
///     partition: "debug".to_string(),
/// };
/// let submitted: ApiResponse<Submitted> = client.post("/slurm/v0.0.40/job/submit", &job).await?;
/// println!("Submitted job {}", submitted.data.job_id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: SharedRoundTripper,
    base_url: Url,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_str())
            .field("circuit_breaker", &self.inner.circuit_breaker)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The base URL paths are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The circuit breaker guarding this client, if one is configured.
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.inner.circuit_breaker.as_ref()
    }

    /// The composed pipeline, for use wherever a round-tripper is expected.
    pub fn transport(&self) -> SharedRoundTripper {
        self.inner.transport.clone()
    }

    /// Sends a raw request through the pipeline.
    ///
    /// Non-2xx statuses are returned as normal responses.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tether::{Body, Client};
    ///
    /// # async fn example() -> Result<(), tether::Error> {
    /// let client = Client::builder()
    ///     .base_url("http://slurmrestd.local:6820")?
    ///     .build()?;
    ///
    /// let request = http::Request::get("http://slurmrestd.local:6820/openapi/v3")
    ///     .body(Body::empty())
    ///     .map_err(|e| tether::Error::ConfigurationError(e.to_string()))?;
    /// let response = client.execute(request).await?;
    /// let document = response.into_body().text().await?;
    /// println!("{} bytes of OpenAPI", document.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.inner.transport.round_trip(request).await
    }

    /// Makes a typed HTTP request.
    ///
    /// The body, if any, is sent as JSON. A 2xx response body is deserialized
    /// into `Res`; an empty body deserializes like JSON `null`. Any other
    /// status becomes [`Error::HttpError`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tether::{Client, Context, metadata::RequestMetadata};
    /// use http::Method;
    /// use serde::Deserialize;
    /// use std::time::Duration;
    ///
    /// #[derive(Deserialize)]
    /// struct Jobs { jobs: Vec<serde_json::Value> }
    ///
    /// # async fn example() -> Result<(), tether::Error> {
    /// let client = Client::builder()
    ///     .base_url("http://slurmrestd.local:6820")?
    ///     .build()?;
    ///
    /// let metadata = RequestMetadata::new(Method::GET, "/slurm/v0.0.40/jobs")
    ///     .with_query_param("update_time", "1700000000")
    ///     .with_context(Context::new().with_timeout(Duration::from_secs(5)));
    ///
    /// let response = client.call::<(), Jobs>(metadata, None).await?;
    /// println!("Found {} jobs", response.data.jobs.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call<Req, Res>(
        &self,
        metadata: RequestMetadata,
        body: Option<&Req>,
    ) -> Result<ApiResponse<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let request = self.build_request(metadata, body)?;

        let start_time = Instant::now();
        let response = self.execute(request).await?;
        self.parse_response(response, start_time).await
    }

    fn build_request<Req>(&self, metadata: RequestMetadata, body: Option<&Req>) -> Result<Request>
    where
        Req: Serialize,
    {
        let mut url = self.inner.base_url.clone();
        url.set_path(&metadata.path);

        for (key, value) in &metadata.query_params {
            url.query_pairs_mut().append_pair(key, value);
        }

        tracing::debug!(
            method = %metadata.method,
            url = %url,
            "Building HTTP request"
        );

        let body = match body {
            Some(body) => {
                let json = serde_json::to_vec(body)
                    .map_err(|e| Error::SerializationFailed(e.to_string()))?;
                Body::from(json)
            }
            None => Body::empty(),
        };
        let has_body = !body.is_empty();

        let mut request = http::Request::builder()
            .method(metadata.method)
            .uri(url.as_str())
            .body(body)
            .map_err(|e| Error::ConfigurationError(format!("Invalid request: {}", e)))?;

        *request.headers_mut() = metadata.headers;
        if has_body && !request.headers().contains_key(CONTENT_TYPE) {
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        if let Some(ctx) = metadata.context {
            request.set_context(ctx);
        }

        Ok(request)
    }

    /// Reads the response and returns a typed `ApiResponse`.
    async fn parse_response<Res>(
        &self,
        response: Response,
        start_time: Instant,
    ) -> Result<ApiResponse<Res>>
    where
        Res: DeserializeOwned,
    {
        let status = response.status();
        let attempts = response
            .extensions()
            .get::<RetryAttempts>()
            .map(|attempts| attempts.0)
            .unwrap_or(1);
        let (parts, body) = response.into_parts();
        let headers = parts.headers;
        let raw_body = body.text().await?;
        let latency = start_time.elapsed();

        tracing::info!(
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            attempts = attempts,
            "Received HTTP response"
        );

        if !status.is_success() {
            if status.is_client_error() {
                tracing::error!(
                    status = status.as_u16(),
                    response = %raw_body,
                    "Client error (4xx)"
                );
            } else if status.is_server_error() {
                tracing::warn!(
                    status = status.as_u16(),
                    response = %raw_body,
                    "Server error (5xx)"
                );
            }

            return Err(Error::HttpError {
                status,
                raw_response: raw_body,
                headers,
            });
        }

        let parsed = if raw_body.trim().is_empty() {
            serde_json::from_str::<Res>("null")
        } else {
            serde_json::from_str::<Res>(&raw_body)
        };

        match parsed {
            Ok(data) => Ok(ApiResponse {
                data,
                raw_body,
                status,
                headers,
                latency,
                attempts,
            }),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_response = %raw_body,
                    "Failed to deserialize response"
                );

                Err(Error::DeserializationFailed {
                    raw_response: raw_body,
                    serde_error: e.to_string(),
                    status,
                })
            }
        }
    }

    /// Makes a GET request to the specified path.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tether::Client;
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct Node { name: String, state: Vec<String> }
    ///
    /// #[derive(Deserialize)]
    /// struct Nodes { nodes: Vec<Node> }
    ///
    /// # async fn example() -> Result<(), tether::Error> {
    /// let client = Client::builder()
    ///     .base_url("http://slurmrestd.local:6820")?
    ///     .build()?;
    ///
    /// let nodes: tether::ApiResponse<Nodes> = client.get("/slurm/v0.0.40/nodes").await?;
    /// for node in &nodes.data.nodes {
    ///     println!("{}: {:?}", node.name, node.state);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get<Res>(&self, path: impl Into<String>) -> Result<ApiResponse<Res>>
    where
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::GET, path);
        self.call::<(), Res>(metadata, None).await
    }

    /// Makes a POST request to the specified path with a JSON body.
    pub async fn post<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<ApiResponse<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::POST, path);
        self.call(metadata, Some(body)).await
    }

    /// Makes a PUT request to the specified path with a JSON body.
    pub async fn put<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<ApiResponse<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::PUT, path);
        self.call(metadata, Some(body)).await
    }

    /// Makes a DELETE request to the specified path.
    pub async fn delete<Res>(&self, path: impl Into<String>) -> Result<ApiResponse<Res>>
    where
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::DELETE, path);
        self.call::<(), Res>(metadata, None).await
    }

    /// Makes a PATCH request to the specified path with a JSON body.
    pub async fn patch<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<ApiResponse<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::PATCH, path);
        self.call(metadata, Some(body)).await
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// [`ClientBuilder::build`] stacks the configured middlewares in a fixed
/// order, outermost first: request ID, default headers, logging, metrics,
/// custom middlewares, circuit breaker, retry, timeout, transport. Every
/// attempt therefore gets its own timeout and the breaker counts whole calls
/// rather than attempts.
///
/// # Examples
///
/// ```no_run
/// use tether::{Backoff, ClientBuilder};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), tether::Error> {
/// let client = ClientBuilder::new()
///     .base_url("http://slurmrestd.local:6820")?
///     .timeout(Duration::from_secs(10))
///     .retry(4)
///     .backoff(Backoff::Exponential {
///         initial_delay: Duration::from_millis(100),
///         max_delay: Duration::from_secs(10),
///         jitter: true,
///     })
///     .circuit_breaker(5, Duration::from_secs(30))
///     .default_header("X-SLURM-USER-NAME", "alice")?
///     .request_ids()
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    max_attempts: usize,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    backoff: Backoff,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    request_id: Option<RequestIdGenerator>,
    logger: Option<Arc<dyn RequestLogger>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    middlewares: Vec<Middleware>,
    transport: Option<SharedRoundTripper>,
    http_client: Option<reqwest::Client>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    ///
    /// By default requests are logged through `tracing` and sent once.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout: None,
            max_attempts: 1,
            retry_policy: None,
            backoff: Backoff::Standard,
            circuit_breaker: None,
            request_id: None,
            logger: Some(Arc::new(TracingLogger)),
            metrics: None,
            middlewares: Vec::new(),
            transport: None,
            http_client: None,
        }
    }

    /// Creates a builder preset from a [`PipelineConfig`].
    ///
    /// Further builder calls may add to or override the loaded settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the config fails validation or carries an invalid
    /// URL or header.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::new();

        if let Some(base_url) = &config.base_url {
            builder = builder.base_url(base_url)?;
        }
        if let Some(timeout_secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout_secs));
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent)?;
        }
        for (name, value) in &config.headers {
            builder = builder.default_header(name, value)?;
        }
        if config.request_id {
            builder = builder.request_ids();
        }
        if !config.logging {
            builder.logger = None;
        }
        if let Some(retry) = &config.retry {
            builder = builder.retry(retry.max_attempts).backoff(retry.backoff());
        }
        if let Some(breaker) = &config.circuit_breaker {
            builder = builder.circuit_breaker(breaker.threshold, breaker.cooldown());
        }

        Ok(builder)
    }

    /// Sets the base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// Headers set on an individual request take precedence.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the `User-Agent` header for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if `user_agent` is not a valid header value.
    pub fn user_agent(mut self, user_agent: impl AsRef<str>) -> Result<Self> {
        let value = HeaderValue::try_from(user_agent.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid user agent: {}", e)))?;
        self.default_headers.insert(USER_AGENT, value);
        Ok(self)
    }

    /// Sets the per-attempt timeout.
    ///
    /// This bounds each attempt but does not make slow attempts retryable:
    /// [`DefaultShouldRetry`] treats [`Error::DeadlineExceeded`] as final, so
    /// an attempt that runs out of time ends the call. Supply a
    /// [`ClientBuilder::retry_policy`] that accepts it to retry timeouts.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sends each request up to `max_attempts` times.
    ///
    /// Uses [`DefaultShouldRetry`] unless [`ClientBuilder::retry_policy`] is set.
    pub fn retry(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets a custom retry policy.
    pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Some(Arc::new(policy));
        self
    }

    /// Sets the delay schedule between attempts.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Adds a circuit breaker opening after `threshold` consecutive failures.
    pub fn circuit_breaker(self, threshold: usize, cooldown: Duration) -> Self {
        self.shared_circuit_breaker(Arc::new(CircuitBreaker::new(threshold, cooldown)))
    }

    /// Uses a breaker shared with other clients or inspected by the caller.
    pub fn shared_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Stamps every request with a UUID v4 `X-Request-ID`.
    pub fn request_ids(self) -> Self {
        self.request_id_generator(uuid_request_id)
    }

    /// Stamps every request with an `X-Request-ID` from `generator`.
    pub fn request_id_generator<G>(mut self, generator: G) -> Self
    where
        G: Fn() -> String + Send + Sync + 'static,
    {
        self.request_id = Some(Arc::new(generator));
        self
    }

    /// Replaces the default [`TracingLogger`].
    pub fn logger(mut self, logger: impl RequestLogger + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Turns request logging off.
    pub fn without_logging(mut self) -> Self {
        self.logger = None;
        self
    }

    /// Reports every call to `collector`.
    pub fn metrics(mut self, collector: impl MetricsCollector + 'static) -> Self {
        self.metrics = Some(Arc::new(collector));
        self
    }

    /// Adds a custom middleware between the observability stages and the breaker.
    ///
    /// Custom middlewares run in the order they were added.
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Replaces the raw transport.
    pub fn transport(mut self, transport: impl RoundTripper + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Uses a preconfigured `reqwest` client for the default transport.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided or the HTTP client cannot
    /// be created.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::ConfigurationError("Base URL is required".to_string()))?;

        let raw = match self.transport {
            Some(transport) => transport,
            None => {
                let http_client = match self.http_client {
                    Some(client) => client,
                    None => reqwest::Client::builder().build().map_err(|e| {
                        Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
                    })?,
                };
                let transport: SharedRoundTripper = Arc::new(ReqwestTransport::new(http_client));
                transport
            }
        };

        let mut stages: Vec<Middleware> = Vec::new();
        if let Some(generator) = self.request_id {
            stages.push(with_request_id(move || generator()));
        }
        if !self.default_headers.is_empty() {
            stages.push(with_default_header_map(self.default_headers));
        }
        if let Some(logger) = self.logger {
            stages.push(with_shared_logging(logger));
        }
        if let Some(collector) = self.metrics {
            stages.push(with_shared_metrics(collector));
        }
        stages.extend(self.middlewares);
        if let Some(breaker) = &self.circuit_breaker {
            stages.push(with_shared_circuit_breaker(breaker.clone()));
        }
        if self.max_attempts > 1 {
            let policy = self
                .retry_policy
                .unwrap_or_else(|| Arc::new(DefaultShouldRetry));
            stages.push(with_shared_retry(self.max_attempts, policy, self.backoff));
        }
        if let Some(timeout) = self.timeout {
            stages.push(with_timeout(timeout));
        }

        tracing::debug!(
            base_url = %base_url,
            stages = stages.len(),
            max_attempts = self.max_attempts,
            "Built HTTP client pipeline"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport: chain(stages)(raw),
                base_url,
                circuit_breaker: self.circuit_breaker,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
