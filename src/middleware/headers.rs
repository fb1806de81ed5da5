use super::Middleware;
use crate::{Error, Request, Response, Result, RoundTripper, SharedRoundTripper};
use async_trait::async_trait;
use http::header::USER_AGENT;
use http::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;

/// Sets every given header on every request, overwriting existing values.
///
/// # Errors
///
/// Returns an error if a header name or value is invalid.
///
/// # Examples
///
/// ```
/// use tether::middleware::with_headers;
///
/// let middleware = with_headers([
///     ("X-SLURM-USER-NAME", "alice"),
///     ("Accept", "application/json"),
/// ])?;
/// # let _ = middleware;
/// # Ok::<(), tether::Error>(())
/// ```
pub fn with_headers<I, K, V>(headers: I) -> Result<Middleware>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        map.insert(name, value);
    }
    Ok(with_header_map(map))
}

/// Sets the `User-Agent` header on every request.
///
/// # Errors
///
/// Returns an error if `user_agent` is not a valid header value.
pub fn with_user_agent(user_agent: impl AsRef<str>) -> Result<Middleware> {
    let value = HeaderValue::try_from(user_agent.as_ref())
        .map_err(|e| Error::ConfigurationError(format!("Invalid user agent: {}", e)))?;
    let mut map = HeaderMap::new();
    map.insert(USER_AGENT, value);
    Ok(with_header_map(map))
}

fn with_header_map(headers: HeaderMap) -> Middleware {
    static_headers(headers, true)
}

/// Sets headers the request does not carry yet.
pub(crate) fn with_default_header_map(headers: HeaderMap) -> Middleware {
    static_headers(headers, false)
}

fn static_headers(headers: HeaderMap, overwrite: bool) -> Middleware {
    let headers = Arc::new(headers);
    Arc::new(move |next: SharedRoundTripper| {
        let stage: SharedRoundTripper = Arc::new(StaticHeaders {
            next,
            headers: headers.clone(),
            overwrite,
        });
        stage
    })
}

struct StaticHeaders {
    next: SharedRoundTripper,
    headers: Arc<HeaderMap>,
    overwrite: bool,
}

#[async_trait]
impl RoundTripper for StaticHeaders {
    async fn round_trip(&self, mut request: Request) -> Result<Response> {
        let target = request.headers_mut();
        for name in self.headers.keys() {
            if self.overwrite {
                target.remove(name);
            } else if target.contains_key(name) {
                continue;
            }
            for value in self.headers.get_all(name) {
                target.append(name.clone(), value.clone());
            }
        }
        self.next.round_trip(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_header_name_rejected() {
        let err = with_headers([("bad header", "value")]).err().unwrap();
        assert!(matches!(err, Error::ConfigurationError(_)));
    }

    #[test]
    fn test_invalid_user_agent_rejected() {
        assert!(with_user_agent("line\nbreak").is_err());
    }

    async fn seen_headers(middleware: Middleware, request: Request) -> HeaderMap {
        let echo = crate::RoundTripperFn::new(|request: Request| async move {
            let mut response = http::Response::new(crate::Body::empty());
            *response.headers_mut() = request.headers().clone();
            Ok::<Response, Error>(response)
        });
        let transport: SharedRoundTripper = Arc::new(echo);
        let response = middleware(transport).round_trip(request).await.unwrap();
        response.headers().clone()
    }

    #[tokio::test]
    async fn test_static_headers_overwrite_existing() {
        let request = http::Request::builder()
            .header("accept", "text/plain")
            .body(crate::Body::empty())
            .unwrap();
        let middleware = with_headers([("Accept", "application/json")]).unwrap();
        let headers = seen_headers(middleware, request).await;
        assert_eq!(headers.get_all("accept").iter().count(), 1);
        assert_eq!(headers["accept"], "application/json");
    }

    #[tokio::test]
    async fn test_default_headers_keep_existing() {
        let mut defaults = HeaderMap::new();
        defaults.insert("accept", HeaderValue::from_static("application/json"));
        defaults.insert("x-team", HeaderValue::from_static("hpc"));
        let request = http::Request::builder()
            .header("accept", "text/plain")
            .body(crate::Body::empty())
            .unwrap();
        let headers = seen_headers(with_default_header_map(defaults), request).await;
        assert_eq!(headers["accept"], "text/plain");
        assert_eq!(headers["x-team"], "hpc");
    }
}
