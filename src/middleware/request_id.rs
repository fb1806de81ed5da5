use super::Middleware;
use crate::{
    Error, Request, RequestContextExt, RequestId, Response, Result, RoundTripper,
    SharedRoundTripper, REQUEST_ID_HEADER,
};
use async_trait::async_trait;
use http::{HeaderName, HeaderValue};
use std::sync::Arc;

/// Generates a random UUID v4 correlation id.
pub fn uuid_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Stamps every request with a generated correlation id.
///
/// `generator` is called once per request. The id is written to the
/// `X-Request-ID` header, replacing any existing value, and attached to the
/// request [`Context`](crate::Context) so later stages can read it without
/// parsing headers.
///
/// If the generator produces a value that is not a valid header value, the
/// call fails with [`Error::ConfigurationError`] before reaching the next stage.
pub fn with_request_id<G>(generator: G) -> Middleware
where
    G: Fn() -> String + Send + Sync + 'static,
{
    let generator: Arc<dyn Fn() -> String + Send + Sync> = Arc::new(generator);
    Arc::new(move |next: SharedRoundTripper| {
        let stage: SharedRoundTripper = Arc::new(Correlate {
            next,
            generator: generator.clone(),
        });
        stage
    })
}

struct Correlate {
    next: SharedRoundTripper,
    generator: Arc<dyn Fn() -> String + Send + Sync>,
}

#[async_trait]
impl RoundTripper for Correlate {
    async fn round_trip(&self, mut request: Request) -> Result<Response> {
        let id = (self.generator)();
        let value = HeaderValue::from_str(&id).map_err(|e| {
            Error::ConfigurationError(format!("Invalid request id {:?}: {}", id, e))
        })?;

        request
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        let ctx = request.context().with_request_id(RequestId::new(id));
        request.set_context(ctx);

        self.next.round_trip(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_request_ids_are_unique() {
        let a = uuid_request_id();
        let b = uuid_request_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
        assert!(HeaderValue::from_str(&a).is_ok());
    }
}
