//! Request cloning for safe replay.

use crate::{Body, Request, Result};

/// Produces an independent copy of `request` that can be sent separately.
///
/// Headers and extensions (including the [`Context`](crate::Context)) are
/// copied, so mutating the clone's headers leaves the original untouched.
///
/// A streaming body is buffered into memory once and then shared by both
/// requests, which from then on read it independently. Memory use is bounded
/// by the body size; there is no streaming replay.
///
/// # Errors
///
/// Returns the stream error if buffering the body fails. The original body has
/// been consumed at that point.
///
/// # Examples
///
/// ```
/// use tether::{clone_request, Body};
///
/// # async fn example() -> tether::Result<()> {
/// let mut original = http::Request::post("http://scheduler.local/jobs")
///     .body(Body::from("payload"))
///     .unwrap();
///
/// let clone = clone_request(&mut original).await?;
/// assert_eq!(clone.into_body().collect().await?, "payload");
/// assert_eq!(original.into_body().collect().await?, "payload");
/// # Ok(())
/// # }
/// ```
pub async fn clone_request(request: &mut Request) -> Result<Request> {
    let replayable = request.body().try_clone();
    let body = match replayable {
        Some(body) => body,
        None => {
            let streamed = std::mem::take(request.body_mut());
            let bytes = streamed.collect().await?;
            tracing::trace!(bytes = bytes.len(), "Buffered request body for replay");
            *request.body_mut() = Body::from(bytes.clone());
            Body::from(bytes)
        }
    };

    let mut clone = http::Request::new(body);
    *clone.method_mut() = request.method().clone();
    *clone.uri_mut() = request.uri().clone();
    *clone.version_mut() = request.version();
    *clone.headers_mut() = request.headers().clone();
    *clone.extensions_mut() = request.extensions().clone();
    Ok(clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, Error, RequestContextExt};
    use bytes::Bytes;
    use futures::stream;
    use http::{HeaderValue, Method};

    #[tokio::test]
    async fn test_clone_without_body() {
        let mut original = http::Request::get("http://scheduler.local/test")
            .header("X-Original", "true")
            .body(Body::empty())
            .unwrap();

        let cloned = clone_request(&mut original).await.unwrap();

        assert_eq!(cloned.method(), Method::GET);
        assert_eq!(cloned.uri(), original.uri());
        assert_eq!(cloned.headers().get("X-Original").unwrap(), "true");
        assert!(cloned.body().is_empty());
    }

    #[tokio::test]
    async fn test_clone_buffers_streaming_body() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"pay")),
            Ok(Bytes::from_static(b"load")),
        ];
        let mut original = http::Request::post("http://scheduler.local/test")
            .body(Body::from_stream(stream::iter(chunks)))
            .unwrap();

        let cloned = clone_request(&mut original).await.unwrap();

        assert!(original.body().is_replayable());
        assert_eq!(original.into_body().collect().await.unwrap(), "payload");
        assert_eq!(cloned.into_body().collect().await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_clone_headers_are_independent() {
        let mut original = http::Request::get("http://scheduler.local/test")
            .header("X-Original", "true")
            .body(Body::from("payload"))
            .unwrap();

        let mut cloned = clone_request(&mut original).await.unwrap();
        cloned
            .headers_mut()
            .insert("X-Original", HeaderValue::from_static("changed"));
        cloned
            .headers_mut()
            .insert("X-Clone-Only", HeaderValue::from_static("yes"));

        assert_eq!(original.headers().get("X-Original").unwrap(), "true");
        assert!(original.headers().get("X-Clone-Only").is_none());
    }

    #[tokio::test]
    async fn test_clone_shares_context() {
        let ctx = Context::new();
        let mut original = http::Request::new(Body::empty()).with_context(ctx.clone());

        let cloned = clone_request(&mut original).await.unwrap();
        ctx.cancel();

        assert!(matches!(cloned.context().err(), Some(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_clone_fails_when_stream_fails() {
        let chunks: Vec<Result<Bytes>> = vec![Err(Error::Body("reset".to_string()))];
        let mut original = http::Request::post("http://scheduler.local/test")
            .body(Body::from_stream(stream::iter(chunks)))
            .unwrap();

        assert!(clone_request(&mut original).await.is_err());
    }
}
