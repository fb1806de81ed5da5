//! Request and response bodies.
//!
//! A [`Body`] is either empty, fully buffered, or a single-use byte stream.
//! Buffered bodies can be read any number of times; streams are consumed by
//! the first reader. [`clone_request`](crate::clone_request) turns a stream
//! into a buffered body so it can be replayed.

use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;

/// The body of a [`Request`](crate::Request) or [`Response`](crate::Response).
#[derive(Default)]
pub struct Body {
    kind: Kind,
}

#[derive(Default)]
enum Kind {
    #[default]
    Empty,
    Full(Bytes),
    Stream(BoxStream<'static, Result<Bytes>>),
}

impl Body {
    /// Creates an empty body.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a single-use body from a stream of chunks.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: futures::Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            kind: Kind::Stream(stream.boxed()),
        }
    }

    /// Returns `true` if the body carries no bytes and no stream.
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            Kind::Empty => true,
            Kind::Full(bytes) => bytes.is_empty(),
            Kind::Stream(_) => false,
        }
    }

    /// Returns `true` if the body can be read more than once.
    pub fn is_replayable(&self) -> bool {
        !matches!(self.kind, Kind::Stream(_))
    }

    /// Returns the buffered bytes, or `None` for a stream.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            Kind::Empty => None,
            Kind::Full(bytes) => Some(bytes),
            Kind::Stream(_) => None,
        }
    }

    /// The exact length in bytes, when known without reading.
    pub fn content_length(&self) -> Option<u64> {
        match &self.kind {
            Kind::Empty => Some(0),
            Kind::Full(bytes) => Some(bytes.len() as u64),
            Kind::Stream(_) => None,
        }
    }

    /// Returns an independent reader over a buffered body.
    ///
    /// Buffered bytes are reference counted, so this does not copy them.
    /// Returns `None` for a stream.
    pub fn try_clone(&self) -> Option<Body> {
        match &self.kind {
            Kind::Empty => Some(Body::empty()),
            Kind::Full(bytes) => Some(Body::from(bytes.clone())),
            Kind::Stream(_) => None,
        }
    }

    /// Reads the whole body into memory.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by a streaming body.
    pub async fn collect(self) -> Result<Bytes> {
        match self.kind {
            Kind::Empty => Ok(Bytes::new()),
            Kind::Full(bytes) => Ok(bytes),
            Kind::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Reads the whole body and decodes it as UTF-8, replacing invalid sequences.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by a streaming body.
    pub async fn text(self) -> Result<String> {
        let bytes = self.collect().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Converts the body into a stream of chunks.
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        match self.kind {
            Kind::Empty => stream::empty().boxed(),
            Kind::Full(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            Kind::Stream(stream) => stream,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Empty => f.write_str("Body::Empty"),
            Kind::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
            Kind::Stream(_) => f.write_str("Body::Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self {
            kind: Kind::Full(bytes),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::from(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::from(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::from(Bytes::from_static(text.as_bytes()))
    }
}

impl From<Body> for reqwest::Body {
    fn from(body: Body) -> Self {
        match body.kind {
            Kind::Empty => reqwest::Body::from(Bytes::new()),
            Kind::Full(bytes) => reqwest::Body::from(bytes),
            Kind::Stream(stream) => reqwest::Body::wrap_stream(stream),
        }
    }
}

impl From<reqwest::Response> for Body {
    fn from(response: reqwest::Response) -> Self {
        Body::from_stream(response.bytes_stream().map(|chunk| chunk.map_err(Error::from)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked(parts: &[&'static str]) -> Body {
        let chunks: Vec<Result<Bytes>> = parts
            .iter()
            .map(|part| Ok(Bytes::from_static(part.as_bytes())))
            .collect();
        Body::from_stream(stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_stream_collects_all_chunks() {
        let body = chunked(&["pay", "lo", "ad"]);
        assert!(!body.is_replayable());
        assert_eq!(body.content_length(), None);
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_stream_error_is_propagated() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"pay")),
            Err(Error::Body("connection reset".to_string())),
        ];
        let body = Body::from_stream(stream::iter(chunks));
        let err = body.collect().await.unwrap_err();
        assert!(matches!(err, Error::Body(_)));
    }

    #[test]
    fn test_buffered_body_clones_share_bytes() {
        let body = Body::from("payload");
        let clone = body.try_clone().unwrap();
        assert_eq!(body.as_bytes(), clone.as_bytes());
        assert_eq!(clone.content_length(), Some(7));
        assert!(chunked(&["x"]).try_clone().is_none());
    }

    #[test]
    fn test_empty_body() {
        let body = Body::empty();
        assert!(body.is_empty());
        assert!(body.is_replayable());
        assert_eq!(body.content_length(), Some(0));
    }
}
