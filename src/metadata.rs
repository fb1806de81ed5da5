//! What a single [`Client::call`](crate::Client::call) should send.

use crate::{Context, Error};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::collections::BTreeMap;

/// Method, path and per-call extras for [`Client::call`](crate::Client::call).
///
/// `path` replaces the path of the client's base URL. Headers set here win
/// over the client's default headers, and query parameters are encoded in
/// key order so identical calls produce identical URLs.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub query_params: BTreeMap<String, String>,
    /// Runs the call under this context instead of a background one.
    pub context: Option<Context>,
}

impl RequestMetadata {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query_params: BTreeMap::new(),
            context: None,
        }
    }

    /// Sets `name` to `value`, replacing earlier values for that name.
    ///
    /// # Errors
    ///
    /// [`Error::ConfigurationError`] when either part is not a legal header.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, Error> {
        let (name, value) = (name.as_ref(), value.as_ref());
        let header_name = HeaderName::try_from(name).map_err(|e| {
            Error::ConfigurationError(format!("Invalid header name {:?}: {}", name, e))
        })?;
        let header_value = HeaderValue::try_from(value).map_err(|e| {
            Error::ConfigurationError(format!("Invalid value for header {}: {}", name, e))
        })?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// A later value for the same key replaces the earlier one.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    pub fn with_context(mut self, ctx: Context) -> Self {
        self.context = Some(ctx);
        self
    }
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::new(Method::GET, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_header_rejected() {
        let err = RequestMetadata::new(Method::GET, "/jobs")
            .with_header("bad header", "x")
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));
        assert!(err.to_string().contains("bad header"));
    }

    #[test]
    fn test_query_params_sorted_and_replaced() {
        let metadata = RequestMetadata::default()
            .with_query_param("state", "RUNNING")
            .with_query_param("account", "physics")
            .with_query_param("state", "PENDING");
        let pairs: Vec<_> = metadata.query_params.into_iter().collect();
        assert_eq!(
            pairs,
            vec![
                ("account".to_string(), "physics".to_string()),
                ("state".to_string(), "PENDING".to_string()),
            ]
        );
    }
}
