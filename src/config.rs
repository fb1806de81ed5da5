//! Declarative pipeline configuration loaded from TOML or JSON.
//!
//! ```toml
//! base_url = "http://slurmrestd.local:6820"
//! timeout_secs = 10
//! user_agent = "slurm-dash/1.0"
//! request_id = true
//!
//! [headers]
//! X-SLURM-USER-NAME = "alice"
//!
//! [retry]
//! max_attempts = 4
//! initial_delay_ms = 200
//! max_delay_ms = 5000
//!
//! [circuit_breaker]
//! threshold = 5
//! cooldown_secs = 30
//! ```

use crate::{Backoff, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Settings for a [`Client`](crate::Client) pipeline.
///
/// Every field is optional; missing sections leave the matching middleware out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// The base URL requests are resolved against.
    pub base_url: Option<String>,

    /// Per-attempt timeout in seconds.
    pub timeout_secs: Option<u64>,

    /// The `User-Agent` header value.
    pub user_agent: Option<String>,

    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,

    /// Whether to stamp every request with a generated `X-Request-ID`.
    pub request_id: bool,

    /// Whether to log requests through `tracing`.
    pub logging: bool,

    /// Retry settings; no retries when absent.
    pub retry: Option<RetryConfig>,

    /// Circuit breaker settings; no breaker when absent.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: None,
            user_agent: None,
            headers: BTreeMap::new(),
            request_id: false,
            logging: true,
            retry: None,
            circuit_breaker: None,
        }
    }
}

/// The `[retry]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: usize,

    /// Delay after the first attempt. Without it the standard
    /// one-second-plus-jitter doubling schedule is used.
    pub initial_delay_ms: Option<u64>,

    /// Upper bound for exponential delays; defaults to 30 seconds.
    pub max_delay_ms: Option<u64>,

    /// Whether exponential delays are jittered.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: None,
            max_delay_ms: None,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// The backoff schedule described by this section.
    pub fn backoff(&self) -> Backoff {
        match self.initial_delay_ms {
            Some(initial) => Backoff::Exponential {
                initial_delay: Duration::from_millis(initial),
                max_delay: Duration::from_millis(self.max_delay_ms.unwrap_or(30_000)),
                jitter: self.jitter,
            },
            None => Backoff::Standard,
        }
    }
}

/// The `[circuit_breaker]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub threshold: usize,

    /// Reserved recovery window in seconds.
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown_secs: 30,
        }
    }
}

impl CircuitBreakerConfig {
    /// The cooldown as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the document does not parse or
    /// fails [`PipelineConfig::validate`].
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::ConfigurationError(format!("Invalid TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the document does not parse or
    /// fails [`PipelineConfig::validate`].
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| Error::ConfigurationError(format!("Invalid JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config file, choosing JSON for `.json` files and TOML otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigurationError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "Loaded pipeline config");

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    /// Checks values that parse but cannot build a working pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if let Some(base_url) = &self.base_url {
            Url::parse(base_url).map_err(|e| {
                Error::ConfigurationError(format!("base_url {:?} is invalid: {}", base_url, e))
            })?;
        }

        if self.timeout_secs == Some(0) {
            return Err(invalid("timeout_secs must be greater than zero"));
        }

        if let Some(retry) = &self.retry {
            if retry.max_attempts == 0 {
                return Err(invalid("retry.max_attempts must be at least 1"));
            }
            if let (Some(initial), Some(max)) = (retry.initial_delay_ms, retry.max_delay_ms) {
                if max < initial {
                    return Err(invalid(
                        "retry.max_delay_ms must not be smaller than retry.initial_delay_ms",
                    ));
                }
            }
            if retry.max_delay_ms.is_some() && retry.initial_delay_ms.is_none() {
                return Err(invalid("retry.max_delay_ms requires retry.initial_delay_ms"));
            }
        }

        if let Some(breaker) = &self.circuit_breaker {
            if breaker.threshold == 0 {
                return Err(invalid("circuit_breaker.threshold must be at least 1"));
            }
        }

        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::ConfigurationError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(config.logging);
        assert!(config.retry.is_none());
    }

    #[test]
    fn test_full_toml_document() {
        let config = PipelineConfig::from_toml_str(
            r#"
            base_url = "http://slurmrestd.local:6820"
            timeout_secs = 10
            user_agent = "slurm-dash/1.0"
            request_id = true
            logging = false

            [headers]
            X-SLURM-USER-NAME = "alice"

            [retry]
            max_attempts = 4
            initial_delay_ms = 200
            max_delay_ms = 5000
            jitter = false

            [circuit_breaker]
            threshold = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url.as_deref(), Some("http://slurmrestd.local:6820"));
        assert_eq!(config.timeout_secs, Some(10));
        assert!(config.request_id);
        assert!(!config.logging);
        assert_eq!(config.headers["X-SLURM-USER-NAME"], "alice");

        let retry = config.retry.unwrap();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.backoff().delay(1), Duration::from_millis(400));

        let breaker = config.circuit_breaker.unwrap();
        assert_eq!(breaker.threshold, 2);
        assert_eq!(breaker.cooldown(), Duration::from_secs(30));
    }

    #[test]
    fn test_json_document() {
        let config = PipelineConfig::from_json_str(
            r#"{"base_url": "https://example.com", "retry": {"max_attempts": 2}}"#,
        )
        .unwrap();
        let retry = config.retry.unwrap();
        assert_eq!(retry.max_attempts, 2);
        assert!(matches!(retry.backoff(), Backoff::Standard));
    }

    #[test]
    fn test_validation_failures() {
        let cases = [
            "base_url = \"not a url\"",
            "timeout_secs = 0",
            "[retry]\nmax_attempts = 0",
            "[retry]\ninitial_delay_ms = 500\nmax_delay_ms = 100",
            "[retry]\nmax_delay_ms = 100",
            "[circuit_breaker]\nthreshold = 0",
        ];
        for case in cases {
            let err = PipelineConfig::from_toml_str(case).unwrap_err();
            assert!(matches!(err, Error::ConfigurationError(_)), "{}", case);
        }
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(PipelineConfig::from_toml_str("retries = 3").is_err());
    }

    #[test]
    fn test_from_file_picks_format_by_extension() {
        let dir = std::env::temp_dir();
        let json_path = dir.join(format!("tether-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&json_path, r#"{"request_id": true}"#).unwrap();
        assert!(PipelineConfig::from_file(&json_path).unwrap().request_id);
        std::fs::remove_file(&json_path).unwrap();

        let toml_path = dir.join(format!("tether-config-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&toml_path, "request_id = true").unwrap();
        assert!(PipelineConfig::from_file(&toml_path).unwrap().request_id);
        std::fs::remove_file(&toml_path).unwrap();

        assert!(PipelineConfig::from_file(dir.join("tether-missing.toml")).is_err());
    }
}
