//! Process-wide tuning knobs and per-index options.
//!
//! Everything the original exposed as mutable globals lives in a single
//! [`Config`] bundle that components borrow. A `Config` is validated once
//! on construction; invalid values never reach the write or read path.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised while assembling or validating configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// The remote service API key is missing.
    #[error("remote service api key not set")]
    #[diagnostic(
        code(remora::config::missing_api_key),
        help("set the api key, e.g. via the REMORA_API_KEY environment variable")
    )]
    MissingApiKey,

    /// A tuning knob is outside its permitted range.
    #[error("{name} = {value} is out of range {min}..={max}")]
    #[diagnostic(code(remora::config::out_of_range))]
    OutOfRange {
        name: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    /// The per-index creation spec is empty or not valid JSON.
    #[error("invalid index spec: {reason}")]
    #[diagnostic(
        code(remora::config::invalid_spec),
        help("the spec must be a non-empty JSON object, e.g. {{\"serverless\":{{\"cloud\":\"aws\",\"region\":\"us-west-2\"}}}}")
    )]
    InvalidSpec { reason: String },

    /// `spec` and `host` are mutually exclusive and one is required.
    #[error("exactly one of `spec` or `host` must be set")]
    #[diagnostic(
        code(remora::config::spec_or_host),
        help("pass a creation spec to build a new remote index, or a host to attach to an existing one")
    )]
    SpecOrHost,

    /// A control-plane operation was requested without a control URL.
    #[error("control-plane url not configured")]
    #[diagnostic(
        code(remora::config::missing_control_url),
        help("set the control url, e.g. via the REMORA_CONTROL_URL environment variable")
    )]
    MissingControlUrl,
}

/// Process-wide configuration.
///
/// Constructed with [`Config::new`] and adjusted with the `with_*`
/// builders, or loaded from the environment with [`Config::from_env`].
/// [`Config::validate`] enforces the documented ranges.
#[derive(Clone, Debug)]
pub struct Config {
    /// API key sent with every remote request. Required.
    pub api_key: String,
    /// Base URL of the remote control plane (index create/describe/list).
    /// Data-plane requests go straight to a per-index host.
    pub control_url: Option<String>,
    /// Number of matches requested from the remote service per query.
    pub top_k: u32,
    /// Vectors per upsert request.
    pub vectors_per_request: u32,
    /// Concurrent upsert requests per batch.
    pub requests_per_batch: u32,
    /// Cap on buffer tuples examined by a local scan.
    pub max_buffer_scan: u32,
    /// Cap on representative ids fetched per liveness probe.
    pub max_fetched_vectors_for_liveness_check: u32,
    /// Per-request network timeout.
    pub request_timeout: Duration,
}

impl Config {
    pub const DEFAULT_TOP_K: u32 = 10_000;
    pub const DEFAULT_VECTORS_PER_REQUEST: u32 = 100;
    pub const DEFAULT_REQUESTS_PER_BATCH: u32 = 20;
    pub const DEFAULT_MAX_BUFFER_SCAN: u32 = 10_000;
    pub const DEFAULT_MAX_PROBE: u32 = 10;
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            control_url: None,
            top_k: Self::DEFAULT_TOP_K,
            vectors_per_request: Self::DEFAULT_VECTORS_PER_REQUEST,
            requests_per_batch: Self::DEFAULT_REQUESTS_PER_BATCH,
            max_buffer_scan: Self::DEFAULT_MAX_BUFFER_SCAN,
            max_fetched_vectors_for_liveness_check: Self::DEFAULT_MAX_PROBE,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Load configuration from the environment (`REMORA_API_KEY`,
    /// `REMORA_CONTROL_URL`), honoring a `.env` file when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let api_key = std::env::var("REMORA_API_KEY").map_err(|_| ConfigError::MissingApiKey)?;
        let mut config = Self::new(api_key);
        config.control_url = std::env::var("REMORA_CONTROL_URL").ok();
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_control_url(mut self, url: impl Into<String>) -> Self {
        self.control_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = top_k;
        self
    }

    #[must_use]
    pub fn with_batch_shape(mut self, vectors_per_request: u32, requests_per_batch: u32) -> Self {
        self.vectors_per_request = vectors_per_request;
        self.requests_per_batch = requests_per_batch;
        self
    }

    #[must_use]
    pub fn with_max_buffer_scan(mut self, max: u32) -> Self {
        self.max_buffer_scan = max;
        self
    }

    #[must_use]
    pub fn with_max_probe(mut self, max: u32) -> Self {
        self.max_fetched_vectors_for_liveness_check = max;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Tuples demarcated by one checkpoint; also the size of one flush batch.
    #[must_use]
    pub fn batch_size(&self) -> u32 {
        self.vectors_per_request * self.requests_per_batch
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        range("top_k", self.top_k, 1, 10_000)?;
        range("vectors_per_request", self.vectors_per_request, 1, 1_000)?;
        range("requests_per_batch", self.requests_per_batch, 1, 100)?;
        range("max_buffer_scan", self.max_buffer_scan, 0, 100_000)?;
        range(
            "max_fetched_vectors_for_liveness_check",
            self.max_fetched_vectors_for_liveness_check,
            0,
            100,
        )?;
        Ok(())
    }

    pub fn control_url(&self) -> Result<&str, ConfigError> {
        self.control_url
            .as_deref()
            .ok_or(ConfigError::MissingControlUrl)
    }
}

fn range(name: &'static str, value: u32, min: u32, max: u32) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            name,
            value: u64::from(value),
            min: u64::from(min),
            max: u64::from(max),
        });
    }
    Ok(())
}

/// Per-index options, resolved at build time.
///
/// Exactly one of `spec` (create a fresh remote index) or `host` (attach
/// to an externally managed one) must be set.
#[derive(Clone, Debug, Default)]
pub struct IndexOptions {
    /// JSON creation spec forwarded to the remote control plane.
    pub spec: Option<serde_json::Value>,
    /// Host of a pre-existing remote index.
    pub host: Option<String>,
    /// When attaching to an existing host, clear it first.
    pub overwrite: bool,
    /// Initialize local pages only; skip the base-table upload.
    pub skip_build: bool,
}

impl IndexOptions {
    /// Options that create a remote index from a raw JSON spec string.
    pub fn with_spec(spec: &str) -> Result<Self, ConfigError> {
        if spec.trim().is_empty() {
            return Err(ConfigError::InvalidSpec {
                reason: "spec cannot be empty".into(),
            });
        }
        let spec = serde_json::from_str(spec).map_err(|e| ConfigError::InvalidSpec {
            reason: e.to_string(),
        })?;
        Ok(Self {
            spec: Some(spec),
            ..Self::default()
        })
    }

    /// Options that attach to an externally managed remote index.
    #[must_use]
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.spec, &self.host) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(ConfigError::SpecOrHost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::new("key").validate().is_ok());
    }

    #[test]
    fn empty_api_key_rejected() {
        assert!(matches!(
            Config::new("").validate(),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn out_of_range_knob_rejected() {
        let config = Config::new("key").with_batch_shape(0, 20);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                name: "vectors_per_request",
                ..
            })
        ));
    }

    #[test]
    fn batch_size_is_product() {
        let config = Config::new("key").with_batch_shape(4, 2);
        assert_eq!(config.batch_size(), 8);
    }

    #[test]
    fn spec_and_host_are_exclusive() {
        let mut options = IndexOptions::with_host("h");
        options.spec = Some(serde_json::json!({}));
        assert!(matches!(options.validate(), Err(ConfigError::SpecOrHost)));
        assert!(matches!(
            IndexOptions::default().validate(),
            Err(ConfigError::SpecOrHost)
        ));
        assert!(IndexOptions::with_host("h").validate().is_ok());
    }

    #[test]
    fn spec_must_be_json() {
        assert!(IndexOptions::with_spec("").is_err());
        assert!(IndexOptions::with_spec("not json").is_err());
        assert!(IndexOptions::with_spec(r#"{"serverless":{}}"#).is_ok());
    }
}
