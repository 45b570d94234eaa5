//! YAML configuration for an embedding [`Service`].
//!
//! One file describes the provider, how texts are chunked and pooled, and
//! which reliability layers wrap the provider call.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//! name: "docs-search"
//!
//! provider:
//!   kind: openai            # openai | voyage | cohere | gemini | stub
//!   model: text-embedding-3-small
//!   api_key_env: OPENAI_API_KEY
//!   timeout_ms: 30000
//!
//! chunker:
//!   strategy: sentence      # none | sentence | paragraph | fixed
//!   max_size: 512
//!   overlap: 50
//!   trim_space: true
//!
//! pooling: mean             # mean | first | max
//! normalize: true
//!
//! reliability:
//!   rate_limit:
//!     requests_per_second: 10.0
//!     burst_size: 20
//!     max_wait: 5000
//!   circuit_breaker:
//!     failure_threshold: 5
//!     reset_timeout: 30000
//!   retry:
//!     max_retries: 3
//!     base_delay: 100
//!     max_delay: 10000
//!     jitter: true
//!   timeout_ms: 10000
//! ```
//!
//! Durations inside the reliability blocks are milliseconds.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use embed::resilience::{
    CircuitBreakerConfig, RateLimitConfig, RetryConfig, with_circuit_breaker_config,
    with_rate_limit_config, with_retry_config, with_timeout,
};
use embed::{Chunker, Layer, PoolingMode, Provider, ProviderError, Service};
use providers::{
    CohereConfig, CohereProvider, GeminiConfig, GeminiProvider, OpenAiConfig, OpenAiProvider,
    StubProvider, VoyageConfig, VoyageProvider,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("failed to initialise provider: {0}")]
    ProviderInit(#[from] ProviderError),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VexConfig {
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub provider: ProviderYamlConfig,

    #[serde(default)]
    pub chunker: Chunker,

    #[serde(default)]
    pub pooling: PoolingMode,

    /// L2-normalize every pooled vector.
    #[serde(default = "true_value")]
    pub normalize: bool,

    #[serde(default)]
    pub reliability: ReliabilityYamlConfig,
}

impl VexConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: VexConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.provider.validate()?;
        self.reliability.validate()?;

        if self.chunker.overlap > 0 && self.chunker.max_size == 0 {
            return Err(ConfigLoadError::Validation(
                "chunker.overlap requires chunker.max_size >= 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Assemble the provider, its reliability layers and the chunk/pool
    /// settings into a ready [`Service`].
    pub fn build_service(&self) -> Result<Service, ConfigLoadError> {
        let provider = self.provider.build()?;
        let layers = self.reliability.layers();
        debug!(
            provider = %provider.name(),
            dimensions = provider.dimensions(),
            layers = layers.len(),
            "service_configured"
        );

        Ok(Service::builder(provider)
            .layers(layers)
            .chunker(self.chunker.clone())
            .pooling(self.pooling)
            .normalize(self.normalize)
            .build())
    }
}

impl Default for VexConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            provider: ProviderYamlConfig::default(),
            chunker: Chunker::default(),
            pooling: PoolingMode::default(),
            normalize: true,
            reliability: ReliabilityYamlConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "voyage")]
    Voyage,
    #[serde(rename = "cohere")]
    Cohere,
    #[serde(rename = "gemini")]
    Gemini,
    /// Offline deterministic vectors; needs no key.
    #[default]
    #[serde(rename = "stub")]
    Stub,
}

/// Provider section of the YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderYamlConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    /// Backend default when unset.
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the key, consulted when `api_key` is unset.
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub dimensions: Option<usize>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProviderYamlConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Stub,
            model: None,
            api_key: None,
            api_key_env: None,
            base_url: None,
            dimensions: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ProviderYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.timeout_ms == 0 {
            return Err(ConfigLoadError::Validation(
                "provider.timeout_ms must be >= 1".to_string(),
            ));
        }
        if self.dimensions == Some(0) {
            return Err(ConfigLoadError::Validation(
                "provider.dimensions must be >= 1".to_string(),
            ));
        }
        if self.model.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigLoadError::Validation(
                "provider.model must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The API key, taken from `api_key` or else from the `api_key_env`
    /// variable.
    pub fn resolve_api_key(&self) -> Result<String, ConfigLoadError> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            return Ok(key.to_string());
        }
        if let Some(var) = self.api_key_env.as_deref() {
            return std::env::var(var)
                .ok()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    ConfigLoadError::MissingField(format!(
                        "provider.api_key (environment variable {var} is not set)"
                    ))
                });
        }
        Err(ConfigLoadError::MissingField("provider.api_key".to_string()))
    }

    pub fn build(&self) -> Result<Arc<dyn Provider>, ConfigLoadError> {
        let timeout = Duration::from_millis(self.timeout_ms);

        let provider: Arc<dyn Provider> = match self.kind {
            ProviderKind::Stub => {
                let stub = StubProvider::new(self.dimensions.unwrap_or(1536));
                match &self.model {
                    Some(name) => Arc::new(stub.with_name(name.clone())),
                    None => Arc::new(stub),
                }
            }
            ProviderKind::OpenAi => {
                let mut cfg = OpenAiConfig::new(self.resolve_api_key()?).with_timeout(timeout);
                if let Some(model) = &self.model {
                    cfg = cfg.with_model(model.clone());
                }
                if let Some(url) = &self.base_url {
                    cfg = cfg.with_base_url(url.clone());
                }
                if let Some(dimensions) = self.dimensions {
                    cfg = cfg.with_dimensions(dimensions);
                }
                Arc::new(OpenAiProvider::new(cfg)?)
            }
            ProviderKind::Voyage => {
                let mut cfg = VoyageConfig::new(self.resolve_api_key()?).with_timeout(timeout);
                if let Some(model) = &self.model {
                    cfg = cfg.with_model(model.clone());
                }
                if let Some(url) = &self.base_url {
                    cfg = cfg.with_base_url(url.clone());
                }
                if let Some(dimensions) = self.dimensions {
                    cfg = cfg.with_dimensions(dimensions);
                }
                Arc::new(VoyageProvider::new(cfg)?)
            }
            ProviderKind::Cohere => {
                let mut cfg = CohereConfig::new(self.resolve_api_key()?).with_timeout(timeout);
                if let Some(model) = &self.model {
                    cfg = cfg.with_model(model.clone());
                }
                if let Some(url) = &self.base_url {
                    cfg = cfg.with_base_url(url.clone());
                }
                if let Some(dimensions) = self.dimensions {
                    cfg = cfg.with_dimensions(dimensions);
                }
                Arc::new(CohereProvider::new(cfg)?)
            }
            ProviderKind::Gemini => {
                let mut cfg = GeminiConfig::new(self.resolve_api_key()?).with_timeout(timeout);
                if let Some(model) = &self.model {
                    cfg = cfg.with_model(model.clone());
                }
                if let Some(url) = &self.base_url {
                    cfg = cfg.with_base_url(url.clone());
                }
                if let Some(dimensions) = self.dimensions {
                    cfg = cfg.with_dimensions(dimensions);
                }
                Arc::new(GeminiProvider::new(cfg)?)
            }
        };

        Ok(provider)
    }
}

/// Reliability layers. Each block is optional; an absent block installs
/// nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReliabilityYamlConfig {
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,

    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    #[serde(default)]
    pub retry: Option<RetryConfig>,

    /// Per-attempt deadline.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ReliabilityYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if let Some(rate) = &self.rate_limit {
            if rate.requests_per_second.is_nan() || rate.requests_per_second <= 0.0 {
                return Err(ConfigLoadError::Validation(
                    "reliability.rate_limit.requests_per_second must be > 0".to_string(),
                ));
            }
            if rate.burst_size == 0 {
                return Err(ConfigLoadError::Validation(
                    "reliability.rate_limit.burst_size must be >= 1".to_string(),
                ));
            }
        }
        if self
            .circuit_breaker
            .is_some_and(|breaker| breaker.failure_threshold == 0)
        {
            return Err(ConfigLoadError::Validation(
                "reliability.circuit_breaker.failure_threshold must be >= 1".to_string(),
            ));
        }
        if let Some(retry) = &self.retry {
            if retry.base_delay > retry.max_delay {
                return Err(ConfigLoadError::Validation(
                    "reliability.retry.base_delay must not exceed max_delay".to_string(),
                ));
            }
        }
        if self.timeout_ms == Some(0) {
            return Err(ConfigLoadError::Validation(
                "reliability.timeout_ms must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Layers in outermost-first order: rate limit, circuit breaker, retry,
    /// then the per-attempt timeout.
    pub fn layers(&self) -> Vec<Layer> {
        let mut layers = Vec::new();
        if let Some(rate) = self.rate_limit {
            layers.push(with_rate_limit_config(rate));
        }
        if let Some(breaker) = self.circuit_breaker {
            layers.push(with_circuit_breaker_config(breaker));
        }
        if let Some(retry) = self.retry {
            layers.push(with_retry_config(retry));
        }
        if let Some(ms) = self.timeout_ms {
            layers.push(with_timeout(Duration::from_millis(ms)));
        }
        layers
    }
}

fn true_value() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}
