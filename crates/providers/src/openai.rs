//! OpenAI embeddings API.

use std::time::Duration;

use async_trait::async_trait;
use embed::{CancellationToken, EmbeddingResponse, Provider, ProviderError, Usage};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::http::{self, IndexedEmbedding};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

pub const DIMENSIONS_ADA_002: usize = 1536;
pub const DIMENSIONS_TEXT_EMBEDDING_3_SMALL: usize = 1536;
pub const DIMENSIONS_TEXT_EMBEDDING_3_LARGE: usize = 3072;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Overrides the model's known dimensionality.
    pub dimensions: Option<usize>,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            dimensions: None,
            timeout: http::DEFAULT_TIMEOUT,
        }
    }
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Known output size for an OpenAI embedding model. Unknown models are
/// assumed to match `text-embedding-3-small`.
pub fn dimensions_for_model(model: &str) -> usize {
    match model {
        "text-embedding-ada-002" => DIMENSIONS_ADA_002,
        "text-embedding-3-large" => DIMENSIONS_TEXT_EMBEDDING_3_LARGE,
        _ => DIMENSIONS_TEXT_EMBEDDING_3_SMALL,
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    dimensions: usize,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http::build_client(config.timeout)?,
            dimensions: config
                .dimensions
                .unwrap_or_else(|| dimensions_for_model(&config.model)),
            api_key: config.api_key,
            model: config.model,
            base_url: config.base_url,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingReply {
    model: String,
    data: Vec<IndexedEmbedding>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn vendor_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorReply>(body)
        .ok()
        .map(|reply| reply.error.message)
        .filter(|message| !message.is_empty())
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn embed(
        &self,
        cancel: &CancellationToken,
        texts: &[String],
    ) -> Result<EmbeddingResponse, ProviderError> {
        if texts.is_empty() {
            return Ok(EmbeddingResponse::empty(&self.model, self.dimensions));
        }

        let request = self
            .client
            .post(http::endpoint(&self.base_url, "embeddings"))
            .bearer_auth(&self.api_key);
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let reply: EmbeddingReply =
            http::post_json(self.name(), request, &body, cancel, vendor_message).await?;

        let vectors = http::order_by_index(reply.data)?;
        Ok(EmbeddingResponse {
            dimensions: http::observed_dimensions(&vectors, self.dimensions),
            vectors,
            model: reply.model,
            usage: reply.usage,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
