//! Google Gemini `batchEmbedContents`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use embed::{
    CancellationToken, EmbeddingResponse, Provider, ProviderError, QueryProviderFactory, Usage,
    Vector,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::http;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "text-embedding-004";
pub const DEFAULT_DIMENSIONS: usize = 768;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TaskType {
    #[default]
    RetrievalDocument,
    RetrievalQuery,
    SemanticSimilarity,
    Classification,
    Clustering,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            TaskType::RetrievalQuery => "RETRIEVAL_QUERY",
            TaskType::SemanticSimilarity => "SEMANTIC_SIMILARITY",
            TaskType::Classification => "CLASSIFICATION",
            TaskType::Clustering => "CLUSTERING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub task_type: TaskType,
    pub dimensions: Option<usize>,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            task_type: TaskType::RetrievalDocument,
            dimensions: None,
            timeout: http::DEFAULT_TIMEOUT,
        }
    }
}

impl GeminiConfig {
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

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
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

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    task_type: TaskType,
    dimensions: usize,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http::build_client(config.timeout)?,
            dimensions: config.dimensions.unwrap_or(DEFAULT_DIMENSIONS),
            api_key: config.api_key,
            model: config.model,
            base_url: config.base_url,
            task_type: config.task_type,
        })
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn with_task_type(&self, task_type: TaskType) -> Self {
        Self {
            task_type,
            ..self.clone()
        }
    }
}

#[derive(Serialize)]
struct BatchBody<'a> {
    requests: Vec<ContentRequest<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct BatchReply {
    #[serde(default)]
    embeddings: Vec<Values>,
}

#[derive(Deserialize)]
struct Values {
    values: Vector,
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
impl Provider for GeminiProvider {
    async fn embed(
        &self,
        cancel: &CancellationToken,
        texts: &[String],
    ) -> Result<EmbeddingResponse, ProviderError> {
        if texts.is_empty() {
            return Ok(EmbeddingResponse::empty(&self.model, self.dimensions));
        }

        let qualified = format!("models/{}", self.model);
        let body = BatchBody {
            requests: texts
                .iter()
                .map(|text| ContentRequest {
                    model: &qualified,
                    content: Content {
                        parts: [Part { text }],
                    },
                    task_type: self.task_type.as_str(),
                })
                .collect(),
        };
        // Gemini authenticates with a query parameter, not a bearer token.
        let request = self
            .client
            .post(http::endpoint(
                &self.base_url,
                &format!("{qualified}:batchEmbedContents"),
            ))
            .query(&[("key", self.api_key.as_str())]);
        let reply: BatchReply =
            http::post_json(self.name(), request, &body, cancel, vendor_message).await?;

        let vectors: Vec<Vector> = reply.embeddings.into_iter().map(|e| e.values).collect();
        Ok(EmbeddingResponse {
            dimensions: http::observed_dimensions(&vectors, self.dimensions),
            vectors,
            model: self.model.clone(),
            // No token accounting on this endpoint; count inputs instead.
            usage: Usage {
                prompt_tokens: texts.len(),
                total_tokens: texts.len(),
            },
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn as_query_factory(&self) -> Option<&dyn QueryProviderFactory> {
        Some(self)
    }
}

impl QueryProviderFactory for GeminiProvider {
    fn for_query(&self) -> Arc<dyn Provider> {
        Arc::new(self.with_task_type(TaskType::RetrievalQuery))
    }
}
