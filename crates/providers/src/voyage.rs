//! Voyage AI embeddings API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use embed::{
    CancellationToken, EmbeddingResponse, Provider, ProviderError, QueryProviderFactory, Usage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::http::{self, IndexedEmbedding};

pub const DEFAULT_BASE_URL: &str = "https://api.voyageai.com/v1";
pub const DEFAULT_MODEL: &str = "voyage-3";

/// How Voyage should treat the submitted text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InputType {
    #[default]
    Document,
    Query,
}

impl InputType {
    pub fn as_str(self) -> &'static str {
        match self {
            InputType::Document => "document",
            InputType::Query => "query",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoyageConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub input_type: InputType,
    pub dimensions: Option<usize>,
    pub timeout: Duration,
}

impl Default for VoyageConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            input_type: InputType::Document,
            dimensions: None,
            timeout: http::DEFAULT_TIMEOUT,
        }
    }
}

impl VoyageConfig {
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

    pub fn with_input_type(mut self, input_type: InputType) -> Self {
        self.input_type = input_type;
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

pub fn dimensions_for_model(model: &str) -> usize {
    match model {
        "voyage-3-lite" => 512,
        "voyage-large-2" => 1536,
        _ => 1024,
    }
}

#[derive(Debug, Clone)]
pub struct VoyageProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    input_type: InputType,
    dimensions: usize,
}

impl VoyageProvider {
    pub fn new(config: VoyageConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http::build_client(config.timeout)?,
            dimensions: config
                .dimensions
                .unwrap_or_else(|| dimensions_for_model(&config.model)),
            api_key: config.api_key,
            model: config.model,
            base_url: config.base_url,
            input_type: config.input_type,
        })
    }

    pub fn input_type(&self) -> InputType {
        self.input_type
    }

    /// Same backend and connection pool, different input type.
    pub fn with_input_type(&self, input_type: InputType) -> Self {
        Self {
            input_type,
            ..self.clone()
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    input_type: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingReply {
    model: String,
    data: Vec<IndexedEmbedding>,
    #[serde(default)]
    usage: VoyageUsage,
}

#[derive(Deserialize, Default)]
struct VoyageUsage {
    #[serde(default)]
    total_tokens: usize,
}

#[derive(Deserialize)]
struct ErrorReply {
    detail: String,
}

fn vendor_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorReply>(body)
        .ok()
        .map(|reply| reply.detail)
        .filter(|detail| !detail.is_empty())
}

#[async_trait]
impl Provider for VoyageProvider {
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
            input_type: self.input_type.as_str(),
        };
        let reply: EmbeddingReply =
            http::post_json(self.name(), request, &body, cancel, vendor_message).await?;

        let vectors = http::order_by_index(reply.data)?;
        Ok(EmbeddingResponse {
            dimensions: http::observed_dimensions(&vectors, self.dimensions),
            vectors,
            model: reply.model,
            // Voyage reports a single token count.
            usage: Usage {
                prompt_tokens: reply.usage.total_tokens,
                total_tokens: reply.usage.total_tokens,
            },
        })
    }

    fn name(&self) -> &str {
        "voyage"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn as_query_factory(&self) -> Option<&dyn QueryProviderFactory> {
        Some(self)
    }
}

impl QueryProviderFactory for VoyageProvider {
    fn for_query(&self) -> Arc<dyn Provider> {
        Arc::new(self.with_input_type(InputType::Query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> VoyageProvider {
        VoyageProvider::new(VoyageConfig::new("pa-test").with_base_url(server.uri())).unwrap()
    }

    async fn mount_reply(server: &MockServer, input_type: &str) {
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer pa-test"))
            .and(body_partial_json(serde_json::json!({ "input_type": input_type })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "object": "list",
                "model": "voyage-3",
                "data": [{ "object": "embedding", "index": 0, "embedding": [0.6, 0.8] }],
                "usage": { "total_tokens": 3 },
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn model_dimensions() {
        assert_eq!(dimensions_for_model("voyage-3"), 1024);
        assert_eq!(dimensions_for_model("voyage-3-lite"), 512);
        assert_eq!(dimensions_for_model("voyage-large-2"), 1536);
    }

    #[tokio::test]
    async fn documents_use_document_input_type() {
        let server = MockServer::start().await;
        mount_reply(&server, "document").await;

        let out = provider(&server)
            .embed(&CancellationToken::new(), &["hello".to_string()])
            .await
            .unwrap();

        assert_eq!(out.vectors, vec![vec![0.6, 0.8]]);
        assert_eq!(out.dimensions, 2);
        assert_eq!(
            out.usage,
            Usage {
                prompt_tokens: 3,
                total_tokens: 3
            }
        );
    }

    #[tokio::test]
    async fn query_factory_switches_input_type() {
        let server = MockServer::start().await;
        mount_reply(&server, "query").await;

        let documents = provider(&server);
        let factory = documents.as_query_factory().expect("voyage has a query mode");
        let queries = factory.for_query();
        assert_eq!(queries.name(), "voyage");
        assert_eq!(queries.dimensions(), documents.dimensions());
        assert_eq!(documents.input_type(), InputType::Document);

        queries
            .embed(&CancellationToken::new(), &["what is rust?".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn detail_field_becomes_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(serde_json::json!({ "detail": "Rate limit reached" })),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .embed(&CancellationToken::new(), &["a".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "voyage error (429): Rate limit reached");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn empty_input_skips_the_network() {
        let server = MockServer::start().await;
        let out = provider(&server)
            .embed(&CancellationToken::new(), &[])
            .await
            .unwrap();
        assert_eq!(out, EmbeddingResponse::empty("voyage-3", 1024));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
