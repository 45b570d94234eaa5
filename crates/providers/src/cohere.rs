//! Cohere embed API.

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

pub const DEFAULT_BASE_URL: &str = "https://api.cohere.ai/v1";
pub const DEFAULT_MODEL: &str = "embed-english-v3.0";

/// Cohere's v3 models require the caller to state what the text is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InputType {
    #[default]
    SearchDocument,
    SearchQuery,
    Classification,
    Clustering,
}

impl InputType {
    pub fn as_str(self) -> &'static str {
        match self {
            InputType::SearchDocument => "search_document",
            InputType::SearchQuery => "search_query",
            InputType::Classification => "classification",
            InputType::Clustering => "clustering",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohereConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub input_type: InputType,
    pub dimensions: Option<usize>,
    pub timeout: Duration,
}

impl Default for CohereConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            input_type: InputType::SearchDocument,
            dimensions: None,
            timeout: http::DEFAULT_TIMEOUT,
        }
    }
}

impl CohereConfig {
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

/// Every v3 embed model, English or multilingual, produces 1024 floats.
pub fn dimensions_for_model(_model: &str) -> usize {
    1024
}

#[derive(Debug, Clone)]
pub struct CohereProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    input_type: InputType,
    dimensions: usize,
}

impl CohereProvider {
    pub fn new(config: CohereConfig) -> Result<Self, ProviderError> {
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

    pub fn with_input_type(&self, input_type: InputType) -> Self {
        Self {
            input_type,
            ..self.clone()
        }
    }
}

#[derive(Serialize)]
struct EmbedBody<'a> {
    model: &'a str,
    texts: &'a [String],
    input_type: &'static str,
}

#[derive(Deserialize)]
struct EmbedReply {
    embeddings: Vec<Vector>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Deserialize)]
struct Meta {
    #[serde(default)]
    billed_units: Option<BilledUnits>,
}

#[derive(Deserialize)]
struct BilledUnits {
    #[serde(default)]
    input_tokens: usize,
}

impl EmbedReply {
    fn input_tokens(&self) -> usize {
        self.meta
            .as_ref()
            .and_then(|meta| meta.billed_units.as_ref())
            .map_or(0, |units| units.input_tokens)
    }
}

#[derive(Deserialize)]
struct ErrorReply {
    message: String,
}

fn vendor_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorReply>(body)
        .ok()
        .map(|reply| reply.message)
        .filter(|message| !message.is_empty())
}

#[async_trait]
impl Provider for CohereProvider {
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
            .post(http::endpoint(&self.base_url, "embed"))
            .bearer_auth(&self.api_key);
        let body = EmbedBody {
            model: &self.model,
            texts,
            input_type: self.input_type.as_str(),
        };
        let reply: EmbedReply =
            http::post_json(self.name(), request, &body, cancel, vendor_message).await?;

        let tokens = reply.input_tokens();
        Ok(EmbeddingResponse {
            dimensions: http::observed_dimensions(&reply.embeddings, self.dimensions),
            vectors: reply.embeddings,
            // The embed endpoint does not echo the model back.
            model: self.model.clone(),
            usage: Usage {
                prompt_tokens: tokens,
                total_tokens: tokens,
            },
        })
    }

    fn name(&self) -> &str {
        "cohere"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn as_query_factory(&self) -> Option<&dyn QueryProviderFactory> {
        Some(self)
    }
}

impl QueryProviderFactory for CohereProvider {
    fn for_query(&self) -> Arc<dyn Provider> {
        Arc::new(self.with_input_type(InputType::SearchQuery))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> CohereProvider {
        CohereProvider::new(CohereConfig::new("co-test").with_base_url(server.uri())).unwrap()
    }

    #[test]
    fn input_type_wire_names() {
        assert_eq!(InputType::default().as_str(), "search_document");
        assert_eq!(InputType::SearchQuery.as_str(), "search_query");
        assert_eq!(InputType::Classification.as_str(), "classification");
        assert_eq!(InputType::Clustering.as_str(), "clustering");
    }

    #[tokio::test]
    async fn embeds_with_configured_model_and_billed_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .and(body_json(serde_json::json!({
                "model": "embed-english-v3.0",
                "texts": ["a", "b"],
                "input_type": "search_document",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "abc",
                "embeddings": [[1.0, 0.0], [0.0, 1.0]],
                "texts": ["a", "b"],
                "meta": { "billed_units": { "input_tokens": 2 } },
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = provider(&server)
            .embed(&CancellationToken::new(), &["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(out.vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(out.model, "embed-english-v3.0");
        assert_eq!(out.dimensions, 2);
        assert_eq!(out.usage.prompt_tokens, 2);
        assert_eq!(out.usage.total_tokens, 2);
    }

    #[tokio::test]
    async fn missing_meta_means_zero_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "embeddings": [[1.0]] })),
            )
            .mount(&server)
            .await;

        let out = provider(&server)
            .embed(&CancellationToken::new(), &["a".to_string()])
            .await
            .unwrap();
        assert_eq!(out.usage, Usage::default());
    }

    #[tokio::test]
    async fn query_route_uses_search_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(wiremock::matchers::body_partial_json(
                serde_json::json!({ "input_type": "search_query" }),
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "embeddings": [[1.0]] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let queries = provider(&server)
            .as_query_factory()
            .map(|factory| factory.for_query())
            .unwrap();
        queries
            .embed(&CancellationToken::new(), &["q".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn message_field_becomes_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "message": "invalid input_type" })),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .embed(&CancellationToken::new(), &["a".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cohere error (400): invalid input_type");
    }
}
