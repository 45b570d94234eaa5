use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vector::Vector;

/// Token consumption reported by a backend. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub total_tokens: usize,
}

/// Provider output for one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// Model identifier as reported by the backend.
    pub model: String,
    /// One vector per submitted text, in submission order.
    pub vectors: Vec<Vector>,
    pub usage: Usage,
    /// Dimensionality of [`vectors`](Self::vectors).
    pub dimensions: usize,
}

impl EmbeddingResponse {
    /// Response for a batch that had nothing to embed.
    pub fn empty(model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model: model.into(),
            vectors: Vec::new(),
            usage: Usage::default(),
            dimensions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// The unit of work flowing through a pipeline.
///
/// Stages receive the request by value and hand it back with
/// [`response`](Self::response) filled in; failures travel as the `Err` side
/// of the stage result instead of living on the request.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedRequest {
    /// Flattened chunk texts for the whole batch.
    pub texts: Vec<String>,
    /// Correlation id shared by every event of this batch.
    pub request_id: String,
    /// Name of the provider the batch is addressed to.
    pub provider: String,
    pub response: Option<EmbeddingResponse>,
}

impl EmbedRequest {
    /// New request with a fresh v4 correlation id.
    pub fn new(provider: impl Into<String>, texts: Vec<String>) -> Self {
        Self {
            texts,
            request_id: Uuid::new_v4().to_string(),
            provider: provider.into(),
            response: None,
        }
    }
}
