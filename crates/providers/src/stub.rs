use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use embed::{
    normalize_in_place, CancellationToken, EmbeddingResponse, Provider, ProviderError, Usage,
    Vector,
};
use fxhash::hash64;

/// Tokens billed per text, so usage totals are predictable in tests.
const TOKENS_PER_TEXT: usize = 10;

/// Deterministic offline backend.
///
/// Generates sinusoid values derived from a hash of each text, so identical
/// texts always map to identical unit vectors with no network or model
/// assets. Useful for demos, tests and dry runs of a pipeline.
#[derive(Debug)]
pub struct StubProvider {
    name: String,
    dimensions: usize,
    fail_after: Option<usize>,
    error: ProviderError,
    calls: AtomicUsize,
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new(1536)
    }
}

impl StubProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            name: "stub".to_string(),
            dimensions,
            fail_after: None,
            error: ProviderError::Other("stub provider failure".to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Succeed for the first `calls` calls, then fail every call after.
    pub fn fail_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    /// Error returned once [`fail_after`](Self::fail_after) trips.
    pub fn with_error(mut self, error: ProviderError) -> Self {
        self.error = error;
        self
    }

    /// Number of `embed` calls so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn model(&self) -> String {
        format!("{}-model", self.name)
    }
}

/// The vector [`StubProvider`] produces for `text`.
pub fn stub_vector(text: &str, dimensions: usize) -> Vector {
    let mut v = vec![0f32; dimensions];
    let h = hash64(text.as_bytes());
    for (idx, value) in v.iter_mut().enumerate() {
        *value = ((h >> (idx % 32)) as f32 * 0.0001).sin();
    }
    normalize_in_place(&mut v);
    v
}

#[async_trait]
impl Provider for StubProvider {
    async fn embed(
        &self,
        cancel: &CancellationToken,
        texts: &[String],
    ) -> Result<EmbeddingResponse, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if self.fail_after.is_some_and(|limit| call >= limit) {
            return Err(self.error.clone());
        }

        let vectors: Vec<Vector> = texts
            .iter()
            .map(|text| stub_vector(text, self.dimensions))
            .collect();
        let tokens = texts.len() * TOKENS_PER_TEXT;
        Ok(EmbeddingResponse {
            model: self.model(),
            vectors,
            usage: Usage {
                prompt_tokens: tokens,
                total_tokens: tokens,
            },
            dimensions: self.dimensions,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
