//! Scripted provider shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::error::ProviderError;
use crate::provider::{Provider, QueryProviderFactory};
use crate::types::{EmbeddingResponse, Usage};
use crate::vector::Vector;

/// Replays queued outcomes, then falls back to [`vector_for`].
pub(crate) struct ScriptedProvider {
    name: String,
    dimensions: usize,
    script: Mutex<VecDeque<Result<EmbeddingResponse, ProviderError>>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<String>>>,
    delay: Option<Duration>,
    query: Option<Arc<ScriptedProvider>>,
}

impl ScriptedProvider {
    pub(crate) fn new(name: &str, dimensions: usize) -> Self {
        Self {
            name: name.to_string(),
            dimensions,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay: None,
            query: None,
        }
    }

    pub(crate) fn with_script(
        self,
        script: Vec<Result<EmbeddingResponse, ProviderError>>,
    ) -> Self {
        *self.script.lock().unwrap() = script.into();
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn with_query(mut self, query: Arc<ScriptedProvider>) -> Self {
        self.query = Some(query);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts received by each call, in call order.
    pub(crate) fn seen(&self) -> Vec<Vec<String>> {
        self.seen.lock().unwrap().clone()
    }
}

/// `[chars, 1, 0, ...]`, so pooled results are easy to predict.
pub(crate) fn vector_for(text: &str, dimensions: usize) -> Vector {
    let mut v = vec![0.0; dimensions];
    if let Some(first) = v.first_mut() {
        *first = text.chars().count() as f32;
    }
    if let Some(second) = v.get_mut(1) {
        *second = 1.0;
    }
    v
}

pub(crate) fn response(model: &str, vectors: Vec<Vector>) -> EmbeddingResponse {
    let dimensions = vectors.first().map_or(0, Vec::len);
    EmbeddingResponse {
        model: model.to_string(),
        usage: Usage {
            prompt_tokens: vectors.len(),
            total_tokens: vectors.len(),
        },
        vectors,
        dimensions,
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn embed(
        &self,
        cancel: &CancellationToken,
        texts: &[String],
    ) -> Result<EmbeddingResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(texts.to_vec());

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            }
        }

        if let Some(outcome) = self.script.lock().unwrap().pop_front() {
            return outcome;
        }

        let vectors = texts
            .iter()
            .map(|text| vector_for(text, self.dimensions))
            .collect();
        let mut out = response(&format!("{}-model", self.name), vectors);
        out.dimensions = self.dimensions;
        Ok(out)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn as_query_factory(&self) -> Option<&dyn QueryProviderFactory> {
        self.query.as_ref().map(|_| self as &dyn QueryProviderFactory)
    }
}

impl QueryProviderFactory for ScriptedProvider {
    fn for_query(&self) -> Arc<dyn Provider> {
        match &self.query {
            Some(query) => query.clone() as Arc<dyn Provider>,
            None => Arc::new(ScriptedProvider::new(&self.name, self.dimensions)),
        }
    }
}
