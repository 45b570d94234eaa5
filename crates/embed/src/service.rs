//! Request orchestration: chunk, dispatch, regroup, pool, normalize.

use std::sync::Arc;
use std::time::Instant;

use crate::cancel::CancellationToken;
use crate::chunker::Chunker;
use crate::error::EmbedError;
use crate::hooks::{emit_safely, EmbedEvent, EventSink, TracingSink};
use crate::pipeline::{build_pipeline, Layer, Pipeline, Terminal};
use crate::pool::{pool, PoolingMode};
use crate::provider::Provider;
use crate::types::{EmbedRequest, EmbeddingResponse};
use crate::vector::{normalize_in_place, Vector};

/// A provider together with the pipeline that reaches it.
#[derive(Clone)]
struct Route {
    provider: Arc<dyn Provider>,
    pipeline: Pipeline,
}

impl Route {
    fn new(provider: Arc<dyn Provider>, layers: &[Layer], sink: &Arc<dyn EventSink>) -> Self {
        let terminal = Terminal::new(provider.clone(), sink.clone()).into_pipeline();
        Self {
            pipeline: build_pipeline(terminal, layers),
            provider,
        }
    }
}

/// Embeds texts through a provider wrapped in reliability layers.
///
/// Each input text is chunked, all chunks go to the provider as one batch,
/// and the per-chunk vectors are pooled back into one vector per text.
/// Configuration is fixed before the service is shared; share it as
/// `Arc<Service>` for concurrent use.
pub struct Service {
    document: Route,
    query: Option<Route>,
    chunker: Chunker,
    pooling: PoolingMode,
    normalize: bool,
    sink: Arc<dyn EventSink>,
}

impl Service {
    /// Service over `provider` with `layers` applied first-outermost, the
    /// default chunker, mean pooling, normalization on and a
    /// [`TracingSink`].
    pub fn new(provider: Arc<dyn Provider>, layers: impl IntoIterator<Item = Layer>) -> Self {
        Self::builder(provider).layers(layers).build()
    }

    pub fn builder(provider: Arc<dyn Provider>) -> ServiceBuilder {
        ServiceBuilder::new(provider)
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_pooling(mut self, pooling: PoolingMode) -> Self {
        self.pooling = pooling;
        self
    }

    /// L2-normalize every output vector (on by default).
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Embed a single text as a document.
    ///
    /// `Ok(None)` when the text produced no chunks or the provider returned
    /// nothing.
    pub async fn embed(
        &self,
        cancel: &CancellationToken,
        text: &str,
    ) -> Result<Option<Vector>, EmbedError> {
        let mut vectors = self.batch(cancel, &[text]).await?;
        Ok(vectors.pop().flatten())
    }

    /// Embed a single text as a search query. Same as [`embed`](Self::embed)
    /// for providers without a query mode.
    pub async fn embed_query(
        &self,
        cancel: &CancellationToken,
        text: &str,
    ) -> Result<Option<Vector>, EmbedError> {
        let mut vectors = self.batch_query(cancel, &[text]).await?;
        Ok(vectors.pop().flatten())
    }

    /// Embed `texts` as documents.
    ///
    /// The result has one slot per input text, in input order. A slot is
    /// `None` when its text produced no chunks. An empty input, or a
    /// provider response without vectors, gives an empty result.
    pub async fn batch<S>(
        &self,
        cancel: &CancellationToken,
        texts: &[S],
    ) -> Result<Vec<Option<Vector>>, EmbedError>
    where
        S: AsRef<str> + Sync,
    {
        self.dispatch(&self.document, cancel, texts).await
    }

    /// Embed `texts` as search queries, through the query route when the
    /// provider has one.
    pub async fn batch_query<S>(
        &self,
        cancel: &CancellationToken,
        texts: &[S],
    ) -> Result<Vec<Option<Vector>>, EmbedError>
    where
        S: AsRef<str> + Sync,
    {
        let route = self.query.as_ref().unwrap_or(&self.document);
        self.dispatch(route, cancel, texts).await
    }

    /// Output dimensionality of the document provider.
    pub fn dimensions(&self) -> usize {
        self.document.provider.dimensions()
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.document.provider
    }

    /// The document pipeline, e.g. to serve as another service's
    /// [`with_fallback`](crate::resilience::with_fallback) target.
    pub fn pipeline(&self) -> Pipeline {
        self.document.pipeline.clone()
    }

    /// Whether [`batch_query`](Self::batch_query) uses a dedicated query route.
    pub fn supports_query(&self) -> bool {
        self.query.is_some()
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn pooling(&self) -> PoolingMode {
        self.pooling
    }

    pub fn normalizes(&self) -> bool {
        self.normalize
    }

    async fn dispatch<S>(
        &self,
        route: &Route,
        cancel: &CancellationToken,
        texts: &[S],
    ) -> Result<Vec<Option<Vector>>, EmbedError>
    where
        S: AsRef<str> + Sync,
    {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let provider = route.provider.name().to_string();
        let (chunks, mapping) = self.chunk_all(texts);
        let req = EmbedRequest::new(provider.clone(), chunks);
        let request_id = req.request_id.clone();

        self.emit(EmbedEvent::EmbedStarted {
            request_id: request_id.clone(),
            provider: provider.clone(),
            input_count: texts.len(),
        });

        let outcome = if cancel.is_cancelled() {
            Err(EmbedError::Cancelled {
                provider: provider.clone(),
                request_id: request_id.clone(),
            })
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(EmbedError::Cancelled {
                    provider: provider.clone(),
                    request_id: request_id.clone(),
                }),
                processed = route.pipeline.process(cancel, req) => processed,
            }
        };

        let processed = match outcome {
            Ok(processed) => processed,
            Err(err) => {
                let err = if err.is_cancelled() || cancel.is_cancelled() {
                    EmbedError::Cancelled {
                        provider: provider.clone(),
                        request_id: request_id.clone(),
                    }
                } else {
                    EmbedError::Batch {
                        provider: provider.clone(),
                        request_id: request_id.clone(),
                        source: Box::new(err),
                    }
                };
                self.emit(EmbedEvent::EmbedFailed {
                    request_id,
                    provider,
                    duration: start.elapsed(),
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        let mut response = processed.response.unwrap_or_default();
        let vectors = std::mem::take(&mut response.vectors);
        let pooled = if vectors.is_empty() {
            Vec::new()
        } else {
            self.pool_chunks(texts.len(), vectors, &mapping)
        };

        self.emit(completed(request_id, provider, &response, start));
        Ok(pooled)
    }

    /// Chunk every text; returns the flat chunk list and, per chunk, the
    /// index of the text it came from.
    fn chunk_all<S: AsRef<str>>(&self, texts: &[S]) -> (Vec<String>, Vec<usize>) {
        let mut chunks = Vec::new();
        let mut mapping = Vec::new();
        for (index, text) in texts.iter().enumerate() {
            let pieces = self.chunker.chunk(text.as_ref());
            mapping.extend(std::iter::repeat(index).take(pieces.len()));
            chunks.extend(pieces);
        }
        (chunks, mapping)
    }

    /// Group chunk vectors by owning text and pool each group. Vectors past
    /// the end of `mapping` are ignored.
    fn pool_chunks(
        &self,
        text_count: usize,
        vectors: Vec<Vector>,
        mapping: &[usize],
    ) -> Vec<Option<Vector>> {
        let mut groups: Vec<Vec<Vector>> = vec![Vec::new(); text_count];
        for (vector, &owner) in vectors.into_iter().zip(mapping) {
            groups[owner].push(vector);
        }

        groups
            .iter()
            .map(|group| {
                let mut pooled = pool(group, self.pooling)?;
                if self.normalize {
                    normalize_in_place(&mut pooled);
                }
                Some(pooled)
            })
            .collect()
    }

    fn emit(&self, event: EmbedEvent) {
        emit_safely(self.sink.as_ref(), event);
    }
}

fn completed(
    request_id: String,
    provider: String,
    response: &EmbeddingResponse,
    start: Instant,
) -> EmbedEvent {
    EmbedEvent::EmbedCompleted {
        request_id,
        provider,
        model: response.model.clone(),
        dimensions: response.dimensions,
        duration: start.elapsed(),
        prompt_tokens: response.usage.prompt_tokens,
        total_tokens: response.usage.total_tokens,
    }
}

/// Assembles a [`Service`].
pub struct ServiceBuilder {
    provider: Arc<dyn Provider>,
    layers: Vec<Layer>,
    sink: Arc<dyn EventSink>,
    chunker: Chunker,
    pooling: PoolingMode,
    normalize: bool,
}

impl ServiceBuilder {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            layers: Vec::new(),
            sink: Arc::new(TracingSink),
            chunker: Chunker::default(),
            pooling: PoolingMode::default(),
            normalize: true,
        }
    }

    /// Append a layer; earlier layers wrap later ones.
    pub fn layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn layers(mut self, layers: impl IntoIterator<Item = Layer>) -> Self {
        self.layers.extend(layers);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn pooling(mut self, pooling: PoolingMode) -> Self {
        self.pooling = pooling;
        self
    }

    pub fn normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Build the document route and, when the provider offers one, the query
    /// route. Both get the same layers.
    pub fn build(self) -> Service {
        let query = self
            .provider
            .as_query_factory()
            .map(|factory| Route::new(factory.for_query(), &self.layers, &self.sink));
        let document = Route::new(self.provider, &self.layers, &self.sink);

        Service {
            document,
            query,
            chunker: self.chunker,
            pooling: self.pooling,
            normalize: self.normalize,
            sink: self.sink,
        }
    }
}
