//! Embedding orchestration core.
//!
//! This crate turns text into fixed-dimension vectors by way of a pluggable
//! [`Provider`]. The provider does the actual embedding; everything around it
//! lives here:
//!
//! - **Chunking** - long texts are split (sentence, paragraph, fixed window)
//!   before they go out, see [`Chunker`].
//! - **Pooling** - per-chunk vectors are folded back into one vector per
//!   input text, see [`PoolingMode`].
//! - **Vector math** - norm, normalize, dot, cosine, Euclidean, see
//!   [`vector`].
//! - **Pipelines** - the provider call sits at the bottom of a stack of
//!   [`Layer`]s (retry, backoff, timeout, circuit breaker, rate limit,
//!   fallback), see [`resilience`].
//! - **Telemetry** - lifecycle events go to an injected [`EventSink`]; the
//!   default one logs through `tracing`.
//!
//! Providers that embed queries differently from documents (Voyage, Cohere,
//! Gemini) expose a [`QueryProviderFactory`]; the [`Service`] picks it up on
//! construction and routes [`Service::batch_query`] through it.
//!
//! ## Quick example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use embed::resilience::{with_backoff, with_timeout};
//! use embed::{CancellationToken, Chunker, Provider, Service};
//!
//! async fn run(provider: Arc<dyn Provider>) -> Result<(), embed::EmbedError> {
//!     let service = Service::new(
//!         provider,
//!         [
//!             with_backoff(3, Duration::from_millis(100)),
//!             with_timeout(Duration::from_secs(10)),
//!         ],
//!     )
//!     .with_chunker(Chunker::sentence());
//!
//!     let cancel = CancellationToken::new();
//!     let vectors = service
//!         .batch(&cancel, &["First doc. Two sentences.", "Second doc"])
//!         .await?;
//!     assert_eq!(vectors.len(), 2);
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod chunker;
pub mod error;
pub mod hooks;
pub mod pipeline;
pub mod pool;
pub mod provider;
pub mod resilience;
pub mod service;
pub mod types;
pub mod vector;

mod serde_millis;

#[cfg(test)]
mod testing;

pub use cancel::CancellationToken;
pub use chunker::{ChunkStrategy, Chunker};
pub use error::{EmbedError, ProviderError};
pub use hooks::{EmbedEvent, EventSink, FanoutSink, NoopSink, RecordingSink, TracingSink};
pub use pipeline::{build_pipeline, layer, Layer, Pipeline, Stage, Terminal};
pub use pool::{pool, PoolingMode};
pub use provider::{Provider, QueryProviderFactory};
pub use service::{Service, ServiceBuilder};
pub use types::{EmbedRequest, EmbeddingResponse, Usage};
pub use vector::{
    cosine_similarity, dot, euclidean_distance, norm, normalize, normalize_in_place, similarity,
    SimilarityMetric, Vector, VectorExt,
};
