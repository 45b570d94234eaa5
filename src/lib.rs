//! Workspace umbrella crate for vex.
//!
//! Re-exports the embedding core (`embed`) and the backends (`providers`)
//! and adds YAML configuration so a whole [`Service`] can be described in one
//! file and built with [`VexConfig::build_service`].

pub mod config;

pub use config::{
    ConfigLoadError, ProviderKind, ProviderYamlConfig, ReliabilityYamlConfig, VexConfig,
};
pub use embed::resilience;
pub use embed::{
    CancellationToken, ChunkStrategy, Chunker, EmbedError, EmbedEvent, EmbedRequest,
    EmbeddingResponse, EventSink, FanoutSink, Layer, NoopSink, Pipeline, PoolingMode, Provider,
    ProviderError, QueryProviderFactory, RecordingSink, Service, ServiceBuilder,
    SimilarityMetric, Stage, TracingSink, Usage, Vector, VectorExt, cosine_similarity, dot,
    euclidean_distance, norm, normalize, pool, similarity,
};
pub use providers::{
    CohereConfig, CohereProvider, GeminiConfig, GeminiProvider, OpenAiConfig, OpenAiProvider,
    StubProvider, VoyageConfig, VoyageProvider, stub_vector,
};
