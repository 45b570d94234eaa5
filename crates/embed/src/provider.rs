//! Backend abstraction.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::error::ProviderError;
use crate::types::EmbeddingResponse;

/// An embedding backend.
///
/// Implementations must return exactly one vector per input text, in input
/// order, and should abort promptly once `cancel` fires.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn embed(
        &self,
        cancel: &CancellationToken,
        texts: &[String],
    ) -> Result<EmbeddingResponse, ProviderError>;

    /// Stable identifier used in events and errors.
    fn name(&self) -> &str;

    /// Dimensionality of the vectors this backend produces.
    fn dimensions(&self) -> usize;

    /// Capability hook for backends that embed queries differently from
    /// documents. The [`Service`](crate::Service) asks once, at construction.
    fn as_query_factory(&self) -> Option<&dyn QueryProviderFactory> {
        None
    }
}

/// Implemented by backends with a distinct query-intent embedding mode.
pub trait QueryProviderFactory: Send + Sync {
    /// A handle to the same backend configured for search queries.
    fn for_query(&self) -> Arc<dyn Provider>;
}
