//! Middleware-style processing chain around a [`Provider`].
//!
//! A pipeline is a terminal stage that calls the provider, wrapped by an
//! ordered list of [`Layer`]s. [`build_pipeline`] applies the layers in
//! reverse so the first layer in the list ends up outermost:
//!
//! ```text
//! [rate_limit, retry, timeout] => rate_limit(retry(timeout(terminal)))
//! ```

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::error::{EmbedError, ProviderError};
use crate::hooks::{emit_safely, EmbedEvent, EventSink};
use crate::provider::Provider;
use crate::types::EmbedRequest;

/// One step of a pipeline.
///
/// A stage takes ownership of the request and either hands it back with the
/// response filled in or fails. Stages must be safe to call concurrently.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn process(
        &self,
        cancel: &CancellationToken,
        req: EmbedRequest,
    ) -> Result<EmbedRequest, EmbedError>;
}

/// Shared handle to a fully assembled stage chain.
pub type Pipeline = Arc<dyn Stage>;

/// Wraps a pipeline in another stage.
pub type Layer = Arc<dyn Fn(Pipeline) -> Pipeline + Send + Sync>;

/// Turn a closure into a [`Layer`].
pub fn layer<F>(wrap: F) -> Layer
where
    F: Fn(Pipeline) -> Pipeline + Send + Sync + 'static,
{
    Arc::new(wrap)
}

/// Wrap `terminal` in `layers`, first layer outermost.
pub fn build_pipeline(terminal: Pipeline, layers: &[Layer]) -> Pipeline {
    layers
        .iter()
        .rev()
        .fold(terminal, |inner, wrap| wrap(inner))
}

/// Innermost stage: calls the provider and reports the call.
pub struct Terminal {
    provider: Arc<dyn Provider>,
    sink: Arc<dyn EventSink>,
}

impl Terminal {
    pub fn new(provider: Arc<dyn Provider>, sink: Arc<dyn EventSink>) -> Self {
        Self { provider, sink }
    }

    pub fn into_pipeline(self) -> Pipeline {
        Arc::new(self)
    }
}

#[async_trait]
impl Stage for Terminal {
    async fn process(
        &self,
        cancel: &CancellationToken,
        mut req: EmbedRequest,
    ) -> Result<EmbedRequest, EmbedError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled.into());
        }

        let provider = self.provider.name().to_string();
        let start = Instant::now();
        emit_safely(
            self.sink.as_ref(),
            EmbedEvent::ProviderCallStarted {
                provider: provider.clone(),
                input_count: req.texts.len(),
            },
        );

        match self.provider.embed(cancel, &req.texts).await {
            Ok(response) => {
                emit_safely(
                    self.sink.as_ref(),
                    EmbedEvent::ProviderCallCompleted {
                        provider,
                        model: response.model.clone(),
                        dimensions: response.dimensions,
                        duration: start.elapsed(),
                        prompt_tokens: response.usage.prompt_tokens,
                        total_tokens: response.usage.total_tokens,
                    },
                );
                req.response = Some(response);
                Ok(req)
            }
            Err(err) => {
                emit_safely(
                    self.sink.as_ref(),
                    EmbedEvent::ProviderCallFailed {
                        provider,
                        duration: start.elapsed(),
                        error: err.to_string(),
                    },
                );
                Err(err.into())
            }
        }
    }
}
