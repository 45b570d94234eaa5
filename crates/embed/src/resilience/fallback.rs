//! Failure routing: a secondary pipeline, and an observer hook.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::cancel::CancellationToken;
use crate::error::EmbedError;
use crate::pipeline::{layer, Layer, Pipeline, Stage};
use crate::types::EmbedRequest;

/// Sends the request to `fallback` when `primary` fails.
///
/// Cancellation is not a failure worth routing around, so a cancelled
/// primary call is returned as is.
pub struct FallbackStage {
    primary: Pipeline,
    fallback: Pipeline,
}

impl FallbackStage {
    pub fn new(primary: Pipeline, fallback: Pipeline) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl Stage for FallbackStage {
    async fn process(
        &self,
        cancel: &CancellationToken,
        req: EmbedRequest,
    ) -> Result<EmbedRequest, EmbedError> {
        match self.primary.process(cancel, req.clone()).await {
            Ok(done) => Ok(done),
            Err(err) if err.is_cancelled() || cancel.is_cancelled() => Err(err),
            Err(err) => {
                warn!(
                    request_id = %req.request_id,
                    provider = %req.provider,
                    error = %err,
                    "fallback_engaged"
                );
                self.fallback.process(cancel, req).await
            }
        }
    }
}

/// Route failed calls to `fallback`, typically another service's
/// [`pipeline`](crate::Service::pipeline).
pub fn with_fallback(fallback: Pipeline) -> Layer {
    layer(move |primary| Arc::new(FallbackStage::new(primary, fallback.clone())) as Pipeline)
}

/// Callback invoked with every failure that passes through an
/// [`ErrorHandlerStage`].
pub type ErrorHandler = Arc<dyn Fn(&EmbedError, &EmbedRequest) + Send + Sync>;

/// Reports failures to a handler, then propagates them unchanged.
pub struct ErrorHandlerStage {
    inner: Pipeline,
    handler: ErrorHandler,
}

impl ErrorHandlerStage {
    pub fn new(inner: Pipeline, handler: ErrorHandler) -> Self {
        Self { inner, handler }
    }
}

#[async_trait]
impl Stage for ErrorHandlerStage {
    async fn process(
        &self,
        cancel: &CancellationToken,
        req: EmbedRequest,
    ) -> Result<EmbedRequest, EmbedError> {
        let snapshot = req.clone();
        self.inner.process(cancel, req).await.inspect_err(|err| {
            (self.handler)(err, &snapshot);
        })
    }
}

pub fn with_error_handler<F>(handler: F) -> Layer
where
    F: Fn(&EmbedError, &EmbedRequest) + Send + Sync + 'static,
{
    let handler: ErrorHandler = Arc::new(handler);
    layer(move |inner| Arc::new(ErrorHandlerStage::new(inner, handler.clone())) as Pipeline)
}
