use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::error::EmbedError;
use crate::pipeline::{layer, Layer, Pipeline, Stage};
use crate::types::EmbedRequest;

/// Bounds the wall-clock time of the inner stage.
pub struct TimeoutStage {
    inner: Pipeline,
    timeout: Duration,
}

impl TimeoutStage {
    pub fn new(inner: Pipeline, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Stage for TimeoutStage {
    async fn process(
        &self,
        cancel: &CancellationToken,
        req: EmbedRequest,
    ) -> Result<EmbedRequest, EmbedError> {
        tokio::time::timeout(self.timeout, self.inner.process(cancel, req))
            .await
            .map_err(|_| EmbedError::Timeout(self.timeout))?
    }
}

/// Fail with [`EmbedError::Timeout`] when the wrapped stages take longer
/// than `timeout`.
pub fn with_timeout(timeout: Duration) -> Layer {
    layer(move |inner| Arc::new(TimeoutStage::new(inner, timeout)) as Pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopSink;
    use crate::pipeline::{build_pipeline, Terminal};
    use crate::testing::ScriptedProvider;

    fn pipeline(provider: &Arc<ScriptedProvider>, timeout: Duration) -> Pipeline {
        build_pipeline(
            Terminal::new(provider.clone(), Arc::new(NoopSink)).into_pipeline(),
            &[with_timeout(timeout)],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let provider =
            Arc::new(ScriptedProvider::new("mock", 3).with_delay(Duration::from_secs(10)));
        let err = pipeline(&provider, Duration::from_millis(50))
            .process(
                &CancellationToken::new(),
                EmbedRequest::new("mock", vec!["a".into()]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EmbedError::Timeout(d) if d == Duration::from_millis(50)));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn fast_provider_passes_through() {
        let provider =
            Arc::new(ScriptedProvider::new("mock", 3).with_delay(Duration::from_millis(5)));
        let out = pipeline(&provider, Duration::from_secs(1))
            .process(
                &CancellationToken::new(),
                EmbedRequest::new("mock", vec!["a".into()]),
            )
            .await
            .unwrap();
        assert!(out.response.is_some());
    }
}
