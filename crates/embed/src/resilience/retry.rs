//! Retry with optional exponential backoff.
//!
//! Re-runs the inner stage on failure, sleeping between attempts. Sleeps are
//! cut short by cancellation, and a cancelled attempt is never retried.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::EmbedError;
use crate::pipeline::{layer, Layer, Pipeline, Stage};
use crate::types::EmbedRequest;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; `max_retries + 1` calls at most.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for every further one.
    #[serde(with = "crate::serde_millis")]
    pub base_delay: Duration,
    #[serde(with = "crate::serde_millis")]
    pub max_delay: Duration,
    /// Add up to 50% random jitter to each delay.
    pub jitter: bool,
    /// Give up immediately on errors that [`EmbedError::is_retryable`]
    /// rejects.
    pub transient_only: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
            transient_only: false,
        }
    }
}

impl RetryConfig {
    /// Up to `max_attempts` calls back to back, no delay.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            base_delay: Duration::ZERO,
            jitter: false,
            ..Self::default()
        }
        .with_max_attempts(max_attempts)
    }

    /// Up to `max_attempts` calls with delays of `base_delay * 2^n`.
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self::default()
            .with_max_attempts(max_attempts)
            .with_base_delay(base_delay)
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Total number of calls, first attempt included. Zero is treated as one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_retries = attempts.saturating_sub(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_transient_only(mut self, transient_only: bool) -> Self {
        self.transient_only = transient_only;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Outcome of [`execute_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryResult<T> {
    pub result: Result<T, EmbedError>,
    /// Calls made (1 = no retries needed).
    pub attempts: u32,
    pub total_duration: Duration,
    pub succeeded: bool,
}

impl<T> RetryResult<T> {
    pub fn into_result(self) -> Result<T, EmbedError> {
        self.result
    }
}

/// Run `operation` until it succeeds, the attempts run out, or `cancel`
/// fires. `operation` receives the zero-based attempt number.
pub async fn execute_with_retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> RetryResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, EmbedError>>,
{
    let start = Instant::now();
    let mut attempt = 0;

    loop {
        let error = match operation(attempt).await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts: attempt + 1,
                    total_duration: start.elapsed(),
                    succeeded: true,
                };
            }
            Err(error) => error,
        };

        let give_up = attempt >= config.max_retries
            || error.is_cancelled()
            || cancel.is_cancelled()
            || (config.transient_only && !error.is_retryable());
        if give_up {
            return RetryResult {
                result: Err(error),
                attempts: attempt + 1,
                total_duration: start.elapsed(),
                succeeded: false,
            };
        }

        let delay = calculate_delay(config, attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, %error, "retry_scheduled");
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return RetryResult {
                        result: Err(error),
                        attempts: attempt + 1,
                        total_duration: start.elapsed(),
                        succeeded: false,
                    };
                }
            }
        }
        attempt += 1;
    }
}

/// Exponential backoff for `attempt`, capped by `max_delay`.
fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_delay.as_millis() as u64;
    let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let delay = base
        .saturating_mul(factor)
        .min(config.max_delay.as_millis() as u64);

    if config.jitter && delay > 0 {
        let jitter = fastrand::u64(0..=delay / 2);
        Duration::from_millis(delay + jitter)
    } else {
        Duration::from_millis(delay)
    }
}

/// Stage form of [`execute_with_retry`].
pub struct RetryStage {
    inner: Pipeline,
    config: RetryConfig,
}

impl RetryStage {
    pub fn new(inner: Pipeline, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl Stage for RetryStage {
    async fn process(
        &self,
        cancel: &CancellationToken,
        req: EmbedRequest,
    ) -> Result<EmbedRequest, EmbedError> {
        let inner = &self.inner;
        let template = &req;
        let outcome = execute_with_retry(&self.config, cancel, move |_| {
            inner.process(cancel, template.clone())
        })
        .await;

        match outcome.result {
            Ok(done) => Ok(done),
            Err(_) if cancel.is_cancelled() => Err(EmbedError::Cancelled {
                provider: req.provider.clone(),
                request_id: req.request_id.clone(),
            }),
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => Err(EmbedError::RetriesExhausted {
                attempts: outcome.attempts,
                last: Box::new(err),
            }),
        }
    }
}

/// Retry up to `max_attempts` calls in total, without delay.
pub fn with_retry(max_attempts: u32) -> Layer {
    with_retry_config(RetryConfig::immediate(max_attempts))
}

/// Retry up to `max_attempts` calls in total, sleeping `base_delay * 2^n`
/// (plus jitter) between them.
pub fn with_backoff(max_attempts: u32, base_delay: Duration) -> Layer {
    with_retry_config(RetryConfig::exponential(max_attempts, base_delay))
}

pub fn with_retry_config(config: RetryConfig) -> Layer {
    layer(move |inner| Arc::new(RetryStage::new(inner, config)) as Pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::hooks::NoopSink;
    use crate::pipeline::{build_pipeline, Terminal};
    use crate::testing::ScriptedProvider;

    fn pipeline(provider: &Arc<ScriptedProvider>, layer: Layer) -> Pipeline {
        build_pipeline(
            Terminal::new(provider.clone(), Arc::new(NoopSink)).into_pipeline(),
            &[layer],
        )
    }

    fn transport() -> Result<crate::EmbeddingResponse, ProviderError> {
        Err(ProviderError::Transport("connection reset".into()))
    }

    fn request() -> EmbedRequest {
        EmbedRequest::new("mock", vec!["hello".into()])
    }

    #[tokio::test]
    async fn retry_succeeds_eventually() {
        let provider = Arc::new(
            ScriptedProvider::new("mock", 3).with_script(vec![transport(), transport()]),
        );
        let out = pipeline(&provider, with_retry(3))
            .process(&CancellationToken::new(), request())
            .await
            .unwrap();

        assert!(out.response.is_some());
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn retry_fails_after_max_attempts() {
        let provider = Arc::new(
            ScriptedProvider::new("mock", 3).with_script(vec![transport(), transport()]),
        );
        let err = pipeline(&provider, with_retry(2))
            .process(&CancellationToken::new(), request())
            .await
            .unwrap_err();

        match err {
            EmbedError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(
                    *last,
                    EmbedError::Provider(ProviderError::Transport(_))
                ));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let provider = Arc::new(ScriptedProvider::new("mock", 3).with_script(vec![transport()]));
        let err = pipeline(&provider, with_retry(0))
            .process(&CancellationToken::new(), request())
            .await
            .unwrap_err();

        assert!(matches!(err, EmbedError::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn transient_only_gives_up_on_client_errors() {
        let provider = Arc::new(ScriptedProvider::new("mock", 3).with_script(vec![Err(
            ProviderError::Http {
                provider: "mock".into(),
                status: 401,
                message: "bad key".into(),
            },
        )]));
        let config = RetryConfig::immediate(5).with_transient_only(true);
        let err = pipeline(&provider, with_retry_config(config))
            .process(&CancellationToken::new(), request())
            .await
            .unwrap_err();

        assert!(matches!(err, EmbedError::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_between_attempts() {
        let provider = Arc::new(
            ScriptedProvider::new("mock", 3).with_script(vec![transport(), transport()]),
        );
        let config = RetryConfig::exponential(3, Duration::from_millis(100)).with_jitter(false);
        let started = tokio::time::Instant::now();
        pipeline(&provider, with_retry_config(config))
            .process(&CancellationToken::new(), request())
            .await
            .unwrap();

        // 100ms + 200ms of virtual time.
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let provider = Arc::new(
            ScriptedProvider::new("mock", 3).with_script(vec![transport(), transport()]),
        );
        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            });
        }

        let err = pipeline(&provider, with_backoff(3, Duration::from_secs(60)))
            .process(&cancel, request())
            .await
            .unwrap_err();

        assert!(matches!(err, EmbedError::Cancelled { .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn delay_doubles_and_caps() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350))
            .with_jitter(false);
        assert_eq!(calculate_delay(&config, 0), Duration::from_millis(100));
        assert_eq!(calculate_delay(&config, 1), Duration::from_millis(200));
        assert_eq!(calculate_delay(&config, 2), Duration::from_millis(350));
        assert_eq!(calculate_delay(&config, 80), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_half() {
        let config = RetryConfig::default().with_base_delay(Duration::from_millis(100));
        for _ in 0..50 {
            let delay = calculate_delay(&config, 0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn attempts_map_to_retries() {
        assert_eq!(RetryConfig::immediate(3).max_retries, 2);
        assert_eq!(RetryConfig::immediate(0).max_attempts(), 1);
        assert_eq!(RetryConfig::immediate(3).base_delay, Duration::ZERO);
    }

    #[test]
    fn config_reads_millis() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_retries": 2, "base_delay": 250}"#).unwrap();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, RetryConfig::default().max_delay);
    }
}
