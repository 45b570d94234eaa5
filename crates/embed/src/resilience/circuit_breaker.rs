//! Circuit breaker for failing providers.
//!
//! After `failure_threshold` consecutive failures the breaker opens and
//! rejects calls without touching the provider. Once `reset_timeout` has
//! passed it lets trial calls through (half-open); one success closes it
//! again, one failure reopens it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cancel::CancellationToken;
use crate::error::EmbedError;
use crate::pipeline::{layer, Layer, Pipeline, Stage};
use crate::types::EmbedRequest;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed.
    #[serde(with = "crate::serde_millis")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected.
    Open,
    /// Trial calls are allowed.
    HalfOpen,
}

#[derive(Debug)]
struct Transitions {
    state: CircuitState,
    last_change: Instant,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    transitions: Mutex<Transitions>,
    failure_count: AtomicU64,
    success_count: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            transitions: Mutex::new(Transitions {
                state: CircuitState::Closed,
                last_change: Instant::now(),
            }),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Transitions> {
        self.transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a call may go through right now. Moves an open circuit to
    /// half-open once the reset timeout has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut t = self.lock();
        match t.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if t.last_change.elapsed() >= self.config.reset_timeout {
                    t.state = CircuitState::HalfOpen;
                    t.last_change = Instant::now();
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);

        let mut t = self.lock();
        match t.state {
            CircuitState::HalfOpen => {
                t.state = CircuitState::Closed;
                t.last_change = Instant::now();
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::Closed => self.failure_count.store(0, Ordering::Relaxed),
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;

        let mut t = self.lock();
        match t.state {
            CircuitState::Closed if failures >= u64::from(self.config.failure_threshold) => {
                t.state = CircuitState::Open;
                t.last_change = Instant::now();
            }
            CircuitState::HalfOpen => {
                t.state = CircuitState::Open;
                t.last_change = Instant::now();
            }
            _ => {}
        }
    }

    pub fn current_state(&self) -> CircuitState {
        self.lock().state
    }

    /// Consecutive failures since the last success.
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }
}

/// Guards the inner stage with a [`CircuitBreaker`].
pub struct CircuitBreakerStage {
    inner: Pipeline,
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerStage {
    pub fn new(inner: Pipeline, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl Stage for CircuitBreakerStage {
    async fn process(
        &self,
        cancel: &CancellationToken,
        req: EmbedRequest,
    ) -> Result<EmbedRequest, EmbedError> {
        if !self.breaker.allow_request() {
            return Err(EmbedError::CircuitOpen {
                provider: req.provider,
            });
        }

        let provider = req.provider.clone();
        match self.inner.process(cancel, req).await {
            Ok(done) => {
                self.breaker.record_success();
                Ok(done)
            }
            // The caller walked away; says nothing about provider health.
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                self.breaker.record_failure();
                if self.breaker.current_state() == CircuitState::Open {
                    warn!(
                        %provider,
                        failures = self.breaker.failure_count(),
                        "circuit_opened"
                    );
                }
                Err(err)
            }
        }
    }
}

/// Open after `failures` consecutive failures; allow a trial call after
/// `recovery`. Every pipeline built from the layer gets its own breaker.
pub fn with_circuit_breaker(failures: u32, recovery: Duration) -> Layer {
    with_circuit_breaker_config(
        CircuitBreakerConfig::default()
            .with_failure_threshold(failures)
            .with_reset_timeout(recovery),
    )
}

pub fn with_circuit_breaker_config(config: CircuitBreakerConfig) -> Layer {
    layer(move |inner| {
        Arc::new(CircuitBreakerStage::new(
            inner,
            Arc::new(CircuitBreaker::new(config)),
        )) as Pipeline
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::hooks::NoopSink;
    use crate::pipeline::Terminal;
    use crate::testing::ScriptedProvider;

    #[test]
    fn circuit_breaker_starts_closed() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.current_state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn circuit_breaker_opens_after_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(3));
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.current_state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn success_resets_the_count() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(3));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Open);
    }

    #[test]
    fn half_open_after_reset_timeout() {
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::ZERO),
        );
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Open);

        assert!(cb.allow_request());
        assert_eq!(cb.current_state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Open);

        assert!(cb.allow_request());
        cb.record_success();
        assert_eq!(cb.current_state(), CircuitState::Closed);
        assert_eq!(cb.success_count(), 1);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_provider() {
        let failing = || Err(ProviderError::Transport("down".into()));
        let provider = Arc::new(
            ScriptedProvider::new("mock", 3).with_script(vec![failing(), failing()]),
        );
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(2)
                .with_reset_timeout(Duration::from_secs(3600)),
        ));
        let stage = CircuitBreakerStage::new(
            Terminal::new(provider.clone(), Arc::new(NoopSink)).into_pipeline(),
            breaker.clone(),
        );
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let req = EmbedRequest::new("mock", vec!["a".into()]);
            assert!(stage.process(&cancel, req).await.is_err());
        }
        assert_eq!(breaker.current_state(), CircuitState::Open);

        let err = stage
            .process(&cancel, EmbedRequest::new("mock", vec!["a".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::CircuitOpen { ref provider } if provider == "mock"));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn cancellation_does_not_count_as_failure() {
        let provider = Arc::new(ScriptedProvider::new("mock", 3));
        let stage = CircuitBreakerStage::new(
            Terminal::new(provider, Arc::new(NoopSink)).into_pipeline(),
            Arc::new(CircuitBreaker::new(
                CircuitBreakerConfig::default().with_failure_threshold(1),
            )),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = stage
            .process(&cancel, EmbedRequest::new("mock", vec!["a".into()]))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(stage.breaker().current_state(), CircuitState::Closed);
    }

    #[test]
    fn config_reads_millis() {
        let config: CircuitBreakerConfig =
            serde_json::from_str(r#"{"failure_threshold": 2, "reset_timeout": 1500}"#).unwrap();
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.reset_timeout, Duration::from_millis(1500));
    }
}
