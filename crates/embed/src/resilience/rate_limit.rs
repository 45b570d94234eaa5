//! Token bucket rate limiting in front of a provider.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::EmbedError;
use crate::pipeline::{layer, Layer, Pipeline, Stage};
use crate::types::EmbedRequest;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained refill rate.
    pub requests_per_second: f64,
    /// Bucket capacity, i.e. how many calls may go out back to back.
    pub burst_size: u64,
    /// Longest a call waits for a token before failing (0 = never wait,
    /// `Duration::MAX` = wait until a token frees up or the call is cancelled).
    #[serde(with = "crate::serde_millis")]
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst_size: 20,
            max_wait: Duration::from_secs(5),
        }
    }
}

impl RateLimitConfig {
    pub fn with_requests_per_second(mut self, rps: f64) -> Self {
        self.requests_per_second = rps;
        self
    }

    pub fn with_burst_size(mut self, burst: u64) -> Self {
        self.burst_size = burst;
        self
    }

    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    /// Wait for a token however long it takes; only cancellation stops it.
    pub fn without_deadline(mut self) -> Self {
        self.max_wait = Duration::MAX;
        self
    }

    fn has_deadline(&self) -> bool {
        self.max_wait != Duration::MAX
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Token bucket that starts full.
#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
    total_requests: AtomicU64,
    total_waited: AtomicU64,
    total_rejected: AtomicU64,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens: config.burst_size as f64,
                last_update: Instant::now(),
            }),
            total_requests: AtomicU64::new(0),
            total_waited: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Lock the bucket after topping it up for the time elapsed.
    fn refilled(&self) -> MutexGuard<'_, Bucket> {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.last_update = now;
        bucket.tokens = (bucket.tokens + elapsed * self.config.requests_per_second)
            .min(self.config.burst_size as f64);
        bucket
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
        let mut bucket = self.refilled();
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            self.total_rejected.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    /// Take a token, waiting up to `max_wait` for one. Returns `false` on
    /// timeout or when `cancel` fires first. With no deadline only
    /// cancellation returns `false`.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        let mut waited = false;

        loop {
            let wait = {
                let mut bucket = self.refilled();
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    if waited {
                        self.total_waited.fetch_add(1, Ordering::SeqCst);
                    }
                    return true;
                }

                if self.config.has_deadline() && start.elapsed() >= self.config.max_wait {
                    self.total_rejected.fetch_add(1, Ordering::SeqCst);
                    return false;
                }

                let tokens_needed = 1.0 - bucket.tokens;
                let seconds = tokens_needed / self.config.requests_per_second;
                Duration::from_secs_f64(seconds.clamp(0.001, 0.1))
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => waited = true,
                _ = cancel.cancelled() => {
                    self.total_rejected.fetch_add(1, Ordering::SeqCst);
                    return false;
                }
            }
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            available_tokens: self
                .bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .tokens,
            total_requests: self.total_requests.load(Ordering::SeqCst),
            total_waited: self.total_waited.load(Ordering::SeqCst),
            total_rejected: self.total_rejected.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitStats {
    pub available_tokens: f64,
    pub total_requests: u64,
    pub total_waited: u64,
    pub total_rejected: u64,
}

impl RateLimitStats {
    /// Share of requests that were refused (0.0 to 1.0).
    pub fn rejection_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_rejected as f64 / self.total_requests as f64
        }
    }

    /// Share of requests that had to wait for a token (0.0 to 1.0).
    pub fn wait_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_waited as f64 / self.total_requests as f64
        }
    }
}

pub struct RateLimitStage {
    inner: Pipeline,
    bucket: Arc<TokenBucket>,
}

impl RateLimitStage {
    pub fn new(inner: Pipeline, bucket: Arc<TokenBucket>) -> Self {
        Self { inner, bucket }
    }

    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    async fn process(
        &self,
        cancel: &CancellationToken,
        req: EmbedRequest,
    ) -> Result<EmbedRequest, EmbedError> {
        if !self.bucket.acquire(cancel).await {
            if cancel.is_cancelled() {
                return Err(EmbedError::Cancelled {
                    provider: req.provider,
                    request_id: req.request_id,
                });
            }
            debug!(provider = %req.provider, "rate_limited");
            return Err(EmbedError::RateLimited {
                provider: req.provider,
            });
        }
        self.inner.process(cancel, req).await
    }
}

/// Allow `requests_per_second` sustained with bursts of `burst`. Calls over
/// the limit are paced, never rejected; they wait until a token frees up or
/// the caller cancels.
pub fn with_rate_limit(requests_per_second: f64, burst: u64) -> Layer {
    with_rate_limit_config(
        RateLimitConfig::default()
            .with_requests_per_second(requests_per_second)
            .with_burst_size(burst)
            .without_deadline(),
    )
}

/// Like [`with_rate_limit`], but a call that cannot get a token within
/// `config.max_wait` fails with [`EmbedError::RateLimited`].

pub fn with_rate_limit_config(config: RateLimitConfig) -> Layer {
    layer(move |inner| {
        Arc::new(RateLimitStage::new(inner, Arc::new(TokenBucket::new(config)))) as Pipeline
    })
}
