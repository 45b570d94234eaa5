//! Reliability stages: retry, backoff, timeout, circuit breaker, rate
//! limiting, fallback and error observation.
//!
//! Each stage wraps an inner [`Pipeline`](crate::Pipeline) and is installed
//! through a `with_*` constructor returning a [`Layer`](crate::Layer).
//! Stages keep their mutable state behind mutexes and atomics so one
//! pipeline can serve concurrent calls.

mod circuit_breaker;
mod fallback;
mod rate_limit;
mod retry;
mod timeout;

pub use circuit_breaker::{
    with_circuit_breaker, with_circuit_breaker_config, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerStage, CircuitState,
};
pub use fallback::{
    with_error_handler, with_fallback, ErrorHandler, ErrorHandlerStage, FallbackStage,
};
pub use rate_limit::{
    with_rate_limit, with_rate_limit_config, RateLimitConfig, RateLimitStage, RateLimitStats,
    TokenBucket,
};
pub use retry::{
    execute_with_retry, with_backoff, with_retry, with_retry_config, RetryConfig, RetryResult,
    RetryStage,
};
pub use timeout::{with_timeout, TimeoutStage};
