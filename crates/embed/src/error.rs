use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`Provider`](crate::Provider) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The backend answered with a non-success HTTP status.
    #[error("{provider} error ({status}): {message}")]
    Http {
        provider: String,
        status: u16,
        message: String,
    },
    /// The request never produced a response (DNS, TLS, connection reset, ...).
    #[error("request failed: {0}")]
    Transport(String),
    /// The response body could not be decoded.
    #[error("failed to parse response: {0}")]
    Decode(String),
    /// The response decoded but violated the provider contract.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// The caller cancelled the request while it was in flight.
    #[error("request cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Transport failures and 408/429/5xx statuses are transient; client errors
    /// and malformed responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Http { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            ProviderError::Other(message) => is_retryable_message(message),
            ProviderError::Decode(_)
            | ProviderError::InvalidResponse(_)
            | ProviderError::Cancelled => false,
        }
    }
}

/// Errors surfaced by the embedding pipeline and [`Service`](crate::Service).
#[derive(Debug, Clone, Error)]
pub enum EmbedError {
    /// Raw failure from the provider at the end of the pipeline.
    #[error("provider failure: {0}")]
    Provider(#[from] ProviderError),
    /// A pipeline failure, tagged with the batch it belongs to.
    #[error("embedding batch {request_id} via {provider} failed: {source}")]
    Batch {
        provider: String,
        request_id: String,
        #[source]
        source: Box<EmbedError>,
    },
    /// The caller cancelled the batch.
    #[error("embedding batch {request_id} via {provider} cancelled")]
    Cancelled {
        provider: String,
        request_id: String,
    },
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("circuit breaker is open for provider '{provider}'")]
    CircuitOpen { provider: String },
    #[error("rate limit exceeded for provider '{provider}'")]
    RateLimited { provider: String },
    #[error("all {attempts} attempts failed: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<EmbedError>,
    },
    #[error("invalid embed config: {0}")]
    InvalidConfig(String),
}

impl EmbedError {
    /// True when the failure stems from caller cancellation, however deeply
    /// it is wrapped.
    pub fn is_cancelled(&self) -> bool {
        match self {
            EmbedError::Cancelled { .. } | EmbedError::Provider(ProviderError::Cancelled) => true,
            EmbedError::Batch { source, .. } => source.is_cancelled(),
            EmbedError::RetriesExhausted { last, .. } => last.is_cancelled(),
            _ => false,
        }
    }

    /// Whether a retry stage should try again after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbedError::Provider(err) => err.is_retryable(),
            EmbedError::Timeout(_) | EmbedError::RateLimited { .. } => true,
            EmbedError::Batch { source, .. } => source.is_retryable(),
            EmbedError::Cancelled { .. }
            | EmbedError::CircuitOpen { .. }
            | EmbedError::RetriesExhausted { .. }
            | EmbedError::InvalidConfig(_) => false,
        }
    }
}

/// Classify a free-form error message as transient.
fn is_retryable_message(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    if error_lower.contains("timeout")
        || error_lower.contains("connection")
        || error_lower.contains("reset")
        || error_lower.contains("temporarily")
        || error_lower.contains("unavailable")
    {
        return true;
    }

    if error_lower.contains("unauthorized")
        || error_lower.contains("forbidden")
        || error_lower.contains("invalid")
        || error_lower.contains("not found")
    {
        return false;
    }

    // Default to retryable for unknown errors
    true
}
