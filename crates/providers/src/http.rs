//! Plumbing shared by the HTTP backends.

use std::time::Duration;

use embed::{CancellationToken, ProviderError, Vector};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest slice of an unparseable error body carried into the error.
const ERROR_BODY_LIMIT: usize = 200;

/// Pooled client with the request timeout applied to every call.
pub(crate) fn build_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(32)
        .build()
        .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {e}")))
}

/// Send `body` as JSON and decode a JSON reply.
///
/// Non-2xx replies become [`ProviderError::Http`], with the vendor message
/// pulled out by `vendor_message` when the body has one. Cancelling `cancel`
/// drops the in-flight request.
pub(crate) async fn post_json<B, R>(
    provider: &str,
    request: RequestBuilder,
    body: &B,
    cancel: &CancellationToken,
    vendor_message: fn(&[u8]) -> Option<String>,
) -> Result<R, ProviderError>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let exchange = async {
        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Transport(format!("failed to read response: {e}")))?;
        debug!(%provider, status = status.as_u16(), bytes = bytes.len(), "provider_response");

        if !status.is_success() {
            let message = vendor_message(&bytes).unwrap_or_else(|| fallback_message(&bytes));
            return Err(ProviderError::Http {
                provider: provider.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| ProviderError::Decode(e.to_string()))
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        outcome = exchange => outcome,
    }
}

fn fallback_message(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        "no error details".to_string()
    } else {
        text.chars().take(ERROR_BODY_LIMIT).collect()
    }
}

/// Join a base URL and a path without doubling the slash.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// `{"data": [{"embedding": [...], "index": n}]}` entry, as returned by the
/// OpenAI-compatible APIs.
#[derive(Debug, Deserialize)]
pub(crate) struct IndexedEmbedding {
    pub embedding: Vector,
    pub index: i64,
}

/// Place every embedding at its reported index.
pub(crate) fn order_by_index(items: Vec<IndexedEmbedding>) -> Result<Vec<Vector>, ProviderError> {
    let mut slots: Vec<Option<Vector>> = vec![None; items.len()];
    for item in items {
        let slot = usize::try_from(item.index)
            .ok()
            .and_then(|index| slots.get_mut(index))
            .ok_or_else(|| {
                ProviderError::InvalidResponse(format!("invalid index {} from API", item.index))
            })?;
        *slot = Some(item.embedding);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                ProviderError::InvalidResponse(format!("missing embedding for index {index}"))
            })
        })
        .collect()
}

/// Dimensionality of what actually came back, or `configured` when the
/// response is empty.
pub(crate) fn observed_dimensions(vectors: &[Vector], configured: usize) -> usize {
    match vectors.first() {
        Some(first) if !first.is_empty() => first.len(),
        _ => configured,
    }
}
