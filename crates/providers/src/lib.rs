//! Embedding backends for the [`embed`] core.
//!
//! Each HTTP backend is configured through a plain config struct with
//! `with_*` builders and implements [`embed::Provider`]:
//!
//! | Backend | Endpoint | Query mode |
//! |---------|----------|------------|
//! | [`OpenAiProvider`] | `POST {base}/embeddings` | - |
//! | [`VoyageProvider`] | `POST {base}/embeddings` | `input_type: query` |
//! | [`CohereProvider`] | `POST {base}/embed` | `input_type: search_query` |
//! | [`GeminiProvider`] | `POST {base}/models/{model}:batchEmbedContents` | `taskType: RETRIEVAL_QUERY` |
//!
//! Backends with a query mode implement [`embed::QueryProviderFactory`], so
//! a [`embed::Service`] built on them routes `batch_query` accordingly.
//!
//! [`StubProvider`] needs no network and produces deterministic unit vectors.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use embed::Service;
//! use providers::{OpenAiConfig, OpenAiProvider};
//!
//! # fn main() -> Result<(), embed::ProviderError> {
//! let provider = OpenAiProvider::new(OpenAiConfig::new("sk-...").with_model("text-embedding-3-large"))?;
//! let service = Service::new(Arc::new(provider), []);
//! assert_eq!(service.dimensions(), 3072);
//! # Ok(())
//! # }
//! ```

mod http;

pub mod cohere;
pub mod gemini;
pub mod openai;
pub mod stub;
pub mod voyage;

pub use cohere::{CohereConfig, CohereProvider};
pub use gemini::{GeminiConfig, GeminiProvider, TaskType};
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use stub::{stub_vector, StubProvider};
pub use voyage::{VoyageConfig, VoyageProvider};
