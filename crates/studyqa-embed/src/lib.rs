//! Embedding providers for question and chunk vectors.
//!
//! `HashEmbedder` is deterministic and offline; `OpenAiEmbedder` calls an
//! OpenAI-compatible `/embeddings` endpoint. `APP_USE_FAKE_EMBEDDINGS=1`
//! forces the hash embedder regardless of configuration.

use std::sync::Arc;
use std::time::Duration;

use studyqa_core::config::{EmbeddingBackend, Settings};
use studyqa_core::traits::EmbeddingProvider;
use studyqa_core::{Error, Result};

pub mod hash;
pub mod openai;

pub use hash::HashEmbedder;
pub use openai::OpenAiEmbedder;

pub fn from_settings(settings: &Settings) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
    if use_fake || settings.embedding.provider == EmbeddingBackend::Hash {
        tracing::info!(dim = settings.embedding.dimension, "using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(settings.embedding.dimension)));
    }
    Ok(Arc::new(OpenAiEmbedder::from_settings(settings)?))
}

/// Embed `text` within `timeout`, classifying failures.
///
/// A provider error, an empty vector or a vector of the wrong length is
/// `Error::Embedding`; expiry is `Error::Timeout`.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str, timeout: Duration) -> Result<Vec<f32>> {
    let vector = match tokio::time::timeout(timeout, provider.embed(text)).await {
        Err(_) => return Err(Error::Timeout { operation: "embed", after: timeout }),
        Ok(Err(e)) => return Err(Error::Embedding(format!("{e:#}"))),
        Ok(Ok(v)) => v,
    };
    if vector.is_empty() {
        return Err(Error::Embedding("provider returned no vector".to_string()));
    }
    if vector.len() != provider.dim() {
        return Err(Error::Embedding(format!("dim mismatch: got {} expected {}", vector.len(), provider.dim())));
    }
    Ok(vector)
}
