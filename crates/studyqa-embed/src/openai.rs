use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use studyqa_core::config::Settings;
use studyqa_core::traits::EmbeddingProvider;

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    base_url: String,
    api_key: String,
    model: String,
    dim: usize,
    http: Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, api_key: impl Into<String>, model: impl Into<String>, dim: usize) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dim,
            http: Client::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings
            .openai
            .resolve_api_key()
            .ok_or_else(|| anyhow!("No OpenAI API key found. Set openai.api_key or OPENAI_API_KEY."))?;
        Ok(Self::new(&settings.openai.base_url, api_key, settings.embedding.model.clone(), settings.embedding.dimension))
    }

    fn embeddings_url(&self) -> String { format!("{}/embeddings", self.base_url) }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn dim(&self) -> usize { self.dim }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // Only the v3 models accept a requested dimensionality.
        let dimensions = self.model.starts_with("text-embedding-3").then_some(self.dim);
        let payload = EmbeddingRequest { model: &self.model, dimensions, input: [text] };

        let resp = self
            .http
            .post(self.embeddings_url())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("embedding request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("embedding HTTP {}: {}", status, body));
        }

        let parsed: EmbeddingResponse = resp.json().await.map_err(|e| anyhow!("embedding decode failed: {e}"))?;
        let vector = parsed.data.into_iter().next().map(|d| d.embedding).unwrap_or_default();
        tracing::debug!(model = %self.model, dim = vector.len(), "embedded query");
        Ok(vector)
    }
}
