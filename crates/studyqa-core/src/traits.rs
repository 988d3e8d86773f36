//! Collaborator seams. Implementations live in `studyqa-embed`,
//! `studyqa-vector` and `studyqa-qa`; tests substitute fakes.

use async_trait::async_trait;
use serde::Serialize;

use crate::types::Namespace;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    pub namespace: Namespace,
    pub top_k: usize,
    pub include_metadata: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchRequest {
    pub ids: Vec<String>,
    pub namespace: Namespace,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimensionality of every vector this provider returns.
    fn dim(&self) -> usize;
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// A namespaced nearest-neighbour index.
///
/// Responses are returned raw so the search adapter can verify their shape:
/// `query` yields `{"matches": [{"id", "score", "metadata"?}]}` and `fetch`
/// yields `{"vectors": {"<id>": {"metadata"?}}}`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn dimension(&self) -> Option<usize> { None }
    async fn query(&self, request: &QueryRequest) -> anyhow::Result<serde_json::Value>;
    async fn fetch(&self, request: &FetchRequest) -> anyhow::Result<serde_json::Value>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}
