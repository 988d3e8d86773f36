//! Brute-force in-process index. Suitable for tests, demos and small corpora.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;

use studyqa_core::traits::{FetchRequest, QueryRequest, VectorIndex};
use studyqa_core::types::{MatchMetadata, Namespace};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: MatchMetadata,
}

#[derive(Default)]
pub struct MemoryIndex {
    dimension: Option<usize>,
    namespaces: RwLock<HashMap<String, Vec<MemoryRecord>>>,
}

impl MemoryIndex {
    pub fn new() -> Self { Self::default() }

    pub fn with_dimension(dimension: usize) -> Self { Self { dimension: Some(dimension), ..Self::default() } }

    /// Insert or replace records by id. Returns the namespace size afterwards.
    pub fn upsert(&self, namespace: &Namespace, records: Vec<MemoryRecord>) -> Result<usize> {
        if let Some(dim) = self.dimension {
            if let Some(bad) = records.iter().find(|r| r.values.len() != dim) {
                return Err(anyhow!("dim mismatch for `{}`: got {} expected {}", bad.id, bad.values.len(), dim));
            }
        }
        let mut guard = self.namespaces.write().map_err(|_| anyhow!("memory index lock poisoned"))?;
        let stored = guard.entry(namespace.to_string()).or_default();
        for record in records {
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => stored.push(record),
            }
        }
        Ok(stored.len())
    }

    pub fn len(&self, namespace: &Namespace) -> usize {
        self.namespaces.read().map(|g| g.get(namespace.as_str()).map_or(0, Vec::len)).unwrap_or(0)
    }

    pub fn is_empty(&self, namespace: &Namespace) -> bool { self.len(namespace) == 0 }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn dimension(&self) -> Option<usize> { self.dimension }

    async fn query(&self, request: &QueryRequest) -> Result<Value> {
        let guard = self.namespaces.read().map_err(|_| anyhow!("memory index lock poisoned"))?;
        let mut scored: Vec<(f32, &MemoryRecord)> = guard
            .get(request.namespace.as_str())
            .map(|records| records.iter().map(|r| (cosine_similarity(&r.values, &request.vector), r)).collect())
            .unwrap_or_default();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(request.top_k);

        let matches: Vec<Value> = scored
            .into_iter()
            .map(|(score, r)| {
                let mut m = Map::new();
                m.insert("id".into(), Value::String(r.id.clone()));
                m.insert("score".into(), json!(score));
                if request.include_metadata {
                    m.insert("metadata".into(), serde_json::to_value(&r.metadata).unwrap_or(Value::Null));
                }
                Value::Object(m)
            })
            .collect();
        Ok(json!({ "matches": matches, "namespace": request.namespace }))
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Value> {
        let guard = self.namespaces.read().map_err(|_| anyhow!("memory index lock poisoned"))?;
        let mut vectors = Map::new();
        if let Some(records) = guard.get(request.namespace.as_str()) {
            for r in records.iter().filter(|r| request.ids.contains(&r.id)) {
                vectors.insert(r.id.clone(), json!({ "id": r.id, "values": r.values, "metadata": r.metadata }));
            }
        }
        Ok(json!({ "vectors": vectors, "namespace": request.namespace }))
    }
}

/// Cosine similarity of two equal-length vectors. Returns 0.0 when either
/// vector has zero norm or the dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() { return 0.0; }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 { return 0.0; }
    (dot / (na.sqrt() * nb.sqrt())) as f32
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::cosine_similarity;

    #[test]
    fn cosine_orders_similarities() {
        let q = vec![1.0, 0.0, 0.0];
        let s_a = cosine_similarity(&q, &[1.0, 0.0, 0.0]);
        let s_b = cosine_similarity(&q, &[0.5, 0.5, 0.0]);
        let s_c = cosine_similarity(&q, &[0.0, 1.0, 0.0]);
        assert!(s_a > s_b && s_b > s_c);
        assert_eq!(cosine_similarity(&q, &[1.0, 0.0]), 0.0);
    }
}
