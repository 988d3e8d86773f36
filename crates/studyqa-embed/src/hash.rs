use async_trait::async_trait;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use studyqa_core::traits::EmbeddingProvider;

/// Token-bucket embedder: each whitespace token is hashed into one of `dim`
/// buckets and the result is L2-normalised. Identical text always yields the
/// identical vector, and texts sharing tokens score closer under cosine.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim: dim.max(1) } }

    /// Each token adds its hash-derived weight plus a small offset taken from
    /// its position (`(i % 3) * 0.01`). Word order therefore nudges the
    /// vector: permutations of the same tokens score close to each other
    /// without being exact duplicates.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let token = token.to_lowercase();
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn dim(&self) -> usize { self.dim }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> { Ok(self.embed_text(text)) }
}
