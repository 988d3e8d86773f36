//! Namespaced similarity search over a pluggable vector index.
//!
//! [`SimilaritySearch`] wraps any [`VectorIndex`](studyqa_core::traits::VectorIndex)
//! and turns its raw responses into typed matches and documents. Two backends
//! ship with the crate: [`MemoryIndex`] for tests and small corpora, and
//! [`LanceIndex`] which keeps one LanceDB table per namespace.

pub mod adapter;
pub mod lance;
pub mod memory;
pub mod response;

pub use adapter::SimilaritySearch;
pub use lance::{LanceIndex, LanceRecord};
pub use memory::{cosine_similarity, MemoryIndex, MemoryRecord};
