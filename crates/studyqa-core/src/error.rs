use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy shared by the search adapter and both engines.
///
/// `ResultShape`, `Index` and `Timeout` raised by a single namespace query are
/// absorbed by callers (logged, treated as zero matches). `Embedding` and
/// `Generation` are fatal to the request. `Configuration` is raised at
/// construction time only.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Unexpected index response for namespace '{namespace}': {detail}")]
    ResultShape { namespace: String, detail: String },

    #[error("Index request failed for namespace '{namespace}': {detail}")]
    Index { namespace: String, detail: String },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl Error {
    pub fn shape(namespace: impl ToString, detail: impl Into<String>) -> Self {
        Self::ResultShape { namespace: namespace.to_string(), detail: detail.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self { Self::Configuration(msg.into()) }

    /// True for failures scoped to one namespace that retrieval degrades past.
    pub fn is_namespace_scoped(&self) -> bool {
        matches!(self, Self::ResultShape { .. } | Self::Index { .. } | Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
