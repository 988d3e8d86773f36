use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use studyqa_core::config::{Settings, TimeoutSettings};
use studyqa_core::traits::{FetchRequest, QueryRequest, VectorIndex};
use studyqa_core::types::{Document, Match, Namespace, SimilarityMetric};
use studyqa_core::{Error, Result};

use crate::response::{parse_documents, parse_matches};

/// Float slack allowed past the metric bounds before a score is rejected.
const SCORE_SLACK: f32 = 1e-4;

/// Normalises a [`VectorIndex`] into per-namespace top-K queries and fetches.
///
/// Every backend call is bounded by a timeout. Namespaces are never merged:
/// each namespace's top-K is bounded independently and multi-namespace
/// results are plain concatenations. Scores outside the metric's range are
/// treated as a malformed response.
#[derive(Clone)]
pub struct SimilaritySearch {
    index: Arc<dyn VectorIndex>,
    metric: SimilarityMetric,
    query_timeout: Duration,
    fetch_timeout: Duration,
}

impl SimilaritySearch {
    pub fn new(index: Arc<dyn VectorIndex>, timeouts: &TimeoutSettings) -> Result<Self> {
        Self::with_timeouts(index, timeouts.query(), timeouts.fetch())
    }

    pub fn with_timeouts(index: Arc<dyn VectorIndex>, query_timeout: Duration, fetch_timeout: Duration) -> Result<Self> {
        if query_timeout.is_zero() || fetch_timeout.is_zero() {
            return Err(Error::config("index timeouts must be non-zero"));
        }
        Ok(Self { index, metric: SimilarityMetric::default(), query_timeout, fetch_timeout })
    }

    /// Timeouts from `settings.timeouts`, metric from `settings.index`.
    pub fn from_settings(index: Arc<dyn VectorIndex>, settings: &Settings) -> Result<Self> {
        Ok(Self::new(index, &settings.timeouts)?.with_metric(settings.index.metric))
    }

    pub fn with_metric(mut self, metric: SimilarityMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn metric(&self) -> SimilarityMetric { self.metric }

    pub fn dimension(&self) -> Option<usize> { self.index.dimension() }

    /// At most `top_k` matches in descending score order. An empty or
    /// under-populated namespace yields fewer (possibly zero) matches.
    pub async fn query(&self, vector: &[f32], namespace: &Namespace, top_k: usize, include_metadata: bool) -> Result<Vec<Match>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let request = QueryRequest { vector: vector.to_vec(), namespace: namespace.clone(), top_k, include_metadata };
        let raw = match timeout(self.query_timeout, self.index.query(&request)).await {
            Err(_) => return Err(Error::Timeout { operation: "index query", after: self.query_timeout }),
            Ok(Err(e)) => return Err(Error::Index { namespace: namespace.to_string(), detail: format!("{e:#}") }),
            Ok(Ok(raw)) => raw,
        };
        let mut matches = parse_matches(namespace, &raw, include_metadata)?;
        self.check_scores(namespace, &mut matches)?;
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        debug!(namespace = %namespace, top_k, hits = matches.len(), "query");
        Ok(matches)
    }

    /// Like [`query`](Self::query), but a namespace-scoped failure is logged
    /// and reported as zero matches.
    pub async fn query_lenient(&self, vector: &[f32], namespace: &Namespace, top_k: usize, include_metadata: bool) -> Vec<Match> {
        match self.query(vector, namespace, top_k, include_metadata).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "treating namespace as empty");
                Vec::new()
            }
        }
    }

    /// Query every namespace concurrently and concatenate the matches in
    /// namespace order. The length is the sum of per-namespace counts.
    pub async fn query_many(&self, vector: &[f32], namespaces: &[Namespace], top_k: usize) -> Vec<Match> {
        let queries = namespaces.iter().map(|ns| self.query_lenient(vector, ns, top_k, true));
        join_all(queries).await.into_iter().flatten().collect()
    }

    fn check_scores(&self, namespace: &Namespace, matches: &mut [Match]) -> Result<()> {
        let (lo, hi) = self.metric.range();
        for m in matches.iter_mut() {
            // also rejects NaN
            if !(m.score >= lo - SCORE_SLACK && m.score <= hi + SCORE_SLACK) {
                return Err(Error::shape(
                    namespace,
                    format!("score {} of `{}` is outside the {:?} range [{}, {}]", m.score, m.id, self.metric, lo, hi),
                ));
            }
            m.score = m.score.clamp(lo, hi);
        }
        Ok(())
    }

    pub async fn fetch(&self, ids: &[String], namespace: &Namespace) -> Result<HashMap<String, Document>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let request = FetchRequest { ids: ids.to_vec(), namespace: namespace.clone() };
        let raw = match timeout(self.fetch_timeout, self.index.fetch(&request)).await {
            Err(_) => return Err(Error::Timeout { operation: "index fetch", after: self.fetch_timeout }),
            Ok(Err(e)) => return Err(Error::Index { namespace: namespace.to_string(), detail: format!("{e:#}") }),
            Ok(Ok(raw)) => raw,
        };
        let docs = parse_documents(namespace, &raw)?;
        debug!(namespace = %namespace, requested = ids.len(), fetched = docs.len(), "fetch");
        Ok(docs)
    }
}
