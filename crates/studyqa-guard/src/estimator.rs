use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use studyqa_core::config::Settings;
use studyqa_core::traits::EmbeddingProvider;
use studyqa_core::types::{AssignmentSignal, Evidence, Match, Namespace, PlagiarismVerdict, ScoreAggregation, SimilarityMetric};
use studyqa_core::{Error, Result};
use studyqa_embed::embed_query;
use studyqa_vector::SimilaritySearch;

#[derive(Debug, Clone)]
pub struct GuardOptions {
    /// Assignment scores must exceed this strictly.
    pub threshold: f32,
    pub top_k: usize,
    pub aggregation: ScoreAggregation,
    pub assignment_signal: AssignmentSignal,
    pub metric: SimilarityMetric,
    pub embed_timeout: Duration,
}

impl GuardOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            threshold: settings.guard.threshold,
            top_k: settings.guard.top_k,
            aggregation: settings.guard.aggregation,
            assignment_signal: settings.guard.assignment_signal,
            metric: settings.index.metric,
            embed_timeout: settings.timeouts.embed(),
        }
    }
}

impl Default for GuardOptions {
    fn default() -> Self { Self::from_settings(&Settings::default()) }
}

/// Flag iff there is an assignment score, it is strictly above `threshold`
/// and strictly above `materials`.
pub fn decide(assignment: Option<f32>, materials: f32, threshold: f32) -> bool {
    assignment.is_some_and(|score| score > threshold && score > materials)
}

pub struct PlagiarismEstimator {
    search: SimilaritySearch,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    options: GuardOptions,
}

impl PlagiarismEstimator {
    pub fn new(search: SimilaritySearch, options: GuardOptions) -> Result<Self> {
        if options.top_k == 0 {
            return Err(Error::config("guard.top_k must be positive"));
        }
        if options.embed_timeout.is_zero() {
            return Err(Error::config("embed timeout must be non-zero"));
        }
        if !options.threshold.is_finite() || !options.metric.contains(options.threshold) {
            let (lo, hi) = options.metric.range();
            return Err(Error::config(format!(
                "threshold {} is outside the {:?} range [{}, {}]",
                options.threshold, options.metric, lo, hi
            )));
        }
        Ok(Self { search, embedder: None, options })
    }

    /// Attach an embedder so [`estimate_text`](Self::estimate_text) can be used.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn options(&self) -> &GuardOptions { &self.options }

    /// Judge whether `question` was likely copied from the assignment in
    /// `assignment_ns`, using `materials_ns` as the baseline.
    ///
    /// `question_embedding` is used as given for both lookups. Index failures
    /// count as "no signal", so an outage never flags.
    pub async fn estimate(
        &self,
        question: &str,
        question_embedding: &[f32],
        assignment_ns: &Namespace,
        materials_ns: &Namespace,
    ) -> Result<PlagiarismVerdict> {
        if question_embedding.is_empty() {
            return Err(Error::Embedding("question embedding is empty".to_string()));
        }

        let materials_score = self.materials_score(question_embedding, std::slice::from_ref(materials_ns)).await;
        let candidates = self.search.query_lenient(question_embedding, assignment_ns, self.options.top_k, true).await;
        let signal = self.options.assignment_signal.pick(&candidates);
        let assignment_score = signal.map(|m| m.score);

        let flagged = decide(assignment_score, materials_score, self.options.threshold);
        info!(
            assignment = %assignment_ns,
            materials = %materials_ns,
            question_chars = question.len(),
            assignment_score = ?assignment_score,
            materials_score,
            flagged,
            "plagiarism verdict"
        );

        Ok(match signal {
            Some(m) if flagged => PlagiarismVerdict::flagged(evidence_of(m)),
            _ => PlagiarismVerdict::clear(),
        })
    }

    /// Embed `question` with the attached embedder, then [`estimate`](Self::estimate).
    pub async fn estimate_text(&self, question: &str, assignment_ns: &Namespace, materials_ns: &Namespace) -> Result<PlagiarismVerdict> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| Error::config("no embedder attached; use with_embedder or estimate"))?;
        let vector = embed_query(embedder.as_ref(), question, self.options.embed_timeout).await?;
        self.estimate(question, &vector, assignment_ns, materials_ns).await
    }

    /// Aggregate of the top matches across `namespaces`; 0.0 when nothing matched.
    pub async fn materials_score(&self, vector: &[f32], namespaces: &[Namespace]) -> f32 {
        let mut scores = Vec::new();
        for ns in namespaces {
            let matches = self.search.query_lenient(vector, ns, self.options.top_k, true).await;
            scores.extend(matches.iter().map(|m| m.score));
        }
        let score = self.options.aggregation.aggregate(&scores);
        debug!(namespaces = namespaces.len(), hits = scores.len(), score, "materials score");
        score
    }
}

fn evidence_of(m: &Match) -> Evidence { m.metadata.as_ref().map(Evidence::from).unwrap_or_default() }
