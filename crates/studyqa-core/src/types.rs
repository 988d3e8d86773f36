//! Domain types used by the search adapter, the answering engine and the
//! plagiarism estimator.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::{Error, Result};

pub type Embedding = Vec<f32>;

/// Named partition of the vector index. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::config("namespace name cannot be empty"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    /// Parse a list of names, failing on the first empty one.
    pub fn parse_all<I, S>(names: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().map(Self::new).collect()
    }
}

impl TryFrom<String> for Namespace {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> { Self::new(value) }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self { ns.0 }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str { &self.0 }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Payload stored alongside each indexed chunk.
///
/// PDF loaders flatten nested fields into dotted keys, so `loc.pageNumber`
/// and `pdf.totalPages` are accepted as aliases. Page fields tolerate
/// float-encoded integers (`3.0`), which some hosted indexes return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchMetadata {
    #[serde(default)]
    pub source: String,
    #[serde(default, alias = "loc.pageNumber", deserialize_with = "lenient_u32")]
    pub page_number: Option<u32>,
    #[serde(default, alias = "pdf.totalPages", deserialize_with = "lenient_u32")]
    pub total_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u32")]
    pub chapter: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book: Option<String>,
    #[serde(default)]
    pub text: String,
}

fn lenient_u32<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => {
            if let Some(u) = n.as_u64() {
                return u32::try_from(u).map(Some).map_err(D::Error::custom);
            }
            match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= f64::from(u32::MAX) => Ok(Some(f as u32)),
                _ => Err(D::Error::custom(format!("expected a non-negative integer, got {n}"))),
            }
        }
        Some(serde_json::Value::String(s)) => s.trim().parse::<u32>().map(Some).map_err(D::Error::custom),
        Some(other) => Err(D::Error::custom(format!("expected a number, got {other}"))),
    }
}

/// One nearest-neighbour hit. `score` is similarity: higher is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MatchMetadata>,
}

/// A stored chunk returned by `fetch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub metadata: MatchMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    pub text: String,
    pub page_number: Option<u32>,
    pub total_pages: Option<u32>,
}

impl From<&Document> for SourceDocument {
    fn from(doc: &Document) -> Self {
        Self {
            text: doc.metadata.text.clone(),
            page_number: doc.metadata.page_number,
            total_pages: doc.metadata.total_pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaAnswer {
    pub text: String,
    pub source_documents: Vec<SourceDocument>,
}

/// The assignment passage a flagged question most resembles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub source: String,
    pub text: String,
    pub page_start: Option<u32>,
    pub page_numbers: Option<u32>,
}

impl From<&MatchMetadata> for Evidence {
    fn from(meta: &MatchMetadata) -> Self {
        Self {
            source: meta.source.clone(),
            text: meta.text.clone(),
            page_start: meta.page_number,
            page_numbers: meta.total_pages,
        }
    }
}

/// Anti-cheat outcome. `evidence` is `Some` exactly when `flagged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlagiarismVerdict {
    pub flagged: bool,
    pub evidence: Option<Evidence>,
}

impl PlagiarismVerdict {
    pub fn clear() -> Self { Self { flagged: false, evidence: None } }

    pub fn flagged(evidence: Evidence) -> Self { Self { flagged: true, evidence: Some(evidence) } }
}

/// Similarity metric of the backing index. Scores are bounded by `range()`;
/// the plagiarism threshold is interpreted against this metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    /// Dot product over unit-normalised vectors.
    DotProduct,
}

impl SimilarityMetric {
    pub fn range(self) -> (f32, f32) {
        match self {
            Self::Cosine | Self::DotProduct => (-1.0, 1.0),
        }
    }

    pub fn contains(self, score: f32) -> bool {
        let (lo, hi) = self.range();
        (lo..=hi).contains(&score)
    }
}

/// How per-match scores from the materials namespaces combine into one
/// baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreAggregation {
    /// Add every score. Grows with the number of matches.
    #[default]
    Sum,
    Max,
    Mean,
}

impl ScoreAggregation {
    /// Empty input aggregates to 0.0 under every policy.
    pub fn aggregate(self, scores: &[f32]) -> f32 {
        if scores.is_empty() {
            return 0.0;
        }
        match self {
            Self::Sum => scores.iter().sum(),
            Self::Max => scores.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            Self::Mean => scores.iter().sum::<f32>() / scores.len() as f32,
        }
    }
}

/// Which assignment match supplies the assignment score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSignal {
    /// First match returned, in namespace order.
    #[default]
    First,
    Max,
}

impl AssignmentSignal {
    pub fn pick(self, matches: &[Match]) -> Option<&Match> {
        match self {
            Self::First => matches.first(),
            Self::Max => matches.iter().fold(None, |best: Option<&Match>, m| match best {
                Some(b) if b.score >= m.score => Some(b),
                _ => Some(m),
            }),
        }
    }
}
