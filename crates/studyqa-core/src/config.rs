//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` +
//! `config.<env>.toml` + `APP_*` env vars, then extracts [`Settings`].

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{AssignmentSignal, ScoreAggregation, SimilarityMetric};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_from(Path::new("."), &env_name)
    }

    /// Merge `config.toml`, then `config.<env>.toml`, both under `dir`, then
    /// `APP_*` variables (`APP_QA__TOP_K` sets `qa.top_k`).
    pub fn load_from(dir: &Path, env_name: &str) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(dir.join("config.toml")));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate_for_env(env_name)?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extract and validate the typed settings tree.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to extract settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        match env {
            "prod" | "production" => {
                let provider: EmbeddingBackend = self.get("embedding.provider")?;
                if provider == EmbeddingBackend::Hash {
                    return Err(anyhow::anyhow!("Prod config must not use the hash embedder"));
                }
            }
            "dev" | "development" => {}
            "test" | "testing" => {}
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub index: IndexSettings,
    pub embedding: EmbeddingSettings,
    pub llm: LlmSettings,
    pub openai: OpenAiSettings,
    pub qa: QaSettings,
    pub guard: GuardSettings,
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// LanceDB directory; `~` and `${VAR}` are expanded.
    pub uri: String,
    pub metric: SimilarityMetric,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { uri: "./data/indexes/lancedb".to_string(), metric: SimilarityMetric::Cosine }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    Hash,
    OpenAi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingBackend,
    pub model: String,
    pub dimension: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { provider: EmbeddingBackend::Hash, model: "text-embedding-3-small".to_string(), dimension: 1536 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self { Self { model: "gpt-3.5-turbo".to_string(), temperature: 0.2 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub base_url: String,
    /// Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
}

impl Default for OpenAiSettings {
    fn default() -> Self { Self { base_url: "https://api.openai.com/v1".to_string(), api_key: None } }
}

impl OpenAiSettings {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaSettings {
    pub namespaces: Vec<String>,
    pub top_k: usize,
    pub include_history: bool,
    pub return_source_documents: bool,
    pub persona_name: String,
    pub persona_description: String,
}

impl Default for QaSettings {
    fn default() -> Self {
        Self {
            namespaces: Vec::new(),
            top_k: 10,
            include_history: true,
            return_source_documents: true,
            persona_name: "StudyGPT".to_string(),
            persona_description: "a course assistant built for students".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    /// Assignment similarity must exceed this (strictly) to flag.
    pub threshold: f32,
    pub top_k: usize,
    pub aggregation: ScoreAggregation,
    pub assignment_signal: AssignmentSignal,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            threshold: 0.89,
            top_k: 1,
            aggregation: ScoreAggregation::Sum,
            assignment_signal: AssignmentSignal::First,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub embed_ms: u64,
    pub query_ms: u64,
    pub fetch_ms: u64,
    pub generate_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self { Self { embed_ms: 10_000, query_ms: 5_000, fetch_ms: 5_000, generate_ms: 60_000 } }
}

impl TimeoutSettings {
    pub fn embed(&self) -> Duration { Duration::from_millis(self.embed_ms) }
    pub fn query(&self) -> Duration { Duration::from_millis(self.query_ms) }
    pub fn fetch(&self) -> Duration { Duration::from_millis(self.fetch_ms) }
    pub fn generate(&self) -> Duration { Duration::from_millis(self.generate_ms) }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(Error::config("embedding.dimension must be > 0"));
        }
        if self.qa.top_k == 0 {
            return Err(Error::config("qa.top_k must be > 0"));
        }
        if self.guard.top_k == 0 {
            return Err(Error::config("guard.top_k must be > 0"));
        }
        if !self.index.metric.contains(self.guard.threshold) {
            let (lo, hi) = self.index.metric.range();
            return Err(Error::config(format!(
                "guard.threshold {} is outside the {:?} range [{}, {}]",
                self.guard.threshold, self.index.metric, lo, hi
            )));
        }
        let t = &self.timeouts;
        for (name, ms) in [("embed_ms", t.embed_ms), ("query_ms", t.query_ms), ("fetch_ms", t.fetch_ms), ("generate_ms", t.generate_ms)] {
            if ms == 0 {
                return Err(Error::config(format!("timeouts.{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
