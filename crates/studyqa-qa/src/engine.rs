use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use studyqa_core::config::Settings;
use studyqa_core::traits::{EmbeddingProvider, LanguageModel};
use studyqa_core::types::{Document, Namespace, QaAnswer, SourceDocument};
use studyqa_core::{Error, Result};
use studyqa_embed::embed_query;
use studyqa_vector::SimilaritySearch;

use crate::prompt::PromptTemplate;
use crate::sanitize::sanitize_response;

#[derive(Debug, Clone)]
pub struct QaOptions {
    /// Matches retrieved per namespace.
    pub top_k: usize,
    pub include_history: bool,
    pub return_source_documents: bool,
    pub embed_timeout: Duration,
    pub generate_timeout: Duration,
    pub prompt: PromptTemplate,
}

impl QaOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            top_k: settings.qa.top_k,
            include_history: settings.qa.include_history,
            return_source_documents: settings.qa.return_source_documents,
            embed_timeout: settings.timeouts.embed(),
            generate_timeout: settings.timeouts.generate(),
            prompt: PromptTemplate::from_settings(&settings.qa),
        }
    }
}

impl Default for QaOptions {
    fn default() -> Self { Self::from_settings(&Settings::default()) }
}

/// Answers a question from the passages retrieved across a fixed list of
/// namespaces.
///
/// A namespace that errors or returns nothing contributes no documents; the
/// model is still asked, with whatever context remains. Embedding and
/// generation failures are returned to the caller.
pub struct RetrievalQa {
    embedder: Arc<dyn EmbeddingProvider>,
    search: SimilaritySearch,
    model: Arc<dyn LanguageModel>,
    namespaces: Vec<Namespace>,
    options: QaOptions,
}

impl RetrievalQa {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        search: SimilaritySearch,
        model: Arc<dyn LanguageModel>,
        namespaces: Vec<Namespace>,
        options: QaOptions,
    ) -> Result<Self> {
        if namespaces.is_empty() {
            return Err(Error::config("at least one namespace is required"));
        }
        if options.top_k == 0 {
            return Err(Error::config("qa.top_k must be positive"));
        }
        if options.embed_timeout.is_zero() || options.generate_timeout.is_zero() {
            return Err(Error::config("embed and generate timeouts must be non-zero"));
        }
        if let Some(index_dim) = search.dimension() {
            if index_dim != embedder.dim() {
                return Err(Error::config(format!(
                    "embedder produces {}-dim vectors but the index holds {}-dim vectors",
                    embedder.dim(),
                    index_dim
                )));
            }
        }
        Ok(Self { embedder, search, model, namespaces, options })
    }

    /// Build with options and namespaces taken from `settings.qa`.
    pub fn from_settings(
        embedder: Arc<dyn EmbeddingProvider>,
        search: SimilaritySearch,
        model: Arc<dyn LanguageModel>,
        settings: &Settings,
    ) -> Result<Self> {
        let namespaces = Namespace::parse_all(settings.qa.namespaces.iter().cloned())?;
        Self::new(embedder, search, model, namespaces, QaOptions::from_settings(settings))
    }

    pub fn namespaces(&self) -> &[Namespace] { &self.namespaces }

    pub async fn answer(&self, question: &str, history: &str) -> Result<QaAnswer> {
        let vector = embed_query(self.embedder.as_ref(), question, self.options.embed_timeout).await?;
        self.answer_with_embedding(question, &vector, history).await
    }

    /// Like [`answer`](Self::answer) but with the question already embedded,
    /// so one vector can serve both retrieval and the plagiarism check.
    pub async fn answer_with_embedding(&self, question: &str, embedding: &[f32], history: &str) -> Result<QaAnswer> {
        let documents = self.retrieve_with_embedding(embedding).await?;
        let context = build_context(&documents);
        let history = if self.options.include_history { Some(history) } else { None };
        let prompt = self.options.prompt.render(question, &context, history);

        let after = self.options.generate_timeout;
        let raw = match timeout(after, self.model.generate(&prompt)).await {
            Err(_) => return Err(Error::Timeout { operation: "generate", after }),
            Ok(Err(e)) => return Err(Error::Generation(format!("{e:#}"))),
            Ok(Ok(text)) => text,
        };
        let text = sanitize_response(&raw);

        let source_documents = if self.options.return_source_documents {
            documents.iter().map(SourceDocument::from).collect()
        } else {
            Vec::new()
        };
        info!(documents = documents.len(), context_chars = context.len(), answer_chars = text.len(), "answered");
        Ok(QaAnswer { text, source_documents })
    }

    /// Embed `question` and collect the matching documents from every
    /// namespace, in namespace order and then match order.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<Document>> {
        let vector = embed_query(self.embedder.as_ref(), question, self.options.embed_timeout).await?;
        self.retrieve_with_embedding(&vector).await
    }

    /// Namespaces are queried concurrently and joined, so latency follows
    /// the slowest namespace.
    pub async fn retrieve_with_embedding(&self, embedding: &[f32]) -> Result<Vec<Document>> {
        if embedding.is_empty() {
            return Err(Error::Embedding("question embedding is empty".to_string()));
        }
        let per_namespace = self.namespaces.iter().map(|ns| self.retrieve_namespace(embedding, ns));
        Ok(join_all(per_namespace).await.into_iter().flatten().collect())
    }

    async fn retrieve_namespace(&self, vector: &[f32], namespace: &Namespace) -> Vec<Document> {
        let matches = self.search.query_lenient(vector, namespace, self.options.top_k, true).await;
        if matches.is_empty() {
            debug!(namespace = %namespace, "no matches");
            return Vec::new();
        }
        let ids: Vec<String> = matches.into_iter().map(|m| m.id).collect();
        match self.search.fetch(&ids, namespace).await {
            Ok(mut docs) => ids.iter().filter_map(|id| docs.remove(id)).collect(),
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "fetch failed; skipping namespace");
                Vec::new()
            }
        }
    }
}

/// Document texts joined by single spaces, in order, duplicates kept.
pub fn build_context(documents: &[Document]) -> String {
    documents.iter().map(|d| d.metadata.text.as_str()).collect::<Vec<_>>().join(" ")
}
