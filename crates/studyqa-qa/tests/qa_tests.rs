#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use studyqa_core::traits::{EmbeddingProvider, FetchRequest, LanguageModel, QueryRequest, VectorIndex};
use studyqa_core::types::{MatchMetadata, Namespace};
use studyqa_core::Error;
use studyqa_qa::{build_context, OpenAiChat, QaOptions, RetrievalQa};
use studyqa_vector::{MemoryIndex, MemoryRecord, SimilaritySearch};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ns(name: &str) -> Namespace { Namespace::new(name).unwrap() }

struct FixedEmbedder {
    vector: Option<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    fn dim(&self) -> usize { 3 }
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        self.vector.clone().ok_or_else(|| anyhow::anyhow!("embedding service unavailable"))
    }
}

#[derive(Default)]
struct RecordingModel {
    reply: String,
    fail: bool,
    delay: Duration,
    prompts: Mutex<Vec<String>>,
}

impl RecordingModel {
    fn replying(reply: &str) -> Arc<Self> { Arc::new(Self { reply: reply.to_string(), ..Default::default() }) }
    fn last_prompt(&self) -> String { self.prompts.lock().unwrap().last().cloned().unwrap_or_default() }
    fn calls(&self) -> usize { self.prompts.lock().unwrap().len() }
}

#[async_trait]
impl LanguageModel for RecordingModel {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        tokio::time::sleep(self.delay).await;
        if self.fail {
            anyhow::bail!("model overloaded");
        }
        Ok(self.reply.clone())
    }
}

/// Delegates to a memory index except for the `down` namespace.
struct FlakyIndex {
    inner: MemoryIndex,
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    fn dimension(&self) -> Option<usize> { self.inner.dimension() }
    async fn query(&self, request: &QueryRequest) -> anyhow::Result<Value> {
        if request.namespace.as_str() == "down" {
            anyhow::bail!("connection reset");
        }
        self.inner.query(request).await
    }
    async fn fetch(&self, request: &FetchRequest) -> anyhow::Result<Value> { self.inner.fetch(request).await }
}

/// Delays every query, to observe how namespace queries overlap.
struct SlowIndex {
    inner: MemoryIndex,
    delay: Duration,
}

#[async_trait]
impl VectorIndex for SlowIndex {
    async fn query(&self, request: &QueryRequest) -> anyhow::Result<Value> {
        tokio::time::sleep(self.delay).await;
        self.inner.query(request).await
    }
    async fn fetch(&self, request: &FetchRequest) -> anyhow::Result<Value> { self.inner.fetch(request).await }
}

fn chunk(id: &str, values: Vec<f32>, text: &str, page: u32) -> MemoryRecord {
    MemoryRecord {
        id: id.to_string(),
        values,
        metadata: MatchMetadata { source: "book.pdf".into(), text: text.into(), page_number: Some(page), total_pages: Some(40), ..Default::default() },
    }
}

fn course_index() -> MemoryIndex {
    let index = MemoryIndex::with_dimension(3);
    index
        .upsert(&ns("lectures"), vec![
            chunk("l1", vec![1.0, 0.0, 0.0], "Heaps keep the minimum at the root.", 3),
            chunk("l2", vec![0.7, 0.7, 0.0], "Heapify runs in linear time.", 4),
        ])
        .unwrap();
    index.upsert(&ns("textbook"), vec![chunk("t1", vec![0.9, 0.1, 0.0], "A binary heap is a complete tree.", 120)]).unwrap();
    index
}

fn search(index: impl VectorIndex + 'static) -> SimilaritySearch {
    SimilaritySearch::with_timeouts(Arc::new(index), Duration::from_secs(1), Duration::from_secs(1)).unwrap()
}

fn engine(model: Arc<RecordingModel>, namespaces: &[&str], options: QaOptions) -> RetrievalQa {
    RetrievalQa::new(
        Arc::new(FixedEmbedder { vector: Some(vec![1.0, 0.0, 0.0]) }),
        search(course_index()),
        model,
        namespaces.iter().map(|n| ns(n)).collect(),
        options,
    )
    .unwrap()
}

#[tokio::test]
async fn answer_uses_every_namespace_and_sanitizes() -> anyhow::Result<()> {
    let model = RecordingModel::replying("\"The minimum \" + \"sits at the root (page 3).\"");
    let qa = engine(model.clone(), &["lectures", "textbook"], QaOptions::default());

    let answer = qa.answer("Where is the minimum of a heap?", "").await?;
    assert_eq!(answer.text, "The minimumsits at the root (page 3).");
    assert_eq!(answer.source_documents.len(), 3);
    assert_eq!(answer.source_documents[0].text, "Heaps keep the minimum at the root.");
    assert_eq!(answer.source_documents[0].page_number, Some(3));
    assert_eq!(answer.source_documents[2].total_pages, Some(40));

    let prompt = model.last_prompt();
    assert!(prompt.contains("Where is the minimum of a heap?"));
    assert!(prompt.contains("Heaps keep the minimum at the root. Heapify runs in linear time. A binary heap is a complete tree."));
    Ok(())
}

#[tokio::test]
async fn empty_retrieval_still_answers() -> anyhow::Result<()> {
    let model = RecordingModel::replying("Recursion is a function calling itself.");
    let qa = engine(model.clone(), &["empty-a", "empty-b"], QaOptions::default());

    let answer = qa.answer("What is recursion?", "").await?;
    assert_eq!(answer.text, "Recursion is a function calling itself.");
    assert!(answer.source_documents.is_empty());
    assert!(model.last_prompt().contains("Context: \nQuestion: What is recursion?"));
    Ok(())
}

#[tokio::test]
async fn failing_namespace_is_skipped() -> anyhow::Result<()> {
    let model = RecordingModel::replying("ok");
    let qa = RetrievalQa::new(
        Arc::new(FixedEmbedder { vector: Some(vec![1.0, 0.0, 0.0]) }),
        search(FlakyIndex { inner: course_index() }),
        model.clone(),
        vec![ns("down"), ns("textbook")],
        QaOptions::default(),
    )?;
    let answer = qa.answer("heap?", "").await?;
    assert_eq!(answer.source_documents.len(), 1);
    assert_eq!(model.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn embedding_failure_is_fatal_and_skips_generation() {
    let model = RecordingModel::replying("unused");
    let qa = RetrievalQa::new(
        Arc::new(FixedEmbedder { vector: None }),
        search(course_index()),
        model.clone(),
        vec![ns("lectures")],
        QaOptions::default(),
    )
    .unwrap();
    let err = qa.answer("anything", "").await.unwrap_err();
    assert!(matches!(err, Error::Embedding(ref m) if m.contains("unavailable")), "{err}");
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn generation_failures_are_not_masked() {
    let failing = Arc::new(RecordingModel { fail: true, ..Default::default() });
    let err = engine(failing, &["lectures"], QaOptions::default()).answer("q", "").await.unwrap_err();
    assert!(matches!(err, Error::Generation(ref m) if m.contains("overloaded")), "{err}");

    let slow = Arc::new(RecordingModel { reply: "late".into(), delay: Duration::from_secs(5), ..Default::default() });
    let options = QaOptions { generate_timeout: Duration::from_millis(50), ..QaOptions::default() };
    let err = engine(slow, &["lectures"], options).answer("q", "").await.unwrap_err();
    assert!(matches!(err, Error::Timeout { operation: "generate", .. }), "{err}");
}

#[tokio::test]
async fn history_and_source_options_are_honoured() -> anyhow::Result<()> {
    let model = RecordingModel::replying("fine");
    let qa = engine(model.clone(), &["lectures"], QaOptions::default());
    qa.answer("and heapify?", "student: what is a heap?").await?;
    assert!(model.last_prompt().contains("student: what is a heap?"));

    let options = QaOptions { include_history: false, return_source_documents: false, ..QaOptions::default() };
    let qa = engine(model.clone(), &["lectures"], options);
    let answer = qa.answer("and heapify?", "student: what is a heap?").await?;
    assert!(!model.last_prompt().contains("student: what is a heap?"));
    assert!(answer.source_documents.is_empty());
    Ok(())
}

#[tokio::test]
async fn top_k_bounds_each_namespace() -> anyhow::Result<()> {
    let options = QaOptions { top_k: 1, ..QaOptions::default() };
    let qa = engine(RecordingModel::replying("x"), &["lectures", "textbook"], options);
    let docs = qa.retrieve("heap").await?;
    let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["l1", "t1"]);
    assert_eq!(build_context(&docs), "Heaps keep the minimum at the root. A binary heap is a complete tree.");
    Ok(())
}

#[tokio::test]
async fn namespaces_are_queried_concurrently() -> anyhow::Result<()> {
    let inner = course_index();
    inner.upsert(&ns("slides"), vec![chunk("s1", vec![1.0, 0.0, 0.0], "Heap order is partial.", 7)])?;
    let qa = RetrievalQa::new(
        Arc::new(FixedEmbedder { vector: Some(vec![1.0, 0.0, 0.0]) }),
        search(SlowIndex { inner, delay: Duration::from_millis(200) }),
        RecordingModel::replying("x"),
        vec![ns("lectures"), ns("textbook"), ns("slides")],
        QaOptions::default(),
    )?;

    let started = Instant::now();
    let docs = qa.retrieve("heap").await?;
    let elapsed = started.elapsed();
    assert_eq!(docs.len(), 4);
    assert_eq!(docs.last().unwrap().id, "s1");
    // three sequential queries would take at least 600ms
    assert!(elapsed < Duration::from_millis(450), "retrieval took {elapsed:?}");
    Ok(())
}

#[tokio::test]
async fn precomputed_embedding_skips_the_embedder() -> anyhow::Result<()> {
    let model = RecordingModel::replying("Heaps keep the minimum at the root.");
    let qa = RetrievalQa::new(
        Arc::new(FixedEmbedder { vector: None }),
        search(course_index()),
        model.clone(),
        vec![ns("lectures"), ns("textbook")],
        QaOptions::default(),
    )?;
    let answer = qa.answer_with_embedding("Where is the minimum?", &[1.0, 0.0, 0.0], "").await?;
    assert_eq!(answer.source_documents.len(), 3);
    assert!(model.last_prompt().contains("Where is the minimum?"));

    let err = qa.answer_with_embedding("q", &[], "").await.unwrap_err();
    assert!(matches!(err, Error::Embedding(_)), "{err}");
    assert_eq!(model.calls(), 1);
    Ok(())
}

#[test]
fn construction_rejects_bad_configuration() {
    let build = |namespaces: Vec<Namespace>, options: QaOptions, index: MemoryIndex| {
        RetrievalQa::new(
            Arc::new(FixedEmbedder { vector: Some(vec![1.0, 0.0, 0.0]) }),
            search(index),
            RecordingModel::replying("x"),
            namespaces,
            options,
        )
    };
    assert!(matches!(build(vec![], QaOptions::default(), course_index()), Err(Error::Configuration(_))));
    assert!(matches!(
        build(vec![ns("lectures")], QaOptions { top_k: 0, ..QaOptions::default() }, course_index()),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        build(vec![ns("lectures")], QaOptions { embed_timeout: Duration::ZERO, ..QaOptions::default() }, course_index()),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        build(vec![ns("lectures")], QaOptions::default(), MemoryIndex::with_dimension(1536)),
        Err(Error::Configuration(ref m)) if m.contains("1536")
    ));
    assert!(build(vec![ns("lectures")], QaOptions::default(), MemoryIndex::new()).is_ok());
}

#[tokio::test]
async fn openai_chat_sends_single_user_message() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-3.5-turbo",
            "messages": [{ "role": "user", "content": "Say hi" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "hi" } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let chat = OpenAiChat::new(&server.uri(), "sk-test", "gpt-3.5-turbo", 0.2);
    assert_eq!(chat.generate("Say hi").await?, "hi");
    Ok(())
}

#[tokio::test]
async fn openai_chat_surfaces_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;
    let chat = OpenAiChat::new(&server.uri(), "sk-test", "gpt-3.5-turbo", 0.2);
    let err = chat.generate("Say hi").await.unwrap_err();
    assert!(err.to_string().contains("500"), "{err}");
}
