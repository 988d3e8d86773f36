use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use studyqa_cli::{parse_args, parse_jsonl, Command, USAGE};
use studyqa_core::config::{expand_path, Config, Settings};
use studyqa_core::traits::EmbeddingProvider;
use studyqa_core::types::Namespace;
use studyqa_embed::embed_query;
use studyqa_guard::{GuardOptions, PlagiarismEstimator};
use studyqa_qa::{OpenAiChat, RetrievalQa};
use studyqa_vector::{LanceIndex, LanceRecord, SimilaritySearch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    let settings = Config::load().and_then(|c| c.settings()).map_err(|e| { eprintln!("Error loading config: {}", e); e })?;

    match command {
        Command::Ask { question, history, guard } => ask(&settings, &question, &history, guard).await,
        Command::Check { question, assignment, materials } => check(&settings, &question, &assignment, &materials).await,
        Command::Ingest { namespace, path, batch } => ingest(&settings, &namespace, &path, batch).await,
    }
}

async fn open_index(settings: &Settings) -> anyhow::Result<LanceIndex> {
    let uri = expand_path(&settings.index.uri);
    tracing::debug!(uri = %uri.display(), "opening index");
    LanceIndex::open(&uri.to_string_lossy(), settings.embedding.dimension, settings.index.metric).await
}

fn estimator(settings: &Settings, search: SimilaritySearch, embedder: Arc<dyn EmbeddingProvider>) -> anyhow::Result<PlagiarismEstimator> {
    Ok(PlagiarismEstimator::new(search, GuardOptions::from_settings(settings))?.with_embedder(embedder))
}

async fn ask(settings: &Settings, question: &str, history: &str, guard: Option<(Namespace, Namespace)>) -> anyhow::Result<()> {
    let search = SimilaritySearch::from_settings(Arc::new(open_index(settings).await?), settings)?;
    let embedder = studyqa_embed::from_settings(settings)?;
    let model = Arc::new(OpenAiChat::from_settings(settings)?);
    let qa = RetrievalQa::from_settings(embedder.clone(), search.clone(), model, settings)?;

    let embedding = embed_query(embedder.as_ref(), question, settings.timeouts.embed()).await?;
    let verdict = match guard {
        Some((assignment, materials)) => Some(estimator(settings, search, embedder)?.estimate(question, &embedding, &assignment, &materials).await?),
        None => None,
    };
    let answer = qa.answer_with_embedding(question, &embedding, history).await?;
    println!("{}", serde_json::to_string_pretty(&json!({ "answer": answer, "verdict": verdict }))?);
    Ok(())
}

async fn check(settings: &Settings, question: &str, assignment: &Namespace, materials: &Namespace) -> anyhow::Result<()> {
    let search = SimilaritySearch::from_settings(Arc::new(open_index(settings).await?), settings)?;
    let embedder = studyqa_embed::from_settings(settings)?;
    let verdict = estimator(settings, search, embedder)?.estimate_text(question, assignment, materials).await?;
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

async fn ingest(settings: &Settings, namespace: &Namespace, path: &str, batch: usize) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(expand_path(path))?;
    let lines = parse_jsonl(&raw)?;
    let index = open_index(settings).await?;
    let embedder = studyqa_embed::from_settings(settings)?;

    let pb = ProgressBar::new(lines.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")?
            .progress_chars("#>-"),
    );

    let mut written = 0usize;
    for chunk in lines.chunks(batch) {
        let mut records = Vec::with_capacity(chunk.len());
        for line in chunk {
            let vector = match &line.vector {
                Some(v) => v.clone(),
                None => embed_query(embedder.as_ref(), &line.metadata.text, settings.timeouts.embed()).await?,
            };
            records.push(LanceRecord { id: line.id.clone(), vector, metadata: line.metadata.clone() });
        }
        written += index.upsert(namespace, &records).await?;
        pb.inc(chunk.len() as u64);
    }
    pb.finish_with_message("done");

    let total = index.count(namespace).await?;
    println!("{}", serde_json::to_string_pretty(&json!({ "namespace": namespace, "written": written, "total": total }))?);
    Ok(())
}
