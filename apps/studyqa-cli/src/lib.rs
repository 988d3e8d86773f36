//! Argument parsing and JSONL ingestion helpers for the `studyqa` binary.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use studyqa_core::types::{MatchMetadata, Namespace};

pub const USAGE: &str = "\
Usage:
  studyqa ask <question> [--history <text>] [--guard <assignment_ns> <materials_ns>]
  studyqa check <question> <assignment_ns> <materials_ns>
  studyqa ingest <namespace> <file.jsonl> [--batch <n>]";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ask { question: String, history: String, guard: Option<(Namespace, Namespace)> },
    Check { question: String, assignment: Namespace, materials: Namespace },
    Ingest { namespace: Namespace, path: String, batch: usize },
}

pub fn parse_args(args: &[String]) -> Result<Command> {
    let (cmd, rest) = args.split_first().ok_or_else(|| anyhow!("missing command"))?;
    let mut positional = Vec::new();
    let mut history = String::new();
    let mut guard = None;
    let mut batch = 64usize;
    let mut i = 0;
    while i < rest.len() {
        match rest[i].as_str() {
            "--history" => { history = value_at(rest, i + 1, "--history")?.to_string(); i += 1; }
            "--guard" => {
                let a = Namespace::new(value_at(rest, i + 1, "--guard")?)?;
                let m = Namespace::new(value_at(rest, i + 2, "--guard")?)?;
                guard = Some((a, m));
                i += 2;
            }
            "--batch" => {
                batch = value_at(rest, i + 1, "--batch")?.parse().context("--batch requires a number")?;
                if batch == 0 { bail!("--batch must be positive"); }
                i += 1;
            }
            flag if flag.starts_with("--") => bail!("unknown flag {}", flag),
            _ => positional.push(rest[i].clone()),
        }
        i += 1;
    }

    match (cmd.as_str(), positional.as_slice()) {
        ("ask", [question]) => Ok(Command::Ask { question: question.clone(), history, guard }),
        ("check", [question, assignment, materials]) => Ok(Command::Check {
            question: question.clone(),
            assignment: Namespace::new(assignment.as_str())?,
            materials: Namespace::new(materials.as_str())?,
        }),
        ("ingest", [namespace, path]) => Ok(Command::Ingest { namespace: Namespace::new(namespace.as_str())?, path: path.clone(), batch }),
        (other, _) => bail!("unrecognised invocation of `{}`", other),
    }
}

fn value_at<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i).map(String::as_str).ok_or_else(|| anyhow!("{} requires a value", flag))
}

/// One chunk per JSONL line. Metadata keys sit at the top level; `vector` is
/// optional and computed with the configured embedder when absent.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestLine {
    pub id: String,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    #[serde(flatten)]
    pub metadata: MatchMetadata,
}

/// Parse JSONL, skipping blank lines. Errors carry the 1-based line number.
pub fn parse_jsonl(input: &str) -> Result<Vec<IngestLine>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| serde_json::from_str(line).with_context(|| format!("line {}", n + 1)))
        .collect()
}
