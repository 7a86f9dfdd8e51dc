use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value as JsonValue;
use walkdir::WalkDir;

use qti_api::{
    compile_item_from_xml, qti_value_from_json, EmptyCustomOperatorRegistry, ItemSession,
    ItemSessionOptions, ScoringResult,
};
use qti_core::QtiValue;

#[derive(Debug, Parser)]
#[command(name = "qti-cli")]
#[command(about = "Score QTI assessment items from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Score a single item XML against a JSON response map.
    Score(ScoreArgs),
    /// Score every *.xml item under a directory.
    Batch(BatchArgs),
}

#[derive(Debug, Args)]
struct ScoreArgs {
    #[arg(long = "item")]
    item: PathBuf,
    #[arg(long = "responses")]
    responses: Option<PathBuf>,
    #[arg(long = "seed")]
    seed: Option<u32>,
    /// Number of scoring attempts to run (re-scoring is idempotent).
    #[arg(long = "attempts", default_value_t = 1)]
    attempts: u32,
}

#[derive(Debug, Args)]
struct BatchArgs {
    #[arg(long = "dir")]
    dir: PathBuf,
    #[arg(long = "seed")]
    seed: Option<u32>,
}

#[derive(Debug, Serialize)]
struct BatchLine {
    item: String,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ScoringResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Mode::Score(args) => run_score(args),
        Mode::Batch(args) => run_batch(args),
    }
}

fn run_score(args: ScoreArgs) -> Result<()> {
    let responses = match &args.responses {
        Some(path) => load_responses(path)?,
        None => BTreeMap::new(),
    };
    let result = score_item(&args.item, &responses, args.seed, args.attempts)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_batch(args: BatchArgs) -> Result<()> {
    let mut item_paths = Vec::new();
    for entry in WalkDir::new(&args.dir) {
        let entry = entry.with_context(|| format!("walking {}", args.dir.display()))?;
        if entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .map(|ext| ext == "xml")
                .unwrap_or(false)
        {
            item_paths.push(entry.path().to_path_buf());
        }
    }
    item_paths.sort();

    for path in item_paths {
        let responses = match sibling_responses_path(&path) {
            Some(responses_path) => load_responses(&responses_path)?,
            None => BTreeMap::new(),
        };
        // One malformed item must not abort the rest of the batch.
        let line = match score_item(&path, &responses, args.seed, 1) {
            Ok(result) => BatchLine {
                item: result.item.clone(),
                path: path.display().to_string(),
                result: Some(result),
                error: None,
            },
            Err(error) => BatchLine {
                item: path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
                    .unwrap_or_default(),
                path: path.display().to_string(),
                result: None,
                error: Some(error.to_string()),
            },
        };
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

fn score_item(
    path: &Path,
    responses: &BTreeMap<String, JsonValue>,
    seed: Option<u32>,
    attempts: u32,
) -> Result<ScoringResult> {
    let xml = fs::read_to_string(path)
        .with_context(|| format!("reading item {}", path.display()))?;
    let item = compile_item_from_xml(&xml)
        .with_context(|| format!("compiling item {}", path.display()))?;

    let ops = EmptyCustomOperatorRegistry;
    let mut session = ItemSession::new(&item, ItemSessionOptions { random_seed: seed });
    session
        .begin(&ops)
        .with_context(|| format!("template processing for {}", path.display()))?;

    for (identifier, payload) in responses {
        let value = match item
            .declarations
            .iter()
            .find(|declaration| &declaration.identifier == identifier)
        {
            Some(declaration) => qti_value_from_json(declaration, payload),
            None => QtiValue::invalid(format!("no declaration for \"{}\"", identifier)),
        };
        session.set_response(identifier, value);
    }

    let mut result = session.score_attempt(&ops);
    for _ in 1..attempts {
        result = session.score_attempt(&ops);
    }
    Ok(result)
}

fn load_responses(path: &Path) -> Result<BTreeMap<String, JsonValue>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading responses {}", path.display()))?;
    let parsed: BTreeMap<String, JsonValue> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing responses {}", path.display()))?;
    Ok(parsed)
}

fn sibling_responses_path(item_path: &Path) -> Option<PathBuf> {
    let stem = item_path.file_stem()?;
    let candidate = item_path.with_file_name(format!(
        "{}.responses.json",
        stem.to_string_lossy()
    ));
    candidate.exists().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_responses_path_derives_from_the_stem() {
        let path = Path::new("/tmp/does-not-exist/item1.xml");
        // The sibling does not exist, so no path is offered.
        assert_eq!(sibling_responses_path(path), None);
    }
}
