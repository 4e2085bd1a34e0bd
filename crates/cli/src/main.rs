//! `enrichflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve` — start the HTTP API over offline services and an in-memory store.
//! - `run`   — push one file through the enrichment pipeline and print the result.
//! - `plan`  — validate the enrichment graph and print its execution plan.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use engine::{enrichment_graph, ArtifactPayload, Executor, RunController, RunError, RunFailure};
use serde_json::{json, Value};
use steps::offline::offline_services;
use store::{HybridSearcher, MemoryStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "enrichflow",
    about = "Artifact enrichment pipeline with hybrid search",
    version
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true, env = "ENRICH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        /// Overrides `server.bind` from the config file.
        #[arg(long, env = "ENRICH_BIND")]
        bind: Option<String>,
    },
    /// Run one file through the pipeline and print the result as JSON.
    Run {
        /// Path to the artifact.
        path: PathBuf,
        /// MIME type; guessed from the extension when omitted.
        #[arg(long)]
        mime: Option<String>,
        /// Free-text hint passed to the classifier.
        #[arg(long)]
        hint: Option<String>,
    },
    /// Validate the enrichment graph and print its execution plan.
    Plan,
}

/// Everything a command needs, wired over offline services.
struct Wiring {
    controller: Arc<RunController>,
    searcher: Arc<HybridSearcher>,
}

fn wire(config: &AppConfig) -> Result<Wiring> {
    let store = Arc::new(MemoryStore::new());
    let services = offline_services(store.clone());
    let graph = enrichment_graph(&services, config.validation.clone())
        .context("enrichment graph failed validation")?;
    let controller = RunController::new(graph, Executor::new(config.executor.to_config()));
    let searcher = HybridSearcher::new(store, services.embedder.clone(), config.search);
    Ok(Wiring {
        controller: Arc::new(controller),
        searcher: Arc::new(searcher),
    })
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// What `run` prints when a required step fails.
fn failure_report(run: &RunFailure) -> Value {
    json!({
        "error": run.failure.message,
        "step": run.failure.step,
        "partial": run.partial,
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let wiring = wire(&config)?;
            info!("Starting API server on {bind}");
            let state = api::AppState::new(
                wiring.controller,
                wiring.searcher,
                config.validation.max_bytes,
            );
            api::serve(&bind, state)
                .await
                .with_context(|| format!("server on {bind} failed"))?;
        }
        Command::Run { path, mime, hint } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("cannot read file {}", path.display()))?;
            let mime = mime.unwrap_or_else(|| guess_mime(&path).to_owned());
            let mut payload = ArtifactPayload::new(bytes, mime);
            payload.hint = hint;

            let wiring = wire(&config)?;
            match wiring.controller.execute(payload).await {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                Err(RunError::StepFailed(run)) => {
                    println!("{}", serde_json::to_string_pretty(&failure_report(&run))?);
                    return Ok(ExitCode::FAILURE);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Plan => {
            let wiring = wire(&config)?;
            let graph = wiring.controller.graph();
            println!("entry:     {}", graph.entry());
            println!("terminals: {}", graph.terminals().join(", "));
            println!();
            for (i, step) in graph.descriptors().enumerate() {
                let after: Vec<String> = graph
                    .edges()
                    .into_iter()
                    .filter(|e| e.to == step.name)
                    .map(|e| e.from)
                    .collect();
                println!(
                    "{:>2}. {:<26} {:<12} after [{}]",
                    i + 1,
                    step.name,
                    format!("{:?}", step.criticality),
                    after.join(", ")
                );
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::StepFailure;

    #[test]
    fn failure_report_carries_surviving_slots() {
        let run = RunFailure {
            failure: StepFailure {
                step: "embedAndStore".into(),
                message: "card repository call failed: disk full".into(),
            },
            partial: [("validation".to_owned(), json!({ "isValid": true }))].into_iter().collect(),
            steps: Vec::new(),
        };
        assert_eq!(
            failure_report(&run),
            json!({
                "error": "card repository call failed: disk full",
                "step": "embedAndStore",
                "partial": { "validation": { "isValid": true } },
            })
        );
    }

    #[test]
    fn mime_is_guessed_from_extension() {
        assert_eq!(guess_mime(Path::new("slab.JPG")), "image/jpeg");
        assert_eq!(guess_mime(Path::new("scan.pdf")), "application/pdf");
        assert_eq!(guess_mime(Path::new("notes")), "application/octet-stream");
    }
}
