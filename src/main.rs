//! grafo CLI: document-to-knowledge-graph pipeline engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use grafo::config::Settings;
use grafo::error::PipelineError;
use grafo::graph::GraphBuilder;
use grafo::paths::GrafoPaths;
use grafo::pipeline::{
    ChunkingEngine, HttpOracle, JobStatus, Orchestrator, StageSet, TextExtractor,
};
use grafo::resolve::EntityResolver;

#[derive(Parser)]
#[command(name = "grafo", version, about = "Document-to-knowledge-graph pipeline")]
struct Cli {
    /// Data directory for job records and the cache.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Optional TOML settings file applied over the environment.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process documents into a knowledge graph and print the result.
    Run {
        /// Document paths (.txt or .md).
        files: Vec<PathBuf>,
    },

    /// Show the status of a previously submitted job.
    Status {
        /// Job id as printed by `run`.
        job_id: String,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::from_env()?;
    if let Some(path) = &cli.config {
        settings = settings.load_file(path)?;
    }

    let paths = match &cli.data_dir {
        Some(dir) => GrafoPaths::at(dir.clone()),
        None => GrafoPaths::resolve()?,
    };
    paths.ensure_dirs()?;

    let orchestrator = build_orchestrator(settings, &paths)?;

    match cli.command {
        Commands::Run { files } => {
            let documents: Vec<String> = files
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            let job_id = orchestrator.start_job(documents)?;
            println!("job {job_id} started");

            let view = orchestrator
                .wait(&job_id, Duration::from_secs(24 * 60 * 60))
                .ok_or_else(|| miette::miette!("job {job_id} disappeared"))?;

            match view.status {
                JobStatus::Completed => {
                    println!("job {job_id} completed");
                    println!("{}", serde_json::to_string_pretty(&view).into_diagnostic()?);
                }
                JobStatus::Failed => {
                    miette::bail!(
                        "job {job_id} failed: {}",
                        view.error.as_deref().unwrap_or("unknown error")
                    );
                }
                _ => miette::bail!("job {job_id} did not finish in time"),
            }
        }

        Commands::Status { job_id } => match orchestrator.get_status(&job_id) {
            Some(view) => {
                println!("{}", serde_json::to_string_pretty(&view).into_diagnostic()?)
            }
            None => return Err(PipelineError::JobNotFound { job_id }.into()),
        },
    }

    Ok(())
}

fn build_orchestrator(settings: Settings, paths: &GrafoPaths) -> Result<Orchestrator> {
    let oracle = Arc::new(HttpOracle::new(&settings));
    let stages = StageSet {
        extractor: Arc::new(TextExtractor),
        chunker: ChunkingEngine::new(settings.chunk_size, settings.chunk_overlap),
        ontology_oracle: oracle.clone(),
        triple_oracle: oracle,
        resolver: EntityResolver::with_threshold(settings.resolve_threshold),
        builder: GraphBuilder::new(),
    };
    Ok(Orchestrator::new(settings, stages, Some(paths))?)
}
