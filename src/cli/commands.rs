//! CLI command definitions for autoresearch.
//!
//! `run` executes a research cycle, `summary` prints the last persisted run
//! summary and `recall` searches the notes recorded by earlier runs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::capabilities::Capabilities;
use crate::llm::{LiteLlmClient, LlmProvider};
use crate::memory::{HashEmbedder, SemanticMemory};
use crate::pipeline::{Orchestrator, PipelineConfig, PipelineEvent, RunSummary};

/// Default OpenAI-compatible endpoint.
const DEFAULT_API_BASE: &str = "https://api.groq.com/openai/v1";

/// Iterative research pipeline: domain discovery to final paper.
#[derive(Parser)]
#[command(name = "autoresearch")]
#[command(about = "Run iterative multi-stage research cycles")]
#[command(version)]
#[command(
    long_about = "autoresearch discovers a research domain, generates questions, finds datasets, designs an experiment, critiques it and writes a short paper, repeating the cycle N times.\n\nExample usage:\n  autoresearch run --iterations 3 --output-dir ./autoresearch_output"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a research cycle.
    Run(RunArgs),

    /// Print the last persisted run summary.
    Summary(SummaryArgs),

    /// Search notes recorded by earlier runs.
    Recall(RecallArgs),
}

/// Arguments for `autoresearch run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Number of iterations to run.
    #[arg(short = 'n', long, default_value = "1")]
    pub iterations: usize,

    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output directory (overrides the configuration file).
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Model identifier (overrides the configuration file).
    #[arg(short, long)]
    pub model: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint.
    #[arg(long, env = "LITELLM_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// API key for the endpoint.
    #[arg(long, env = "LITELLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Tavily API key for domain search.
    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    pub tavily_api_key: Option<String>,

    /// Run without any remote capability; every stage uses its fallback.
    #[arg(long)]
    pub offline: bool,

    /// Print the run summary as JSON instead of a table.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `autoresearch summary`.
#[derive(Parser, Debug)]
pub struct SummaryArgs {
    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output directory of the run.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Print the raw JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `autoresearch recall`.
#[derive(Parser, Debug)]
pub struct RecallArgs {
    /// Text to search for.
    pub query: String,

    /// Number of notes to return.
    #[arg(short, default_value = "5")]
    pub k: usize,

    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output directory of earlier runs.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_cycle_command(args).await,
        Commands::Summary(args) => run_summary_command(args),
        Commands::Recall(args) => run_recall_command(args),
    }
}

/// Loads the configuration file (or defaults) and applies overrides.
fn resolve_config(
    path: Option<&PathBuf>,
    output_dir: Option<PathBuf>,
    model: Option<String>,
) -> anyhow::Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => PipelineConfig::new(),
    };
    if let Some(dir) = output_dir {
        config = config.with_output_dir(dir);
    }
    if let Some(model) = model {
        config = config.with_model(model);
    }
    config.validate()?;
    Ok(config)
}

fn build_capabilities(args: &RunArgs, config: &PipelineConfig) -> Capabilities {
    if args.offline {
        info!("Offline mode: all stages use local fallbacks");
        return Capabilities::offline();
    }

    info!(api_base = %args.api_base, model = %config.model, "Using OpenAI-compatible endpoint");
    let llm: Arc<dyn LlmProvider> = Arc::new(LiteLlmClient::new(
        args.api_base.clone(),
        args.api_key.clone(),
        config.model.clone(),
    ));

    if args.tavily_api_key.is_none() {
        info!("TAVILY_API_KEY not set; domain discovery runs without search context");
    }
    Capabilities::online(Some(llm), args.tavily_api_key.clone())
}

async fn run_cycle_command(args: RunArgs) -> anyhow::Result<()> {
    let config = resolve_config(
        args.config.as_ref(),
        args.output_dir.clone(),
        args.model.clone(),
    )?;
    let capabilities = build_capabilities(&args, &config);

    let (event_tx, mut event_rx) = mpsc::channel(100);
    let progress = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match &event {
                PipelineEvent::StageCompleted {
                    iteration,
                    stage,
                    status,
                    ..
                } => info!(iteration, stage = %stage, status = status.as_str(), "Stage stored"),
                other => debug!(event = ?other, "Pipeline event"),
            }
        }
    });

    let mut orchestrator = Orchestrator::new(config, capabilities)?.with_event_sender(event_tx);
    let summary = orchestrator.run_cycle(args.iterations.max(1)).await?;
    let summary_path = orchestrator.config().run_summary_path();
    drop(orchestrator);
    let _ = progress.await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
        println!("Summary written to {}", summary_path.display());
    }
    Ok(())
}

fn run_summary_command(args: SummaryArgs) -> anyhow::Result<()> {
    let config = resolve_config(args.config.as_ref(), args.output_dir, None)?;
    let path = config.run_summary_path();
    let summary = RunSummary::load(&path)
        .with_context(|| format!("No readable run summary at {}", path.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn run_recall_command(args: RecallArgs) -> anyhow::Result<()> {
    let config = resolve_config(args.config.as_ref(), args.output_dir, None)?;
    let memory = SemanticMemory::open(&config.memory_dir(), Box::new(HashEmbedder::default()));
    if memory.is_empty() {
        println!("No notes recorded under {}", config.memory_dir().display());
        return Ok(());
    }

    for (note, score) in memory.query_notes(&args.query, args.k) {
        let iteration = note.metadata.get("iteration").map(String::as_str).unwrap_or("?");
        let stage = note.metadata.get("stage").map(String::as_str).unwrap_or("?");
        println!("{score:.3}  [iteration {iteration}, {stage}]  {}", note.text);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Run {} ({:?})", summary.run_id, summary.status);
    println!("Started:   {}", summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(done) = summary.completed_at {
        println!("Completed: {}", done.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!();
    for record in &summary.results {
        let domain = record
            .output("domain")
            .and_then(|d| d.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("-");
        let score = record
            .output("critique")
            .and_then(|c| c.get("critique_score"))
            .and_then(|s| s.as_f64())
            .map(|s| format!("{s:.3}"))
            .unwrap_or_else(|| "-".to_string());
        match &record.error {
            Some(error) => println!("  #{:<3} {:<8} {}", record.iteration, record.status, error),
            None => println!(
                "  #{:<3} {:<8} domain: {}  critique score: {}",
                record.iteration, record.status, domain, score
            ),
        }
    }
    println!();
    println!("{} succeeded, {} failed", summary.succeeded(), summary.failed());
}
