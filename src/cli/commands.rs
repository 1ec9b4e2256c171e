//! CLI command definitions for template-reviewer.

use crate::analysis;
use crate::config::ReviewerConfig;
use crate::llm::{LiteLlmClient, LlmProvider, OpenRouterProvider};
use crate::metrics::{export_metrics, init_metrics};
use crate::project::{Project, ProjectStatus};
use crate::provision::RepoProvisioner;
use crate::storage::{ProjectFilter, ProjectStore, SqliteProjectStore};
use crate::video::YoutubeTranscriptClient;
use crate::workflow::{MastraConnector, ReviewInput, ReviewOutput, ReviewWorkflow};
use anyhow::Context;
use clap::Parser;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Automated judge for hackathon agent-template submissions.
#[derive(Parser)]
#[command(name = "template-reviewer")]
#[command(about = "Clone, exercise and score hackathon agent templates")]
#[command(version)]
#[command(
    long_about = "template-reviewer clones a submitted agent template, extracts the claims made in its description and demo video, tests them against the running agent and scores the result.\n\nExample usage:\n  template-reviewer review --name Weather --repo acme/weather-agent --video-url https://youtu.be/dQw4w9WgXcQ"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// SQLite database holding project records (overrides REVIEWER_DATABASE_PATH).
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Review a submission end to end.
    Review(ReviewArgs),

    /// List stored projects.
    #[command(alias = "ls")]
    List(ListArgs),

    /// Run the static analyzer on a local checkout.
    Analyze(AnalyzeArgs),

    /// Archive a stored project.
    Archive(ArchiveArgs),
}

/// Arguments for `template-reviewer review`.
#[derive(Parser, Debug)]
pub struct ReviewArgs {
    /// Review input file (YAML or JSON) with the workflow input fields.
    #[arg(short, long, conflicts_with_all = ["name", "repo", "video_url"])]
    pub input: Option<PathBuf>,

    /// Project name.
    #[arg(long, required_unless_present = "input")]
    pub name: Option<String>,

    /// Repository URL or GitHub `owner/repo` shorthand.
    #[arg(long, required_unless_present = "input")]
    pub repo: Option<String>,

    /// Free-text project description.
    #[arg(short, long)]
    pub description: Option<String>,

    /// YouTube URL of the demo video.
    #[arg(long, required_unless_present = "input")]
    pub video_url: Option<String>,

    /// Extra environment variable for the cloned project (KEY=VALUE, repeatable).
    #[arg(short, long = "env", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Port for the project's server (random 3000-9000 when omitted).
    #[arg(long)]
    pub port: Option<u16>,

    /// LLM model used for judging (overrides REVIEWER_MODEL).
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// OpenRouter API key (can also be set via OPENROUTER_API_KEY or LITELLM_API_KEY env var).
    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,

    /// Directory receiving per-project clones (overrides REVIEWER_WORK_ROOT).
    #[arg(long)]
    pub work_root: Option<PathBuf>,

    /// Write the Prometheus text exposition here after the review.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,

    /// Output JSON instead of a readable report.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `template-reviewer list`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Only the project with this id.
    #[arg(long)]
    pub id: Option<Uuid>,

    /// Only projects in this status (initialized, setting-up, ready, evaluating, evaluated, archived).
    #[arg(long)]
    pub status: Option<ProjectStatus>,

    /// Case-insensitive substring of the project name.
    #[arg(long)]
    pub name: Option<String>,

    /// Exact repository URL.
    #[arg(long)]
    pub repo_url: Option<String>,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `template-reviewer analyze`.
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// Root of the project checkout.
    pub dir: PathBuf,
}

/// Arguments for `template-reviewer archive`.
#[derive(Parser, Debug)]
pub struct ArchiveArgs {
    /// Project id.
    pub id: Uuid,
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
    let mut config = ReviewerConfig::from_env().context("Invalid reviewer configuration")?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    match cli.command {
        Commands::Review(args) => run_review_command(args, config).await,
        Commands::List(args) => run_list_command(args, config).await,
        Commands::Analyze(args) => run_analyze_command(args),
        Commands::Archive(args) => run_archive_command(args, config).await,
    }
}

// ============================================================================
// Review
// ============================================================================

async fn run_review_command(args: ReviewArgs, mut config: ReviewerConfig) -> anyhow::Result<()> {
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(work_root) = &args.work_root {
        config.work_root = work_root.clone();
    }
    if args.api_key.is_some() {
        config.openrouter_api_key = args.api_key.clone();
    }
    config.validate()?;

    let input = review_input(&args)?;
    init_metrics().context("Failed to register metrics")?;

    let llm = build_llm_client(config.openrouter_api_key.clone(), config.model.clone())?;
    let store = open_store(&config).await?;
    let provisioner =
        RepoProvisioner::new(config.npm_path.clone()).with_install_timeout(config.install_timeout);
    let transcripts = YoutubeTranscriptClient::new()?;

    info!(
        name = %input.name,
        repo = %input.repo_url_or_shorthand,
        model = %config.model,
        work_root = %config.work_root.display(),
        "Starting review"
    );

    let workflow = ReviewWorkflow::new(
        config,
        store,
        Arc::new(provisioner),
        Arc::new(transcripts),
        Arc::new(MastraConnector),
        llm,
    );

    // Dropping the review future on a signal kills the project's server.
    let outcome = tokio::select! {
        result = workflow.run(input) => Some(result),
        _ = shutdown_signal() => None,
    };

    if let Some(path) = &args.metrics_out {
        fs::write(path, export_metrics())
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    let output = match outcome {
        Some(result) => result?,
        None => {
            warn!("Review interrupted");
            anyhow::bail!("Review interrupted by signal");
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report(&output);
    }
    Ok(())
}

/// Workflow input from `--input` or from individual flags.
fn review_input(args: &ReviewArgs) -> anyhow::Result<ReviewInput> {
    let mut input = match &args.input {
        Some(path) => load_review_input(path)?,
        None => ReviewInput {
            name: args.name.clone().unwrap_or_default(),
            repo_url_or_shorthand: args.repo.clone().unwrap_or_default(),
            description: String::new(),
            video_url: args.video_url.clone().unwrap_or_default(),
            env_config: BTreeMap::new(),
            port: None,
        },
    };

    if let Some(description) = &args.description {
        input.description = description.clone();
    }
    input.env_config.extend(args.env.iter().cloned());
    if args.port.is_some() {
        input.port = args.port;
    }
    Ok(input)
}

fn load_review_input(path: &Path) -> anyhow::Result<ReviewInput> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read review input {}", path.display()))?;
    let is_json = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));

    let input = if is_json {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };
    Ok(input)
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{}`", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn print_report(output: &ReviewOutput) {
    let project = &output.project;
    let scores = &output.scores;

    println!("\n=== {} ({}) ===", project.name, project.id);
    println!("Repository: {}", project.repo_url);
    println!("Status:     {}", project.status);
    println!();
    println!(
        "Description quality: {}/5  {}",
        scores.description_quality.score, scores.description_quality.explanation
    );
    println!("Appeal:              {}/5  {}", scores.appeal.score, scores.appeal.explanation);
    println!(
        "Creativity:          {}/5  {}",
        scores.creativity.score, scores.creativity.explanation
    );
    println!(
        "Architecture:        {} agents, {} tools, {} workflows",
        scores.architecture.agents.count,
        scores.architecture.tools.count,
        scores.architecture.workflows.count
    );
    println!();
    println!("Tests:");
    for test in &scores.tests {
        let mark = if test.passed { "PASS" } else { "FAIL" };
        println!("  [{}] {}: {}", mark, test.id, test.explanation);
    }
    if !scores.tags.is_empty() {
        println!();
        println!("Tags: {}", scores.tags.join(", "));
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ============================================================================
// Store commands
// ============================================================================

async fn open_store(config: &ReviewerConfig) -> anyhow::Result<Arc<dyn ProjectStore>> {
    let path = config.database_path.to_string_lossy();
    let store = SqliteProjectStore::open(&path)
        .await
        .with_context(|| format!("Failed to open project store {}", path))?;
    Ok(Arc::new(store))
}

async fn run_list_command(args: ListArgs, config: ReviewerConfig) -> anyhow::Result<()> {
    let store = open_store(&config).await?;

    let mut filter = ProjectFilter::new();
    if let Some(id) = args.id {
        filter = filter.with_id(id);
    }
    if let Some(status) = args.status {
        filter = filter.with_status(status);
    }
    if let Some(name) = args.name {
        filter = filter.with_name(name);
    }
    if let Some(repo_url) = args.repo_url {
        filter = filter.with_repo_url(repo_url);
    }

    let projects = store.list(&filter).await?;
    if args.json {
        let dtos: Vec<_> = projects.iter().map(Project::to_dto).collect();
        println!("{}", serde_json::to_string_pretty(&dtos)?);
        return Ok(());
    }

    if projects.is_empty() {
        println!("No projects found.");
        return Ok(());
    }
    for project in &projects {
        println!(
            "{}  {:<11} {:<24} {}",
            project.id(),
            project.status,
            project.name,
            project.repo_url
        );
    }
    Ok(())
}

async fn run_archive_command(args: ArchiveArgs, config: ReviewerConfig) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let project = store
        .list(&ProjectFilter::new().with_id(args.id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No project with id {}", args.id))?;

    let archived = project.archive();
    store.save(&archived).await?;
    info!(project_id = %args.id, previous = %project.status, "Project archived");
    println!("Archived {} ({})", archived.name, args.id);
    Ok(())
}

fn run_analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    if !args.dir.is_dir() {
        anyhow::bail!("{} is not a directory", args.dir.display());
    }
    let stats = analysis::analyze(&args.dir);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

// ============================================================================
// LLM client
// ============================================================================

/// OpenRouter when a key is available, otherwise a LiteLLM proxy from the
/// environment.
pub fn build_llm_client(
    api_key: Option<String>,
    model: String,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let resolved_api_key = api_key
        .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
        .or_else(|| std::env::var("LITELLM_API_KEY").ok());

    if let Some(key) = resolved_api_key {
        info!(model = %model, "Using OpenRouter with specified API key");
        Ok(Arc::new(OpenRouterProvider::with_model(key, model)?))
    } else {
        info!("Using LiteLLM client from environment");
        Ok(Arc::new(LiteLlmClient::from_env().map_err(|e| {
            anyhow::anyhow!(
                "Failed to initialize LLM client: {}. Please provide --api-key or set OPENROUTER_API_KEY/LITELLM_API_KEY env var.",
                e
            )
        })?))
    }
}
