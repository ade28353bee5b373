//! # devbench-cli
//!
//! Binary entry point for devbench.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration and task-suite loading
//! - `run`, `plan` (dry run), `list-tasks`, and `check-agents`

mod progress;
mod report;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use devbench_adapters::{
    FactoryOptions, ProviderJudge, build_executors, check_agents, default_projects_root,
};
use devbench_core::{
    BenchConfig, EvaluationContext, FanoutSink, FixtureStore, JsonlSink, Orchestrator,
    ProgressSink, ResultSink, RunOptions, RunSummary, Task, TaskCatalog, TaskSuite,
};
use devbench_proto::Language;
use progress::BarSink;
use std::io::{IsTerminal, stderr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code after SIGINT/SIGTERM.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// devbench - benchmark LLMs and coding agents on software tasks
#[derive(Parser, Debug)]
#[command(name = "devbench", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "devbench.yml", global = true)]
    config: PathBuf,

    /// Path to the task suite
    #[arg(short, long, default_value = "tasks.yml", global = true)]
    suite: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute every selected combination and record the results
    Run(RunArgs),

    /// Print the execution plan without running anything
    Plan(SelectArgs),

    /// List the tasks in the suite
    ListTasks,

    /// Check that each configured CLI agent responds to --version
    CheckAgents,
}

/// Narrows the matrix and overrides run settings.
#[derive(Args, Debug, Clone, Default)]
struct SelectArgs {
    /// Task ids (comma-separated) or "all"
    #[arg(short, long, default_value = "all")]
    tasks: String,

    /// Only these executor ids (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    executors: Option<Vec<String>>,

    /// Only these languages (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    languages: Option<Vec<Language>>,

    /// Runs per combination
    #[arg(short, long)]
    runs: Option<u32>,

    /// In-flight combinations per provider
    #[arg(long)]
    concurrency: Option<usize>,

    /// Global cap on retry turns
    #[arg(long)]
    max_turns: Option<u32>,

    /// Fixtures directory
    #[arg(long)]
    fixtures_dir: Option<PathBuf>,
}

impl SelectArgs {
    fn apply(&self, config: &mut BenchConfig) {
        if let Some(languages) = &self.languages {
            config.run.languages = languages.clone();
        }
        if let Some(runs) = self.runs {
            config.run.runs_per_combo = runs;
        }
        if let Some(concurrency) = self.concurrency {
            config.run.max_concurrent = concurrency;
        }
        if let Some(max_turns) = self.max_turns {
            config.run.max_turns = Some(max_turns);
        }
        if let Some(dir) = &self.fixtures_dir {
            config.run.fixtures_dir = dir.clone();
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    select: SelectArgs,

    /// Results directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Parent directory for lifecycle project copies
    #[arg(long)]
    projects_dir: Option<PathBuf>,

    /// Log progress lines instead of drawing a progress bar
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(stderr)
        .init();

    match cli.command {
        Commands::Run(args) => run_command(&cli.config, &cli.suite, args).await,
        Commands::Plan(select) => plan_command(&cli.config, &cli.suite, &select),
        Commands::ListTasks => list_tasks_command(&cli.config, &cli.suite),
        Commands::CheckAgents => check_agents_command(&cli.config).await,
    }
}

fn load_config(path: &Path, select: &SelectArgs) -> Result<BenchConfig> {
    let mut config = BenchConfig::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.apply_env_overrides();
    select.apply(&mut config);

    let warnings = config.validate().context("Configuration validation failed")?;
    for warning in &warnings {
        eprintln!("{warning}");
    }
    Ok(config)
}

fn load_catalog(config: &BenchConfig, suite_path: &Path) -> Result<TaskCatalog> {
    let judge = ProviderJudge::from_config(&config.judge)?;
    let ctx = EvaluationContext::new(
        FixtureStore::new(&config.run.fixtures_dir),
        Arc::new(judge),
    );
    let suite = TaskSuite::from_file(suite_path)
        .with_context(|| format!("Failed to load task suite from {}", suite_path.display()))?;
    suite
        .into_catalog(Arc::new(ctx))
        .context("Failed to build the task catalog")
}

fn build_orchestrator(
    config: &BenchConfig,
    select: &SelectArgs,
    projects_root: PathBuf,
) -> Result<Orchestrator> {
    let options = FactoryOptions {
        projects_root,
        only: select.executors.clone(),
    };
    let executors = build_executors(config, &options)?;
    let orchestrator = Orchestrator::new(
        executors,
        FixtureStore::new(&config.run.fixtures_dir),
        RunOptions::from(&config.run),
    )?;
    Ok(orchestrator)
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Could not register SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn run_command(config_path: &Path, suite_path: &Path, args: RunArgs) -> Result<()> {
    let mut config = load_config(config_path, &args.select)?;
    if let Some(dir) = &args.output_dir {
        config.run.output_dir = dir.clone();
    }

    let catalog = load_catalog(&config, suite_path)?;
    let tasks = catalog.resolve(&args.select.tasks)?;
    let projects_root = args.projects_dir.clone().unwrap_or_else(default_projects_root);
    let orchestrator = build_orchestrator(&config, &args.select, projects_root)?;

    let jsonl = Arc::new(JsonlSink::create_in(&config.run.output_dir).with_context(|| {
        format!(
            "Failed to create results file in {}",
            config.run.output_dir.display()
        )
    })?);
    info!(path = %jsonl.path().display(), "Writing results");

    let bar = (!args.no_progress && stderr().is_terminal()).then(|| Arc::new(BarSink::new()));
    let mut sinks: Vec<Arc<dyn ResultSink>> = vec![jsonl.clone() as Arc<dyn ResultSink>];
    match &bar {
        Some(bar) => sinks.push(bar.clone()),
        None => sinks.push(Arc::new(ProgressSink::new())),
    }
    let sink = FanoutSink::new(sinks);

    let outcome = tokio::select! {
        outcome = orchestrator.run(&tasks, &sink) => Some(outcome),
        () = shutdown_signal() => None,
    };
    if let Some(bar) = &bar {
        bar.finish();
    }

    let Some(outcome) = outcome else {
        warn!(
            path = %jsonl.path().display(),
            "Interrupted; results recorded so far are kept"
        );
        std::process::exit(INTERRUPTED_EXIT_CODE);
    };
    let results = outcome?;

    print!("{}", report::render_summary(&RunSummary::from_results(&results)));
    println!("Results written to {}", jsonl.path().display());
    Ok(())
}

fn plan_command(config_path: &Path, suite_path: &Path, select: &SelectArgs) -> Result<()> {
    let config = load_config(config_path, select)?;
    let catalog = load_catalog(&config, suite_path)?;
    let tasks = catalog.resolve(&select.tasks)?;
    let orchestrator = build_orchestrator(&config, select, default_projects_root())?;

    let plan = orchestrator.plan(&tasks);
    if plan.is_empty() {
        anyhow::bail!("Nothing to run: no selected task supports the selected languages");
    }
    print!("{}", report::render_plan(&plan));
    Ok(())
}

fn list_tasks_command(config_path: &Path, suite_path: &Path) -> Result<()> {
    let config = load_config(config_path, &SelectArgs::default())?;
    let catalog = load_catalog(&config, suite_path)?;
    let tasks: Vec<Arc<dyn Task>> = catalog.iter().cloned().collect();
    print!("{}", report::render_tasks(&tasks));
    Ok(())
}

async fn check_agents_command(config_path: &Path) -> Result<()> {
    let config = load_config(config_path, &SelectArgs::default())?;
    if config.agents.is_empty() {
        println!("No agents configured in {}", config_path.display());
        return Ok(());
    }

    let results = check_agents(&config.agents).await;
    for availability in &results {
        println!("{availability}");
    }

    let missing = results.iter().filter(|a| !a.is_available()).count();
    if missing > 0 {
        anyhow::bail!("{missing} of {} agent(s) unavailable", results.len());
    }
    Ok(())
}
