//! SuperCI - comment-triggered CI for batch-scheduled clusters
//!
//! The `superci` command is meant to run from cron. Each invocation performs
//! one poll cycle over the configured repository and exits.
//!
//! ## Commands
//!
//! - `poll` (default): build every pull request whose latest commit has a
//!   fresh trigger comment and no ledger entry
//! - `history`: print the run ledger

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use superci_core::{
    scheduler, BuildPipeline, Config, GitCheckout, HostingService, RunLedger, RunLogEntry,
    Scheduler, SourceCheckout, StatusReporter, StepCompiler, StepRunner, TriggerScanner,
    WorkspaceManager,
};
use superci_github::GitHubClient;
use superci_state::FileRunLedger;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "superci")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Comment-triggered CI for Slurm clusters", long_about = None)]
struct Cli {
    /// Path to the YAML configuration
    #[arg(short, long, default_value = "demos/armory.yml", env = "SUPERCI_CONFIG")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run one poll cycle (default)
    Poll,

    /// Show recorded runs for the configured repository
    History {
        /// Show only the most recent N entries
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;

    let log_dir = config.config.ledger_root();
    if let Err(e) = superci_core::init_tracing(cli.json, level, Some(&log_dir)) {
        superci_core::init_tracing(cli.json, level, None)?;
        warn!(log_dir = %log_dir.display(), error = %e, "Persistent log unavailable; console only");
    }

    match cli.command.unwrap_or(Commands::Poll) {
        Commands::Poll => cmd_poll(&config).await,
        Commands::History { limit } => cmd_history(&config, limit).await,
    }
}

/// Wire the pipeline from configuration and the injected seams.
fn build_scanner(
    config: &Config,
    hosting: Arc<dyn HostingService>,
    ledger: Arc<dyn RunLedger>,
    checkout: Arc<dyn SourceCheckout>,
    scheduler: Arc<dyn Scheduler>,
) -> TriggerScanner {
    let ci = &config.config;
    let reporter =
        StatusReporter::new(hosting.clone(), ci.context.clone()).with_target_url(ci.target_url.clone());
    let pipeline = BuildPipeline::new(
        ci.repository.clone(),
        WorkspaceManager::new(&ci.workspace_root, ci.workspace_policy),
        checkout,
        config.step_source(),
        StepCompiler::new(ci.empty_steps),
        StepRunner::new(scheduler),
        reporter,
    );
    TriggerScanner::new(ci.branch.clone(), ci.trigger.clone(), hosting, ledger, pipeline)
}

/// One poll cycle against GitHub.
async fn cmd_poll(config: &Config) -> Result<()> {
    let ci = &config.config;
    let token = ci.read_token().context("Failed to load GitHub access token")?;
    let hosting: Arc<dyn HostingService> = Arc::new(
        GitHubClient::new(&ci.api_url, &token, ci.repository.clone())
            .context("Failed to create GitHub client")?,
    );
    let ledger: Arc<dyn RunLedger> = Arc::new(FileRunLedger::new(ci.ledger_root()));
    let scheduler: Arc<dyn Scheduler> = Arc::from(scheduler::from_kind(ci.scheduler));

    info!(
        repository = %ci.repository,
        branch = %ci.branch,
        scheduler = scheduler.name(),
        ledger = %ci.ledger_root().display(),
        "Starting poll cycle"
    );

    let scanner = build_scanner(config, hosting, ledger, Arc::new(GitCheckout::new()), scheduler);
    let summary = scanner
        .poll()
        .await
        .context("Failed to list open pull requests")?;

    info!(
        pulls = summary.pulls,
        triggered = summary.triggered,
        failed_builds = summary.failed_builds,
        skipped = summary.skipped,
        awaiting = summary.awaiting,
        deferred = summary.deferred,
        errors = summary.errors,
        "Poll cycle complete"
    );
    Ok(())
}

/// Print the run ledger, oldest first.
async fn cmd_history(config: &Config, limit: Option<usize>) -> Result<()> {
    let ci = &config.config;
    let entries = read_history(&ci.ledger_root(), config, limit).await?;

    if entries.is_empty() {
        println!("No runs recorded for {}", ci.repository);
        return Ok(());
    }
    for entry in &entries {
        println!("{}", format_entry(entry));
    }
    Ok(())
}

async fn read_history(
    root: &Path,
    config: &Config,
    limit: Option<usize>,
) -> Result<Vec<RunLogEntry>> {
    let ledger = FileRunLedger::new(root);
    let mut entries = ledger
        .entries(&config.config.repository)
        .await
        .with_context(|| format!("Failed to read run log under {}", root.display()))?;
    if let Some(limit) = limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }
    Ok(entries)
}

fn format_entry(entry: &RunLogEntry) -> String {
    let status = match entry.aggregate_status {
        0 => "passed".to_string(),
        -1 => "config-error".to_string(),
        n => format!("failed ({n})"),
    };
    let short: String = entry.commit.chars().take(7).collect();
    format!(
        "{}  {}  {:<12}  {}",
        short,
        entry.datetime.format("%Y-%m-%d %H:%M:%S UTC"),
        status,
        entry.branch
    )
}
