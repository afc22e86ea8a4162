//! Source Sentinel main entry point
//!
//! This is the command-line interface for the Source Sentinel content pipeline.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use source_sentinel::config::{load_config_with_hash, Config};
use source_sentinel::storage::{open_storage, RunStore, SourceRegistry};
use source_sentinel::{
    PipelineRunResult, PipelineRunner, RunOptions, ScopeKind, SourceMonitoringRecord,
    UpdateFrequency,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Source Sentinel: a polite content pipeline
///
/// Source Sentinel keeps a local copy of monitored web sources fresh. It
/// checks sources for changes using cheap conditional requests first, and
/// crawls new or changed sources within robots.txt rules and per-domain
/// rate limits.
#[derive(Parser, Debug)]
#[command(name = "source-sentinel")]
#[command(version)]
#[command(about = "A polite content pipeline for monitored web sources", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (built-in defaults when omitted)
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Override the database path from the configuration
    #[arg(long, value_name = "PATH", global = true)]
    database: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    /// Print run results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check due sources for changes without acquiring them
    Check {
        /// Maximum number of sources to check
        #[arg(long)]
        max_sources: Option<usize>,
    },

    /// Acquire new sources and sources flagged as changed
    Acquire {
        /// Maximum number of sources to acquire
        #[arg(long)]
        max_sources: Option<usize>,

        /// Acquire only this source id, ignoring flags and backoff
        #[arg(long, value_name = "ID")]
        source: Option<String>,
    },

    /// Full run: initial acquisitions, checks, and acquisition of changes
    Run {
        /// Maximum number of sources to process
        #[arg(long)]
        max_sources: Option<usize>,

        /// Maximum requests per domain in this run
        #[arg(long)]
        max_per_domain: Option<u32>,

        /// Minimum time between requests to one domain (milliseconds)
        #[arg(long, value_name = "MS")]
        min_interval_ms: Option<u64>,

        /// Decide and log what would be done without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Register a source for monitoring
    AddSource {
        /// Source URL
        url: String,

        /// Crawl scope: path, host or domain
        #[arg(long, default_value = "path")]
        scope: ScopeKind,

        /// Update frequency: frequent, daily, weekly, monthly or unknown
        #[arg(long, default_value = "daily")]
        frequency: UpdateFrequency,

        /// Page cap for crawls of this source
        #[arg(long)]
        max_pages: Option<u32>,

        /// Depth cap for crawls of this source
        #[arg(long)]
        max_depth: Option<u32>,

        /// Retrieve only the source URL itself instead of crawling
        #[arg(long)]
        no_crawl: bool,
    },

    /// Show registry and run statistics
    Stats {
        /// Number of recent runs to list
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let (config, config_hash) = load(cli.config.as_deref())?;
    let database = cli
        .database
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.storage.database_path));

    match cli.command {
        Command::Check { max_sources } => {
            let runner = build_runner(config, config_hash, &database)?;
            let result = runner.check(max_sources).await?;
            report(&result, cli.json)?;
        }
        Command::Acquire {
            max_sources,
            source,
        } => {
            let runner = build_runner(config, config_hash, &database)?;
            let result = runner.acquire(max_sources, source.as_deref()).await?;
            report(&result, cli.json)?;
        }
        Command::Run {
            max_sources,
            max_per_domain,
            min_interval_ms,
            dry_run,
        } => {
            let runner = build_runner(config, config_hash, &database)?;
            let options = RunOptions {
                max_sources,
                max_per_domain,
                min_interval: min_interval_ms.map(Duration::from_millis),
                dry_run,
            };
            let result = runner.run(options).await?;
            report(&result, cli.json)?;
        }
        Command::AddSource {
            url,
            scope,
            frequency,
            max_pages,
            max_depth,
            no_crawl,
        } => {
            let mut record = SourceMonitoringRecord::new(
                &url,
                scope,
                frequency,
                max_pages.unwrap_or(config.crawl.default_max_pages),
                max_depth.unwrap_or(config.crawl.default_max_depth),
            )
            .with_context(|| format!("Invalid source URL: {}", url))?;
            record.crawl_enabled = !no_crawl;

            let mut storage = open_storage(&database)
                .with_context(|| format!("Failed to open database {}", database.display()))?;
            if storage.add_source(&record)? {
                println!("Added {} ({})", record.url, record.id);
            } else {
                println!("Already registered: {} ({})", record.url, record.id);
            }
        }
        Command::Stats { runs } => {
            handle_stats(&database, runs)?;
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("source_sentinel=info,warn"),
            1 => EnvFilter::new("source_sentinel=debug,info"),
            2 => EnvFilter::new("source_sentinel=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Loads the configuration file, or the defaults when none is given
fn load(path: Option<&Path>) -> Result<(Config, String)> {
    match path {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            Ok((config, hash))
        }
        None => {
            tracing::debug!("No configuration file given, using defaults");
            Ok((Config::default(), "default".to_string()))
        }
    }
}

/// Opens storage and wires Ctrl-C to a graceful stop of the run
fn build_runner(config: Config, config_hash: String, database: &Path) -> Result<PipelineRunner> {
    let storage = open_storage(database)
        .with_context(|| format!("Failed to open database {}", database.display()))?;

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing the current unit of work");
            let _ = stop.send(true);
        }
    });

    Ok(PipelineRunner::new(config, config_hash, storage)?.with_shutdown(shutdown))
}

fn report(result: &PipelineRunResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!("{}", result);
    }
    Ok(())
}

/// Handles the stats command: shows registry counts and recent runs
fn handle_stats(database: &Path, runs: usize) -> Result<()> {
    println!("Database: {}\n", database.display());

    let storage = open_storage(database)
        .with_context(|| format!("Failed to open database {}", database.display()))?;
    let stats = storage.registry_stats(Utc::now())?;

    println!("Sources:");
    println!("  Total:               {}", stats.total_sources);
    println!("  Pending initial:     {}", stats.pending_initial);
    println!("  Pending acquisition: {}", stats.pending_acquisition);
    println!("  Due for check:       {}", stats.due);
    println!("  Degraded:            {}", stats.degraded);
    println!("\nCrawls:");
    println!("  In progress:         {}", stats.crawls_in_progress);
    println!("  Completed:           {}", stats.crawls_completed);

    let recent = storage.recent_runs(runs)?;
    if !recent.is_empty() {
        println!("\nRecent runs:");
        for run in recent {
            println!(
                "  #{} {} {} (started {}{})",
                run.id,
                run.mode,
                run.status.to_db_string(),
                run.started_at,
                run.finished_at
                    .map(|f| format!(", finished {}", f))
                    .unwrap_or_default()
            );
        }
    }

    Ok(())
}
