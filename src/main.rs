//! Sumi-Loom main entry point
//!
//! This is the command-line interface for the Sumi-Loom crawl orchestrator.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use sumi_loom::config::{load_config_with_hash, Config};
use sumi_loom::crawler::run_crawl;
use sumi_loom::output::{load_statistics, print_dead_letters, print_statistics};
use sumi_loom::storage::{SqliteStore, StateStore};
use tracing_subscriber::EnvFilter;

/// Sumi-Loom: crawl orchestration with per-origin politeness
///
/// Sumi-Loom schedules crawl tasks under concurrency and per-origin rate
/// limits, retries transient failures, dead-letters permanent ones, and
/// journals its state so an interrupted run can resume.
#[derive(Parser, Debug)]
#[command(name = "sumi-loom")]
#[command(version = "1.0.0")]
#[command(about = "Polite, recoverable crawl orchestration", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume an interrupted run (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh run, discarding stored state
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show the run plan without crawling
    #[arg(long, conflicts_with_all = ["stats", "dead_letters"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "dead_letters"])]
    stats: bool,

    /// List dead-lettered tasks and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    dead_letters: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.dead_letters {
        handle_dead_letters(&config)?;
    } else {
        handle_crawl(config, &config_hash, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_loom=info,warn"),
            1 => EnvFilter::new("sumi_loom=debug,info"),
            2 => EnvFilter::new("sumi_loom=trace,debug"),
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

/// Handles the --dry-run mode: shows the validated run plan
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Loom Dry Run ===\n");

    let scheduler = &config.scheduler;
    println!("Scheduler:");
    println!("  Runner: {:?} ({} workers)", scheduler.runner, scheduler.workers);
    println!("  Max in flight: {}", scheduler.max_in_flight);
    println!("  Frontier: {:?}", scheduler.frontier);
    println!("  Retry drain batch: {}", scheduler.retry_drain_batch);
    println!("  Max park: {}ms", scheduler.max_park_ms);
    println!("  Snapshot every: {} tasks", scheduler.snapshot_every);
    match scheduler.max_depth {
        Some(depth) => println!("  Max depth: {}", depth),
        None => println!("  Max depth: unlimited"),
    }

    println!("\nPoliteness:");
    println!(
        "  {}ms between requests per {:?}",
        config.politeness.interval_ms, config.politeness.key
    );

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {}ms x{} up to {}ms",
        config.retry.base_delay_ms, config.retry.multiplier, config.retry.max_delay_ms
    );

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        match &seed.hint {
            Some(hint) => println!("  - {} [{}] priority {}", seed.url, hint, seed.priority),
            None => println!("  - {} priority {}", seed.url, seed.priority),
        }
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would start crawling with {} seed URLs", config.seeds.len());
}

fn open_store(config: &Config) -> anyhow::Result<SqliteStore> {
    println!("Database: {}\n", config.output.database_path);
    SqliteStore::open(Path::new(&config.output.database_path))
        .with_context(|| format!("opening {}", config.output.database_path))
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let stats = load_statistics(&store)?;
    print_statistics(&stats);
    Ok(())
}

/// Handles the --dead-letters mode: lists dead-lettered tasks
fn handle_dead_letters(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let entries = store.dead_letters()?;
    print_dead_letters(&entries);
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh run (discarding stored state)");
    } else {
        tracing::info!("Starting run (will resume stored state if any)");
    }
    tracing::info!("Total seed URLs: {}", config.seeds.len());

    let database_path = config.output.database_path.clone();
    let summary = match run_crawl(config, config_hash, fresh).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Crawl {} in {:?}", summary.status.to_db_string(), summary.elapsed);

    let store = SqliteStore::open(Path::new(&database_path))?;
    let stats = load_statistics(&store)?.with_summary(summary);
    print_statistics(&stats);

    Ok(())
}
