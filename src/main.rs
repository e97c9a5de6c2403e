//! Sumi-Tide main entry point
//!
//! This is the command-line interface for the Sumi-Tide site crawler.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use sumi_tide::checkpoint::{inspect_checkpoint, StartMode};
use sumi_tide::config::{load_config_with_fingerprint, Config};
use sumi_tide::output::{format_checkpoint_stats, format_run_summary};
use sumi_tide::runner::{run, RunOptions};
use tracing_subscriber::EnvFilter;

/// Sumi-Tide: a polite, resumable site crawler
///
/// Sumi-Tide mirrors a website as HTML snapshots while respecting robots.txt,
/// per-host concurrency limits and a request rate budget. Progress is
/// checkpointed so an interrupted crawl picks up where it left off.
#[derive(Parser, Debug)]
#[command(name = "sumi-tide")]
#[command(version = "1.0.0")]
#[command(about = "A polite, resumable site crawler", long_about = None)]
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

    /// Resume an interrupted crawl (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh crawl, discarding the existing checkpoint
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show the stored checkpoint and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, fingerprint) = load_config_with_fingerprint(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (fingerprint: {})", fingerprint);

    if cli.dry_run {
        handle_dry_run(&config, &fingerprint);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        let mode = if cli.fresh {
            StartMode::Fresh
        } else {
            StartMode::Resume
        };
        handle_crawl(config, mode).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_tide=info,warn"),
            1 => EnvFilter::new("sumi_tide=debug,info"),
            2 => EnvFilter::new("sumi_tide=trace,debug"),
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

/// Handles the --dry-run mode: shows the validated configuration
fn handle_dry_run(config: &Config, fingerprint: &str) {
    let crawler = &config.crawler;

    println!("=== Sumi-Tide Dry Run ===\n");
    println!("Crawl: {}", config.name);
    println!("Fingerprint: {}", fingerprint);

    println!("\nStart URLs ({}):", config.site.start_urls.len());
    for url in &config.site.start_urls {
        println!("  - {}", url);
    }
    println!("\nAllowed Domains ({}):", config.site.allowed_domains.len());
    for domain in &config.site.allowed_domains {
        println!("  - {}", domain);
    }

    println!("\nCrawler Configuration:");
    println!("  Global concurrency: {}", crawler.global_concurrency);
    println!("  Per-host concurrency: {}", crawler.per_host_concurrency);
    println!(
        "  Rate: {} req/s (burst {})",
        crawler.requests_per_second, crawler.burst
    );
    if crawler.adaptive.enabled {
        println!(
            "  Adaptive rate: {} to {} req/s",
            crawler.adaptive.min_rate, crawler.adaptive.max_rate
        );
    }
    println!("  Max retries: {}", crawler.max_retries);
    println!("  Respect robots.txt: {}", crawler.respect_robots_txt);
    println!("  Fetch strategy: {:?}", crawler.fetch_strategy);
    if let Some(max_pages) = crawler.max_pages {
        println!("  Max pages: {}", max_pages);
    }
    if let Some(secs) = crawler.max_duration_secs {
        println!("  Max duration: {}s", secs);
    }
    if let Some(depth) = crawler.depth_limit {
        println!("  Depth limit: {}", depth);
    }
    println!(
        "  Path rules: {} include, {} exclude",
        crawler.include.len(),
        crawler.exclude.len()
    );

    println!("\nUser Agent: {}", config.user_agent.header_value());

    println!("\nCheckpoint:");
    if config.checkpoint.enabled {
        println!(
            "  {} ({:?})",
            config.checkpoint.path.display(),
            config.checkpoint.backend_kind()
        );
    } else {
        println!("  disabled");
    }

    println!("\nPipeline:");
    println!("  Workers: {}", config.pipeline.workers);
    println!(
        "  Queue: {} items / {} MB",
        config.pipeline.queue_max_items, config.pipeline.queue_max_memory_mb
    );
    println!("\nOutput: {}", config.output.directory.display());

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows the stored checkpoint
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Checkpoint: {}\n", config.checkpoint.path.display());

    let inspected = inspect_checkpoint(config).with_context(|| {
        format!(
            "failed to read checkpoint {}",
            config.checkpoint.path.display()
        )
    })?;
    match inspected {
        Some((metadata, page_count)) => print!("{}", format_checkpoint_stats(&metadata, page_count)),
        None => println!("No checkpoint found"),
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, mode: StartMode) -> anyhow::Result<()> {
    match mode {
        StartMode::Fresh => tracing::info!("Starting fresh crawl (discarding previous state)"),
        StartMode::Resume => {
            tracing::info!("Starting crawl (will resume if a checkpoint exists)")
        }
    }
    tracing::info!(
        "Start URLs: {}, allowed domains: {}",
        config.site.start_urls.len(),
        config.site.allowed_domains.len()
    );

    let options = RunOptions {
        start_mode: mode,
        handle_interrupt: true,
        ..RunOptions::default()
    };
    let summary = run(config, options).await.context("crawl failed")?;

    print!("{}", format_run_summary(&summary));
    Ok(())
}
