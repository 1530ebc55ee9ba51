//! Spindrift main entry point
//!
//! This is the command-line interface for the Spindrift scraping core.

use anyhow::Context;
use clap::Parser;
use spindrift::config::load_config_with_hash;
use spindrift::sink::{JsonlSink, NullSink, ResultSink};
use spindrift::{Coordinator, HttpBrowser};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Spindrift: a browser-automation scraping core
///
/// Spindrift drives a set of targets through a bounded pool of browser
/// sessions, retrying transient navigation failures and evaluating
/// extraction rules against each loaded page. Outcomes are appended to a
/// JSON-lines file and summarized at the end of the run.
#[derive(Parser, Debug)]
#[command(name = "spindrift")]
#[command(version = "0.3.0")]
#[command(about = "A browser-automation scraping core", long_about = None)]
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

    /// Validate config and show what would be scraped without navigating
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config)?;
    } else {
        handle_scrape(config, config_hash).await?;
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
            0 => EnvFilter::new("spindrift=info,warn"),
            1 => EnvFilter::new("spindrift=debug,info"),
            2 => EnvFilter::new("spindrift=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows what would run
fn handle_dry_run(config: &spindrift::Config) -> anyhow::Result<()> {
    println!("=== Spindrift Dry Run ===\n");

    println!("Run Configuration:");
    println!("  Concurrency: {}", config.run.concurrency);
    match config.run.rate_limit_starts {
        Some(starts) => println!(
            "  Rate limit: {} starts per {}ms",
            starts, config.run.rate_limit_window_ms
        ),
        None => println!("  Rate limit: none"),
    }
    println!("  Ordered outcomes: {}", config.run.ordered_outcomes);
    println!("  Max queue wait: {}ms", config.run.max_queue_wait_ms);

    println!("\nSession Pool:");
    println!("  Max sessions: {}", config.pool.max_sessions);
    println!("  Max uses per session: {}", config.pool.max_session_uses);
    println!("  Max session age: {}ms", config.pool.max_session_age_ms);

    println!("\nNavigator:");
    println!(
        "  Backoff: {}ms base, {}ms cap",
        config.navigator.base_backoff_ms, config.navigator.max_backoff_ms
    );
    println!("  Default timeout: {}ms", config.navigator.default_timeout_ms);
    println!(
        "  Default retry budget: {}",
        config.navigator.default_retry_budget
    );

    println!("\nSink:");
    match &config.sink.records_path {
        Some(path) => println!("  Records: {}", path),
        None => println!("  Records: discarded (no records-path)"),
    }

    println!("\nTargets ({}):", config.targets.len());
    for entry in &config.targets {
        println!("  - {} ({} rules)", entry.id, entry.rules.len());
        println!("    * {}", entry.url);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would scrape {} targets", config.targets.len());

    Ok(())
}

/// Handles the main scrape operation
async fn handle_scrape(
    config: spindrift::Config,
    config_hash: String,
) -> anyhow::Result<()> {
    let targets = config.build_targets()?;
    tracing::info!(
        "Scraping {} targets with concurrency {}",
        targets.len(),
        config.run.concurrency
    );

    let browser = Arc::new(HttpBrowser::new(&config.browser).context("building HTTP browser")?);
    let sink: Arc<dyn ResultSink> = match &config.sink.records_path {
        Some(path) => Arc::new(
            JsonlSink::open(std::path::Path::new(path))
                .with_context(|| format!("opening records file {}", path))?,
        ),
        None => Arc::new(NullSink),
    };

    let coordinator =
        Arc::new(Coordinator::new(browser, sink, &config)?.with_config_hash(config_hash));
    let mut run = coordinator.run(targets);

    // First Ctrl-C cancels cooperatively; the run still settles every
    // target before the summary prints.
    {
        let cancel = run.cancel_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    while let Some(outcome) = run.next().await {
        tracing::debug!(
            "Outcome for {}: {:?} after {} attempt(s)",
            outcome.target,
            outcome.status.kind(),
            outcome.attempts
        );
    }

    let summary = run.finish().await;
    coordinator.shutdown().await;

    print!("{}", summary.render());

    if summary.failed > 0 {
        tracing::warn!("{} of {} targets failed", summary.failed, summary.total);
    } else {
        tracing::info!("Run completed successfully");
    }

    Ok(())
}
