//! Immo-Harvest main entry point
//!
//! Command-line harness for the three pipeline stages. Each subcommand is one
//! invocation: it receives a bounded batch of work, runs the stage, then
//! deletes completed messages and releases reported failures for redelivery.

use anyhow::Context;
use clap::{Parser, Subcommand};
use immo_harvest::config::{load_config_with_hash, Config};
use immo_harvest::fetch::DirectEgress;
use immo_harvest::pipeline::{Budget, DiscoveryWorker, Dispatcher, ExtractorWorker, FailureReport};
use immo_harvest::queue::{BatchQueue, QueueMessage, SqliteQueue};
use immo_harvest::store::{FsBlobStore, SqliteWatermarkStore};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Immo-Harvest: an incremental real-estate listing harvester
#[derive(Parser, Debug)]
#[command(name = "immo-harvest")]
#[command(version = "1.0.0")]
#[command(about = "Incremental listing harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plan the page range for every category and enqueue page batches
    Dispatch,

    /// Consume page batches and discover newly appeared listing ids
    Discover {
        /// Maximum messages to receive in this invocation
        #[arg(long, default_value_t = 10)]
        max_messages: usize,
    },

    /// Consume id batches and persist full detail records
    Extract {
        /// Maximum messages to receive in this invocation
        #[arg(long, default_value_t = 10)]
        max_messages: usize,
    },

    /// Dispatch, then drain both queues locally end to end
    Run,

    /// Show stored watermarks and queue depths
    Status,

    /// Validate config and show what would be harvested without fetching
    DryRun,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Dispatch => handle_dispatch(&config).await?,
        Command::Discover { max_messages } => handle_discover(&config, max_messages).await?,
        Command::Extract { max_messages } => handle_extract(&config, max_messages).await?,
        Command::Run => handle_run(&config).await?,
        Command::Status => handle_status(&config)?,
        Command::DryRun => handle_dry_run(&config),
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
            0 => EnvFilter::new("immo_harvest=info,warn"),
            1 => EnvFilter::new("immo_harvest=debug,info"),
            2 => EnvFilter::new("immo_harvest=trace,debug"),
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

fn open_queue(config: &Config) -> anyhow::Result<SqliteQueue> {
    SqliteQueue::open(Path::new(&config.storage.database_path))
        .context("failed to open queue database")
}

fn open_watermarks(config: &Config) -> anyhow::Result<SqliteWatermarkStore> {
    SqliteWatermarkStore::open(Path::new(&config.storage.database_path))
        .context("failed to open watermark database")
}

/// Handles the dispatch stage
async fn handle_dispatch(config: &Config) -> anyhow::Result<()> {
    let queue = open_queue(config)?;
    let rotation = DirectEgress::new();
    let budget = Budget::from_config(&config.budget);

    let dispatcher = Dispatcher::new(config, &queue, &rotation);
    let summary = dispatcher.run(&budget).await?;

    println!(
        "Dispatched {} categories ({} messages, {} skipped)",
        summary.categories_dispatched, summary.messages_sent, summary.categories_skipped
    );
    Ok(())
}

/// Handles the discovery stage for one bounded invocation
async fn handle_discover(config: &Config, max_messages: usize) -> anyhow::Result<()> {
    let queue = open_queue(config)?;
    let watermarks = open_watermarks(config)?;
    let blobs = FsBlobStore::new(&config.storage.blob_root);
    let rotation = DirectEgress::new();
    let budget = Budget::from_config(&config.budget);

    queue.recover_in_flight(&config.queues.page_batch_queue)?;
    let messages = queue.receive(&config.queues.page_batch_queue, max_messages)?;
    if messages.is_empty() {
        println!("No page batches waiting");
        return Ok(());
    }

    let worker = DiscoveryWorker::new(config, &queue, &blobs, &watermarks, &rotation);
    let report = worker.run(&messages, &budget).await?;

    settle(&queue, &config.queues.page_batch_queue, &messages, &report)?;
    print_outcome("discovery", messages.len(), &report);
    Ok(())
}

/// Handles the extraction stage for one bounded invocation
async fn handle_extract(config: &Config, max_messages: usize) -> anyhow::Result<()> {
    let queue = open_queue(config)?;
    let blobs = FsBlobStore::new(&config.storage.blob_root);
    let rotation = DirectEgress::new();
    let budget = Budget::from_config(&config.budget);

    queue.recover_in_flight(&config.queues.id_batch_queue)?;
    let messages = queue.receive(&config.queues.id_batch_queue, max_messages)?;
    if messages.is_empty() {
        println!("No id batches waiting");
        return Ok(());
    }

    let worker = ExtractorWorker::new(config, &blobs, &rotation);
    let report = worker.run(&messages, &budget).await?;

    settle(&queue, &config.queues.id_batch_queue, &messages, &report)?;
    print_outcome("extraction", messages.len(), &report);
    Ok(())
}

/// Handles the full local pipeline: dispatch, then drain both queues
///
/// Messages failed in a drain pass are released and picked up again by the
/// next pass; a pass that fails everything it receives stops the drain so a
/// dead upstream cannot spin forever.
async fn handle_run(config: &Config) -> anyhow::Result<()> {
    handle_dispatch(config).await?;

    let queue = open_queue(config)?;
    let watermarks = open_watermarks(config)?;
    let blobs = FsBlobStore::new(&config.storage.blob_root);
    let rotation = DirectEgress::new();
    let budget = Budget::from_config(&config.budget);

    queue.recover_in_flight(&config.queues.page_batch_queue)?;
    queue.recover_in_flight(&config.queues.id_batch_queue)?;

    loop {
        let messages = queue.receive(&config.queues.page_batch_queue, 10)?;
        if messages.is_empty() {
            break;
        }
        let worker = DiscoveryWorker::new(config, &queue, &blobs, &watermarks, &rotation);
        let report = worker.run(&messages, &budget).await?;
        settle(&queue, &config.queues.page_batch_queue, &messages, &report)?;
        if report.len() == messages.len() {
            anyhow::bail!("discovery failed an entire batch, aborting drain");
        }
    }

    loop {
        let messages = queue.receive(&config.queues.id_batch_queue, 10)?;
        if messages.is_empty() {
            break;
        }
        let worker = ExtractorWorker::new(config, &blobs, &rotation);
        let report = worker.run(&messages, &budget).await?;
        settle(&queue, &config.queues.id_batch_queue, &messages, &report)?;
        if report.len() == messages.len() {
            anyhow::bail!("extraction failed an entire batch, aborting drain");
        }
    }

    println!("Pipeline drained");
    Ok(())
}

/// Handles the status mode: watermarks and queue depths
fn handle_status(config: &Config) -> anyhow::Result<()> {
    let queue = open_queue(config)?;
    let watermarks = open_watermarks(config)?;

    println!("Database: {}\n", config.storage.database_path);

    println!("Watermarks:");
    let all = watermarks.list()?;
    if all.is_empty() {
        println!("  (none)");
    }
    for (key, value) in all {
        println!("  {} = {}", key, value);
    }

    println!("\nQueue depths:");
    println!(
        "  {} = {}",
        config.queues.page_batch_queue,
        queue.depth(&config.queues.page_batch_queue)?
    );
    println!(
        "  {} = {}",
        config.queues.id_batch_queue,
        queue.depth(&config.queues.id_batch_queue)?
    );

    Ok(())
}

/// Handles the dry-run mode: validates config and shows what would be harvested
fn handle_dry_run(config: &Config) {
    println!("=== Immo-Harvest Dry Run ===\n");

    println!("Upstream:");
    println!("  Base URL: {}", config.upstream.base_url);
    println!("  Items per page: {}", config.upstream.items_per_page);

    println!("\nCategories ({}):", config.upstream.categories.len());
    for category in &config.upstream.categories {
        println!("  - {}", category);
    }

    println!("\nQueues:");
    println!(
        "  {} (batch size {})",
        config.queues.page_batch_queue, config.queues.page_batch_size
    );
    println!(
        "  {} (batch size {})",
        config.queues.id_batch_queue, config.queues.id_batch_size
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Blob root: {}", config.storage.blob_root);

    println!("\nFetch:");
    println!("  Egress regions: {}", config.fetch.regions.len());
    println!(
        "  Search: {} attempts, {}ms timeout",
        config.fetch.search_max_attempts, config.fetch.search_timeout_ms
    );
    println!(
        "  Detail: {} attempts, {}ms timeout",
        config.fetch.detail_max_attempts, config.fetch.detail_timeout_ms
    );

    println!("\n✓ Configuration is valid");
}

/// Deletes completed messages and releases failed ones for redelivery
fn settle(
    queue: &SqliteQueue,
    queue_name: &str,
    messages: &[QueueMessage],
    report: &FailureReport,
) -> anyhow::Result<()> {
    for message in messages {
        if report.contains(&message.id) {
            queue.release(queue_name, &message.id)?;
        } else {
            queue.delete(queue_name, &message.id)?;
        }
    }
    Ok(())
}

fn print_outcome(stage: &str, received: usize, report: &FailureReport) {
    if report.is_empty() {
        println!("{}: {} messages processed", stage, received);
    } else {
        println!(
            "{}: {} of {} messages failed and were released for redelivery",
            stage,
            report.len(),
            received
        );
    }
}
