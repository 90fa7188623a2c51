//! # Bookflow CLI (`bkf`)
//!
//! The `bkf` binary is the operational interface for the ingestion pipeline:
//! batch submission, queue processing, status inspection, and the cached
//! document access layer.
//!
//! ## Usage
//!
//! ```bash
//! bkf --config ./config/bookflow.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bkf init` | Create the SQLite database and run schema migrations |
//! | `bkf submit <locators…>` | Validate and enqueue a batch of URLs/paths |
//! | `bkf work` | Run the worker pool (`--drain` to stop when empty) |
//! | `bkf status` | Queue counters (waiting/active/completed/failed) |
//! | `bkf job <id>` | Inspect one job's attempts and last error |
//! | `bkf clear` | Drop waiting and terminal jobs |
//! | `bkf get <id>` | Availability snapshot through the cache |
//! | `bkf cache popular` | Top documents by access count |
//! | `bkf cache warmup` | Re-prime the cache for popular documents |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! bkf init --config ./config/bookflow.toml
//!
//! # Enqueue two documents for one principal
//! bkf submit ./books/moby.pdf https://example.org/kafka.epub --principal maria
//!
//! # Process everything currently queued, then exit
//! bkf work --drain
//!
//! # Poll a document's state
//! bkf get 3e2cbb3c-6d4f-4d4f-8a57-1f44b3ab20b1
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use bookflow::cache::{fetch_snapshot, CacheStore};
use bookflow::config::{load_config, Config};
use bookflow::db;
use bookflow::extract::ContentExtractor;
use bookflow::fetch::Fetcher;
use bookflow::migrate;
use bookflow::models::SubmissionStatus;
use bookflow::ocr::OcrEngine;
use bookflow::queue::IngestionQueue;
use bookflow::worker::{run_workers, PipelineContext};

/// Bookflow CLI — an asynchronous batch ingestion pipeline for documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/bookflow.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "bkf",
    about = "Bookflow — batch document ingestion: extraction, embeddings, and a hit-counted cache",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/bookflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// jobs, access_stats, audit_logs). Idempotent.
    Init,

    /// Validate and enqueue a batch of locators.
    ///
    /// Each locator (URL or file path) is checked independently; invalid
    /// ones are reported per item without aborting the rest of the batch.
    Submit {
        /// Locators to ingest: HTTP(S) URLs or local file paths.
        #[arg(required = true)]
        locators: Vec<String>,

        /// Principal (owner) recorded on the jobs and audit trail.
        #[arg(long, default_value = "cli")]
        principal: String,
    },

    /// Run the worker pool against the queue.
    Work {
        /// Exit once no waiting or active jobs remain.
        #[arg(long)]
        drain: bool,

        /// Override the configured worker count.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Show queue counters.
    Status,

    /// Inspect a single job.
    Job {
        /// Job UUID (printed by `bkf submit`).
        id: String,
    },

    /// Drop waiting and terminal jobs from the queue.
    Clear,

    /// Fetch a document's availability snapshot through the cache.
    Get {
        /// Document UUID.
        id: String,
    },

    /// Cache maintenance and popularity inspection.
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Top documents by access count, joined with their records.
    Popular {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Re-derive and cache payloads for the most popular documents.
    Warmup {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Evict one entry, independent of TTL.
    Invalidate { id: String },
    /// Counter totals and live entry count.
    Stats,
    /// Drop all live entries (hit counters are durable and survive).
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bookflow=info,bkf=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("initialized {}", config.db.path.display());
        }
        Commands::Submit { locators, principal } => {
            run_submit(&config, &locators, &principal).await?;
        }
        Commands::Work { drain, workers } => {
            run_work(config, drain, workers).await?;
        }
        Commands::Status => {
            run_status(&config).await?;
        }
        Commands::Job { id } => {
            run_job(&config, &id).await?;
        }
        Commands::Clear => {
            run_clear(&config).await?;
        }
        Commands::Get { id } => {
            run_get(&config, &id).await?;
        }
        Commands::Cache { command } => {
            run_cache(&config, command).await?;
        }
    }

    Ok(())
}

async fn run_submit(config: &Config, locators: &[String], principal: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let fetcher = Fetcher::new(config.download.timeout_secs)?;
    let queue = IngestionQueue::new(pool.clone(), config.queue.clone());

    let (report, _handles) = queue.submit(&fetcher, locators, principal).await?;

    for result in &report.results {
        match result.status {
            SubmissionStatus::Queued => println!(
                "queued   {} (job {}, document {})",
                result.locator,
                result.job_id.as_deref().unwrap_or("-"),
                result.document_id.as_deref().unwrap_or("-"),
            ),
            SubmissionStatus::Invalid => println!(
                "invalid  {} ({})",
                result.locator,
                result.error.as_deref().unwrap_or("unknown error"),
            ),
        }
    }
    println!();
    println!("total submitted: {}", report.total_submitted);
    println!("added to queue:  {}", report.admitted);
    println!("ok");

    pool.close().await;
    Ok(())
}

async fn run_work(mut config: Config, drain: bool, workers: Option<usize>) -> anyhow::Result<()> {
    if let Some(n) = workers {
        anyhow::ensure!(n > 0, "--workers must be > 0");
        config.queue.workers = n;
    }

    let pool = db::connect(&config).await?;
    let fetcher = Fetcher::new(config.download.timeout_secs)?;
    let queue = Arc::new(IngestionQueue::new(pool.clone(), config.queue.clone()));
    let extractor = Arc::new(ContentExtractor::new(OcrEngine::new(&config.ocr.language)));
    let cache = Arc::new(CacheStore::new(pool.clone(), config.cache.default_ttl_secs));

    let ctx = Arc::new(PipelineContext {
        config,
        queue: Arc::clone(&queue),
        extractor,
        cache,
        fetcher,
    });
    run_workers(ctx, drain).await?;

    let status = queue.status().await?;
    println!("work");
    println!("  completed: {}", status.completed);
    println!("  failed:    {}", status.failed);
    println!("ok");

    pool.close().await;
    Ok(())
}

async fn run_status(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let queue = IngestionQueue::new(pool.clone(), config.queue.clone());
    let status = queue.status().await?;

    println!("queue status");
    println!("  waiting:   {}", status.waiting);
    println!("  active:    {}", status.active);
    println!("  completed: {}", status.completed);
    println!("  failed:    {}", status.failed);
    println!("  total:     {}", status.total);

    pool.close().await;
    Ok(())
}

async fn run_job(config: &Config, id: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let queue = IngestionQueue::new(pool.clone(), config.queue.clone());

    let Some(job) = queue.job_details(id).await? else {
        pool.close().await;
        eprintln!("Error: job not found: {}", id);
        std::process::exit(1);
    };

    println!("--- Job {} ---", job.id);
    println!("document:     {}", job.document_id);
    println!("locator:      {}", job.locator);
    println!("principal:    {}", job.principal_id);
    println!("content_type: {}", job.content_type);
    println!("state:        {}", job.state.as_str());
    println!("attempts:     {}/{}", job.attempts, job.max_attempts);
    if let Some(err) = &job.last_error {
        println!("last_error:   {}", err);
    }

    pool.close().await;
    Ok(())
}

async fn run_clear(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let queue = IngestionQueue::new(pool.clone(), config.queue.clone());
    let removed = queue.clear().await?;
    println!("cleared {} jobs", removed);
    pool.close().await;
    Ok(())
}

async fn run_get(config: &Config, id: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let cache = CacheStore::new(pool.clone(), config.cache.default_ttl_secs);

    let Some((payload, hit)) = fetch_snapshot(&pool, &cache, id).await? else {
        pool.close().await;
        eprintln!("Error: document not found: {}", id);
        std::process::exit(1);
    };

    println!("--- Document {} ---", id);
    println!("cache: {}", if hit { "hit" } else { "miss" });
    println!("{}", payload);

    pool.close().await;
    Ok(())
}

async fn run_cache(config: &Config, command: CacheCommands) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let cache = CacheStore::new(pool.clone(), config.cache.default_ttl_secs);

    match command {
        CacheCommands::Popular { limit } => {
            let entries = cache.popular(limit).await?;
            println!("{:<38} {:>6}  {:<10} TITLE", "DOCUMENT", "HITS", "STATE");
            for e in entries {
                println!(
                    "{:<38} {:>6}  {:<10} {}",
                    e.document_id,
                    e.hits,
                    e.state.as_deref().unwrap_or("-"),
                    e.title.as_deref().unwrap_or("-"),
                );
            }
        }
        CacheCommands::Warmup { limit } => {
            let fetcher = Fetcher::new(config.download.timeout_secs)?;
            let limit = limit.unwrap_or(config.cache.warmup_limit);
            let warmed = cache.warmup(&fetcher, limit).await?;
            println!("warmed {} entries", warmed);
        }
        CacheCommands::Invalidate { id } => {
            if cache.invalidate(&id).await {
                println!("invalidated {}", id);
            } else {
                println!("no live entry for {}", id);
            }
        }
        CacheCommands::Stats => {
            let stats = cache.stats().await?;
            println!("cache stats");
            println!("  tracked:      {}", stats.tracked);
            println!("  total hits:   {}", stats.total_hits);
            println!("  live entries: {}", stats.live_entries);
            for (id, hits) in stats.top {
                println!("  top: {} ({} hits)", id, hits);
            }
        }
        CacheCommands::Clear => {
            cache.clear().await;
            println!("cache cleared");
        }
    }

    pool.close().await;
    Ok(())
}
