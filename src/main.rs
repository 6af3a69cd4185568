//! # Atlas CLI (`atlas`)
//!
//! The `atlas` binary drives the ingestion queue: database initialization,
//! enqueueing, the continuous runner, the fallback sweep, and cleanup.
//!
//! ## Usage
//!
//! ```bash
//! atlas --config ./config/atlas.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `atlas init` | Create the SQLite database and tables |
//! | `atlas enqueue` | Add a job to the queue |
//! | `atlas queue list` | List jobs, optionally by status |
//! | `atlas queue show <id>` | Show one job |
//! | `atlas queue retry` | Reset failed/error/local jobs to pending |
//! | `atlas run [--once]` | Run the processing loop |
//! | `atlas sweep [--apply]` | Recover failed jobs from local assets |
//! | `atlas purge` | Delete expired error jobs |
//! | `atlas cleanup <ids…>` | Delete content records by id |
//! | `atlas get <id>` | Show a content record |
//! | `atlas stats` | Queue and content counts |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use atlas::models::{JobStatus, NewJob, Priority};
use atlas::{cleanup, config, get, migrate, queue_cmd, runner, stats, sweep};

/// Atlas: a local-first knowledge ingestion queue.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "atlas",
    about = "Atlas — a local-first knowledge ingestion queue",
    version,
    long_about = "Atlas queues podcasts, newsletters, articles and bookmarks as jobs, \
    processes them in batches with a continuous runner, and stores the results in SQLite."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/atlas.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite file and the `queue_jobs` and `content` tables.
    /// Safe to run repeatedly.
    Init,

    /// Add a job to the queue.
    Enqueue {
        /// Content type (e.g. `podcast`, `newsletter`, `article`, `bookmark`).
        #[arg(long = "type")]
        content_type: String,

        /// Origin identifier: podcast name, feed URL, mailbox.
        #[arg(long)]
        source: String,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        title: Option<String>,

        /// Explicit dedup key; overrides URL-based deduplication.
        #[arg(long)]
        content_id: Option<String>,

        /// `normal` or `high`.
        #[arg(long, default_value = "normal")]
        priority: Priority,

        /// Extra payload fields as `key=value` pairs.
        #[arg(long = "payload", value_parser = parse_key_val)]
        payload: Vec<(String, String)>,
    },

    /// Inspect and reset queue jobs.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Run the processing loop.
    ///
    /// Claims batches of pending jobs, processes them, and records the
    /// outcome. Runs until Ctrl-C unless `--once` is given.
    Run {
        /// Stop as soon as the queue is empty.
        #[arg(long)]
        once: bool,
    },

    /// Recover failed jobs whose asset exists locally.
    ///
    /// Dry-run unless `--apply` is given.
    Sweep {
        /// Move matched jobs to `local`.
        #[arg(long)]
        apply: bool,

        /// Asset directory; overrides `[sweep].asset_dir`.
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Delete error jobs older than the retention window.
    Purge {
        /// Retention in days; overrides `[queue].error_retention_days`.
        #[arg(long)]
        days: Option<u32>,
    },

    /// Delete content records by id.
    Cleanup {
        /// Content ids to delete.
        ids: Vec<String>,

        /// File with one id per line.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Show what would be deleted without deleting.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show a content record.
    Get {
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Show queue and content counts.
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List jobs in claim order.
    List {
        #[arg(long)]
        status: Option<JobStatus>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },
    /// Show one job as JSON.
    Show { id: String },
    /// Reset jobs in a recoverable status back to pending.
    Retry {
        /// `failed`, `error` or `local`.
        #[arg(long, default_value = "failed")]
        status: JobStatus,

        /// Only these job ids (default: all jobs in the status).
        ids: Vec<String>,
    },
}

/// Parse a `key=value` pair for `--payload` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("atlas=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Enqueue {
            content_type,
            source,
            url,
            title,
            content_id,
            priority,
            payload,
        } => {
            let mut job = NewJob::new(content_type, source).with_priority(priority);
            for (key, value) in payload {
                job = job.with(&key, value);
            }
            if let Some(url) = url {
                job = job.with("url", url);
            }
            if let Some(title) = title {
                job = job.with("title", title);
            }
            if let Some(content_id) = content_id {
                job = job.with("content_id", content_id);
            }
            queue_cmd::run_enqueue(&cfg, job).await?;
        }
        Commands::Queue { action } => match action {
            QueueAction::List {
                status,
                limit,
                json,
            } => {
                queue_cmd::run_list(&cfg, status, limit, json).await?;
            }
            QueueAction::Show { id } => {
                get::run_show_job(&cfg, &id).await?;
            }
            QueueAction::Retry { status, ids } => {
                queue_cmd::run_retry(&cfg, status, ids).await?;
            }
        },
        Commands::Run { once } => {
            runner::run_runner(&cfg, once).await?;
        }
        Commands::Sweep { apply, dir } => {
            sweep::run_sweep(&cfg, apply, dir).await?;
        }
        Commands::Purge { days } => {
            queue_cmd::run_purge(&cfg, days).await?;
        }
        Commands::Cleanup { ids, file, dry_run } => {
            cleanup::run_cleanup(&cfg, ids, file.as_deref(), dry_run).await?;
        }
        Commands::Get { id, json } => {
            get::run_get(&cfg, &id, json).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
    }

    Ok(())
}
