//! CLI entry points for queue commands: enqueue, list, retry, purge.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::get::format_ts_iso;
use crate::models::{JobStatus, NewJob};
use crate::queue::{Enqueued, QueueStore};

async fn open_queue(config: &Config) -> Result<QueueStore> {
    let pool = db::connect(config).await?;
    Ok(QueueStore::new(pool, &config.queue))
}

pub async fn run_enqueue(config: &Config, job: NewJob) -> Result<()> {
    let queue = open_queue(config).await?;
    let result = queue.enqueue(job).await;
    queue.pool().close().await;

    match result? {
        Enqueued::Inserted(id) => {
            println!("enqueued {}", id);
        }
        Enqueued::Duplicate(id) => {
            println!("duplicate of {} (not enqueued)", id);
        }
    }
    Ok(())
}

pub async fn run_list(
    config: &Config,
    status: Option<JobStatus>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let queue = open_queue(config).await?;
    let jobs = queue.list(status, limit).await;
    queue.pool().close().await;
    let jobs = jobs?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("no jobs");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:<12}  {:<6}  {:>3}  {:<20}  TITLE/URL",
        "ID", "STATUS", "TYPE", "PRIO", "TRY", "CREATED"
    );
    for job in &jobs {
        let label = job
            .payload_str("title")
            .or_else(|| job.payload_str("url"))
            .unwrap_or("");
        println!(
            "{:<36}  {:<10}  {:<12}  {:<6}  {:>3}  {:<20}  {}",
            job.id,
            job.status,
            job.content_type,
            job.priority,
            job.attempts,
            format_ts_iso(job.created_at),
            label
        );
    }
    Ok(())
}

pub async fn run_retry(config: &Config, status: JobStatus, ids: Vec<String>) -> Result<()> {
    if !matches!(status, JobStatus::Failed | JobStatus::Error | JobStatus::Local) {
        bail!("Only failed, error or local jobs can be retried (got {})", status);
    }

    let queue = open_queue(config).await?;
    let reset = queue.requeue(status, &ids).await;
    queue.pool().close().await;

    println!("retry {}", status);
    println!("  reset to pending: {}", reset?);
    Ok(())
}

pub async fn run_purge(config: &Config, days: Option<u32>) -> Result<()> {
    let Some(days) = days.or(config.queue.error_retention_days) else {
        bail!("No retention window: set [queue] error_retention_days or pass --days");
    };

    let queue = open_queue(config).await?;
    let purged = queue.purge_errors(days).await;
    queue.pool().close().await;

    println!("purge");
    println!("  retention: {} days", days);
    println!("  deleted error jobs: {}", purged?);
    Ok(())
}
