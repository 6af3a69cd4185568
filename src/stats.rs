//! Queue and content statistics.
//!
//! The aggregate view an admin endpoint would serve: jobs per status, jobs
//! and content rows per content type, database size. Used by `atlas stats`.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::content::ContentStore;
use crate::db;
use crate::queue::QueueStore;

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_jobs: i64,
    pub jobs_by_status: Vec<(String, i64)>,
    pub jobs_by_type: Vec<(String, i64)>,
    pub total_content: i64,
    pub content_by_type: Vec<(String, i64)>,
    pub db_size_bytes: u64,
}

pub async fn collect_stats(config: &Config) -> Result<Stats> {
    let pool = db::connect(config).await?;
    let queue = QueueStore::new(pool.clone(), &config.queue);
    let content = ContentStore::new(pool.clone());

    let by_status = queue.status_counts().await?;
    let jobs_by_type = queue.type_counts().await?;
    let total_content = content.count().await?;
    let content_by_type = content.type_counts().await?;
    pool.close().await;

    let db_size_bytes = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(Stats {
        total_jobs: by_status.iter().map(|(_, n)| n).sum(),
        jobs_by_status: by_status
            .into_iter()
            .map(|(s, n)| (s.to_string(), n))
            .collect(),
        jobs_by_type,
        total_content,
        content_by_type,
        db_size_bytes,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let stats = collect_stats(config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Atlas — Queue Stats");
    println!("===================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(stats.db_size_bytes));
    println!();
    println!("  Jobs:        {}", stats.total_jobs);
    for (status, n) in &stats.jobs_by_status {
        println!("    {:<12} {:>8}", status, n);
    }
    println!();
    println!("  Content:     {}", stats.total_content);

    if !stats.jobs_by_type.is_empty() {
        println!();
        println!("  By type:");
        println!("  {:<24} {:>8} {:>8}", "TYPE", "JOBS", "CONTENT");
        println!("  {}", "-".repeat(42));
        for (content_type, jobs) in &stats.jobs_by_type {
            let stored = stats
                .content_by_type
                .iter()
                .find(|(t, _)| t == content_type)
                .map(|(_, n)| *n)
                .unwrap_or(0);
            println!("  {:<24} {:>8} {:>8}", content_type, jobs, stored);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
