//! Content and job retrieval by id.
//!
//! Used by `atlas get` (content records) and `atlas queue show` (jobs).

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::content::ContentStore;
use crate::db;
use crate::queue::QueueStore;

/// Content record shaped for output, with ISO-8601 timestamps.
#[derive(Debug, Clone, Serialize)]
pub struct ContentResponse {
    pub id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub source: String,
    pub content_type: String,
    pub text_path: Option<String>,
    pub html_path: Option<String>,
    pub content: Option<String>,
    pub created_at: String,
    pub metadata: serde_json::Value,
}

/// Queue job shaped for output, with ISO-8601 timestamps.
#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub content_type: String,
    pub source: String,
    pub status: String,
    pub priority: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub payload: serde_json::Value,
}

/// Core get function returning structured data.
pub async fn get_content(config: &Config, id: &str) -> Result<ContentResponse> {
    let pool = db::connect(config).await?;
    let record = ContentStore::new(pool.clone()).get(id).await;
    pool.close().await;

    let Some(record) = record? else {
        bail!("content not found: {}", id);
    };

    Ok(ContentResponse {
        id: record.id,
        title: record.title,
        url: record.url,
        source: record.source,
        content_type: record.content_type,
        text_path: record.text_path,
        html_path: record.html_path,
        content: record.content,
        created_at: format_ts_iso(record.created_at),
        metadata: record.metadata,
    })
}

pub async fn get_job(config: &Config, id: &str) -> Result<JobResponse> {
    let pool = db::connect(config).await?;
    let job = QueueStore::new(pool.clone(), &config.queue).get(id).await;
    pool.close().await;

    let Some(job) = job? else {
        bail!("job not found: {}", id);
    };

    Ok(JobResponse {
        id: job.id,
        content_type: job.content_type,
        source: job.source,
        status: job.status.to_string(),
        priority: job.priority.to_string(),
        attempts: job.attempts,
        last_error: job.last_error,
        created_at: format_ts_iso(job.created_at),
        updated_at: format_ts_iso(job.updated_at),
        payload: job.payload,
    })
}

/// CLI entry point for `atlas get`.
pub async fn run_get(config: &Config, id: &str, json: bool) -> Result<()> {
    let record = get_content(config, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("--- Content ---");
    println!("id:           {}", record.id);
    println!(
        "title:        {}",
        record.title.as_deref().unwrap_or("(untitled)")
    );
    println!("source:       {}", record.source);
    println!("content_type: {}", record.content_type);
    if let Some(ref url) = record.url {
        println!("url:          {}", url);
    }
    if let Some(ref path) = record.text_path {
        println!("text_path:    {}", path);
    }
    if let Some(ref path) = record.html_path {
        println!("html_path:    {}", path);
    }
    println!("created_at:   {}", record.created_at);
    println!("metadata:     {}", record.metadata);
    println!();

    if let Some(ref body) = record.content {
        println!("--- Body ---");
        println!("{}", body);
        println!();
    }

    Ok(())
}

/// CLI entry point for `atlas queue show`.
pub async fn run_show_job(config: &Config, id: &str) -> Result<()> {
    let job = get_job(config, id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
