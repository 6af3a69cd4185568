//! Fallback sweep: recover failed jobs from locally available assets.
//!
//! A manual reconciliation pass, not a background component. Every `failed`
//! job is matched against the files under `sweep.asset_dir` through a numeric
//! id pulled out by `sweep.id_pattern` (an episode number, usually). A job
//! with a matching asset moves to `local` and gets a `local_path` in its
//! payload; `atlas queue retry --status local` then hands it back to the
//! runner, whose fetch processor reads the local file instead of the network.
//! Jobs without a match are left untouched.
//!
//! Dry-run unless `--apply` is given.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::{Config, SweepConfig};
use crate::db;
use crate::error::QueueError;
use crate::models::{JobStatus, QueueJob};
use crate::queue::QueueStore;

/// Payload fields searched for a numeric id, in order.
const ID_FIELDS: [&str; 3] = ["episode", "title", "url"];

#[derive(Debug, Clone, Serialize)]
pub struct SweepMatch {
    pub job_id: String,
    pub numeric_id: String,
    pub asset: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub assets_indexed: usize,
    pub matched: Vec<SweepMatch>,
    /// Jobs with an id but no asset.
    pub unmatched: Vec<String>,
    /// Jobs from which no id could be extracted.
    pub without_id: Vec<String>,
    pub applied: bool,
    /// Matches that were applied (may be fewer than `matched` on races).
    pub recovered: usize,
}

/// First capture of `re` in `text`, with leading zeros dropped.
pub fn extract_numeric_id(re: &Regex, text: &str) -> Option<String> {
    let raw = re.captures(text)?.get(1)?.as_str();
    let trimmed = raw.trim_start_matches('0');
    if trimmed.is_empty() {
        if raw.is_empty() {
            None
        } else {
            Some("0".to_string())
        }
    } else {
        Some(trimmed.to_string())
    }
}

/// Numeric id for a job, from the first payload field that yields one.
pub fn job_numeric_id(re: &Regex, job: &QueueJob) -> Option<String> {
    ID_FIELDS.iter().find_map(|field| {
        let text = match job.payload.get(*field)? {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        extract_numeric_id(re, &text)
    })
}

/// Map numeric id → absolute asset path for every matching file under `dir`.
///
/// Files are visited in name order; the first file for an id wins.
pub fn index_assets(dir: &Path, re: &Regex, extensions: &[String]) -> Result<HashMap<String, PathBuf>> {
    if !dir.is_dir() {
        bail!("asset directory does not exist: {}", dir.display());
    }

    let mut index = HashMap::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to scan {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        if !ext_ok {
            continue;
        }

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(id) = extract_numeric_id(re, stem) else {
            continue;
        };
        if !index.contains_key(&id) {
            // Stored in job payloads, so it must not depend on the working directory.
            let absolute = path
                .canonicalize()
                .with_context(|| format!("Failed to resolve {}", path.display()))?;
            index.insert(id, absolute);
        }
    }
    Ok(index)
}

/// Match failed jobs against local assets; with `apply`, move matches to `local`.
pub async fn sweep(queue: &QueueStore, asset_dir: &Path, config: &SweepConfig, apply: bool) -> Result<SweepReport> {
    let re = Regex::new(&config.id_pattern)
        .with_context(|| format!("invalid sweep.id_pattern: {}", config.id_pattern))?;
    let assets = index_assets(asset_dir, &re, &config.extensions)?;
    let failed = queue.list(Some(JobStatus::Failed), None).await?;

    let mut report = SweepReport {
        scanned: failed.len(),
        assets_indexed: assets.len(),
        applied: apply,
        ..Default::default()
    };

    for job in &failed {
        let Some(numeric_id) = job_numeric_id(&re, job) else {
            report.without_id.push(job.id.clone());
            continue;
        };
        let Some(asset) = assets.get(&numeric_id) else {
            report.unmatched.push(job.id.clone());
            continue;
        };

        if apply {
            let local_path = asset.to_string_lossy();
            match queue.mark_local(&job.id, &local_path).await {
                Ok(true) => {
                    report.recovered += 1;
                    info!(job = %job.id, asset = %local_path, "recovered from local asset");
                }
                Ok(false) => warn!(job = %job.id, "job disappeared during sweep"),
                Err(QueueError::InvalidTransition { from, .. }) => {
                    warn!(job = %job.id, %from, "job left failed during sweep");
                }
                Err(e) => return Err(e.into()),
            }
        }

        report.matched.push(SweepMatch {
            job_id: job.id.clone(),
            numeric_id,
            asset: asset.clone(),
        });
    }

    Ok(report)
}

/// Entry point for `atlas sweep`.
pub async fn run_sweep(config: &Config, apply: bool, dir: Option<PathBuf>) -> Result<()> {
    let asset_dir = match dir.or_else(|| config.sweep.asset_dir.clone()) {
        Some(d) => d,
        None => bail!("No asset directory: set [sweep] asset_dir in config or pass --dir"),
    };

    let pool = db::connect(config).await?;
    let queue = QueueStore::new(pool.clone(), &config.queue);
    let report = sweep(&queue, &asset_dir, &config.sweep, apply).await;
    pool.close().await;
    let report = report?;

    println!("sweep{}", if apply { "" } else { " (dry-run)" });
    println!("  asset dir: {}", asset_dir.display());
    println!("  assets indexed: {}", report.assets_indexed);
    println!("  failed jobs scanned: {}", report.scanned);
    println!("  matched: {}", report.matched.len());
    for m in &report.matched {
        println!("    {}  #{}  {}", m.job_id, m.numeric_id, m.asset.display());
    }
    println!("  unmatched: {}", report.unmatched.len());
    println!("  without id: {}", report.without_id.len());
    if apply {
        println!("  recovered: {}", report.recovered);
    } else if !report.matched.is_empty() {
        println!("  re-run with --apply to move matched jobs to local");
    }
    Ok(())
}
