//! Delete low-quality content rows by id.
//!
//! Ids come from the command line and/or a file with one id per line
//! (`#` starts a comment). Exactly the listed rows are removed; the report
//! includes how many rows remain.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::Path;

use crate::config::Config;
use crate::content::ContentStore;
use crate::db;

/// Parse an id list: one per line, blank lines and `#` comments ignored.
pub fn parse_id_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Ids from arguments then file, trimmed, first occurrence kept.
pub fn collect_ids(ids: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    let mut all: Vec<String> = ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();

    if let Some(path) = file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read id file: {}", path.display()))?;
        all.extend(parse_id_list(&text));
    }

    let mut seen = HashSet::new();
    all.retain(|id| seen.insert(id.clone()));
    Ok(all)
}

/// Entry point for `atlas cleanup`.
pub async fn run_cleanup(
    config: &Config,
    ids: Vec<String>,
    file: Option<&Path>,
    dry_run: bool,
) -> Result<()> {
    let ids = collect_ids(ids, file)?;
    if ids.is_empty() {
        bail!("No ids given: pass ids as arguments or with --file");
    }

    let pool = db::connect(config).await?;
    let content = ContentStore::new(pool.clone());

    if dry_run {
        let existing = content.existing_ids(&ids).await?;
        let total = content.count().await?;
        pool.close().await;

        println!("cleanup (dry-run)");
        println!("  ids given: {}", ids.len());
        println!("  would delete: {}", existing.len());
        for id in &existing {
            println!("    {}", id);
        }
        println!("  would remain: {}", total - existing.len() as i64);
        return Ok(());
    }

    let report = content.delete_by_ids(&ids).await;
    pool.close().await;
    let report = report?;

    println!("cleanup");
    println!("  ids given: {}", report.requested);
    println!("  deleted: {}", report.deleted);
    println!("  remaining: {}", report.remaining);
    println!("ok");
    Ok(())
}
