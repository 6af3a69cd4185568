//! TOML configuration parsing and validation.
//!
//! A single [`Config`] is loaded once per command and handed to every
//! component that needs it. Only `[db]` is required; every other section
//! falls back to defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// What `enqueue` does when a job with the same dedup key already exists.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Keep the existing row and report it (INSERT OR IGNORE).
    #[default]
    Ignore,
    /// Fail with [`QueueError::Duplicate`](crate::error::QueueError::Duplicate).
    Reject,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    #[serde(default)]
    pub error_retention_days: Option<u32>,
    #[serde(default)]
    pub blocked_sources: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
            duplicate_policy: DuplicatePolicy::default(),
            error_retention_days: None,
            blocked_sources: Vec::new(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}
fn default_max_workers() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default)]
    pub auto_retry: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            auto_retry: false,
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_idle_interval")]
    pub idle_interval_secs: u64,
    #[serde(default = "default_crash_backoff")]
    pub crash_backoff_secs: u64,
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            idle_interval_secs: default_idle_interval(),
            crash_backoff_secs: default_crash_backoff(),
            stale_after_secs: default_stale_after(),
        }
    }
}

fn default_poll_interval() -> u64 {
    5
}
fn default_idle_interval() -> u64 {
    60
}
fn default_crash_backoff() -> u64 {
    30
}
fn default_stale_after() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessorConfig {
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_http_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    concat!("atlas/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SweepConfig {
    #[serde(default)]
    pub asset_dir: Option<PathBuf>,
    #[serde(default = "default_id_pattern")]
    pub id_pattern: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            asset_dir: None,
            id_pattern: default_id_pattern(),
            extensions: default_extensions(),
        }
    }
}

fn default_id_pattern() -> String {
    r"(\d{2,})".to_string()
}
fn default_extensions() -> Vec<String> {
    ["mp3", "m4a", "wav", "txt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    /// A config with every section at its default, pointing at `path`.
    pub fn for_db(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            queue: QueueConfig::default(),
            retry: RetryConfig::default(),
            runner: RunnerConfig::default(),
            processor: ProcessorConfig::default(),
            sweep: SweepConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.batch_size == 0 {
            anyhow::bail!("queue.batch_size must be > 0");
        }
        if self.queue.max_workers == 0 {
            anyhow::bail!("queue.max_workers must be > 0");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be >= 1");
        }
        if self.processor.http_timeout_secs == 0 {
            anyhow::bail!("processor.http_timeout_secs must be > 0");
        }

        let re = regex::Regex::new(&self.sweep.id_pattern)
            .with_context(|| format!("sweep.id_pattern is not a valid regex: {}", self.sweep.id_pattern))?;
        if re.captures_len() < 2 {
            anyhow::bail!("sweep.id_pattern must contain a capture group");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
