//! Item processors: turn one claimed [`QueueJob`] into content.
//!
//! A processor performs whatever I/O its content type needs (fetching a page,
//! reading a downloaded artifact, calling an external service) and reports a
//! [`ProcessOutcome`]. Processors never touch the queue or the content table;
//! the [`pipeline`](crate::pipeline) records the outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │          ProcessorRegistry          │
//! │  ┌──────────┐ ┌──────────────────┐  │
//! │  │ by type  │ │ fallback (fetch) │  │
//! │  └──────────┘ └──────────────────┘  │
//! └──────────────┬──────────────────────┘
//!                ▼
//!       Pipeline::process_jobs()
//! ```
//!
//! Failures carry a [`FailureKind`] so the retry policy can tell a network
//! timeout from content that will never be available.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::config::ProcessorConfig;
use crate::models::QueueJob;

/// Whether retrying a failed job could plausibly succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, connection errors, 5xx and 429 responses.
    Transient,
    /// Missing input, 4xx responses, no content found.
    Permanent,
}

/// Content extracted by a processor, before it becomes a
/// [`ContentRecord`](crate::models::ContentRecord).
#[derive(Debug, Clone, Default)]
pub struct ProcessedContent {
    pub title: Option<String>,
    pub url: Option<String>,
    pub content: Option<String>,
    pub text_path: Option<String>,
    pub html_path: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Success(ProcessedContent),
    Failed { kind: FailureKind, message: String },
}

impl ProcessOutcome {
    pub fn transient(message: impl Into<String>) -> Self {
        ProcessOutcome::Failed {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ProcessOutcome::Failed {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Success(_))
    }
}

/// Processes a single queue job.
///
/// Implementations must be cheap to share: the pipeline runs several jobs
/// of a batch concurrently against the same instance.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use atlas::models::QueueJob;
/// use atlas::processor::{ItemProcessor, ProcessOutcome, ProcessedContent};
///
/// pub struct EchoProcessor;
///
/// #[async_trait]
/// impl ItemProcessor for EchoProcessor {
///     fn name(&self) -> &str { "echo" }
///
///     async fn process(&self, job: &QueueJob) -> ProcessOutcome {
///         ProcessOutcome::Success(ProcessedContent {
///             title: job.payload_str("title").map(String::from),
///             content: Some(job.payload.to_string()),
///             ..Default::default()
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Process one job. Must not panic on bad input; report a failure instead.
    async fn process(&self, job: &QueueJob) -> ProcessOutcome;
}

/// Maps content types to processors.
pub struct ProcessorRegistry {
    by_type: Vec<(String, Arc<dyn ItemProcessor>)>,
    fallback: Option<Arc<dyn ItemProcessor>>,
}

impl ProcessorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            by_type: Vec::new(),
            fallback: None,
        }
    }

    /// A registry whose fallback is the built-in [`FetchProcessor`].
    pub fn with_builtins(config: &ProcessorConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.set_fallback(Arc::new(FetchProcessor::new(config)?));
        Ok(registry)
    }

    /// Register a processor for one content type. Later registrations win.
    pub fn register(&mut self, content_type: &str, processor: Arc<dyn ItemProcessor>) {
        let content_type = content_type.trim().to_ascii_lowercase();
        self.by_type.retain(|(t, _)| t != &content_type);
        self.by_type.push((content_type, processor));
    }

    /// Processor used for content types with no explicit registration.
    pub fn set_fallback(&mut self, processor: Arc<dyn ItemProcessor>) {
        self.fallback = Some(processor);
    }

    pub fn find(&self, content_type: &str) -> Option<Arc<dyn ItemProcessor>> {
        self.by_type
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(content_type))
            .map(|(_, p)| Arc::clone(p))
            .or_else(|| self.fallback.clone())
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in fetch processor
// ═══════════════════════════════════════════════════════════════════════

/// Fetches the job's `url`, or reads its `local_path` when the fallback
/// sweep has attached one.
pub struct FetchProcessor {
    client: reqwest::Client,
}

impl FetchProcessor {
    pub fn new(config: &ProcessorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    async fn from_local(&self, job: &QueueJob, local_path: &str) -> ProcessOutcome {
        let path = Path::new(local_path);
        if !path.is_file() {
            return ProcessOutcome::permanent(format!("local asset missing: {}", local_path));
        }

        let title = job.payload_str("title").map(String::from);
        let url = job.payload_str("url").map(String::from);

        if is_text_asset(path) {
            match tokio::fs::read_to_string(path).await {
                Ok(text) if text.trim().is_empty() => {
                    ProcessOutcome::permanent(format!("no content found in {}", local_path))
                }
                Ok(text) => ProcessOutcome::Success(ProcessedContent {
                    title,
                    url,
                    content: Some(text),
                    text_path: Some(local_path.to_string()),
                    html_path: None,
                    metadata: serde_json::json!({ "origin": "local" }),
                }),
                Err(e) => ProcessOutcome::transient(format!("read {}: {}", local_path, e)),
            }
        } else {
            // Binary assets (audio) are stored by reference; transcription happens elsewhere.
            ProcessOutcome::Success(ProcessedContent {
                title,
                url,
                content: None,
                text_path: None,
                html_path: None,
                metadata: serde_json::json!({ "origin": "local", "asset_path": local_path }),
            })
        }
    }

    async fn from_url(&self, job: &QueueJob, url: &str) -> ProcessOutcome {
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_builder() => {
                return ProcessOutcome::permanent(format!("invalid url {}: {}", url, e))
            }
            Err(e) => return ProcessOutcome::transient(format!("fetch {}: {}", url, e)),
        };

        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return ProcessOutcome::transient(format!("fetch {}: HTTP {}", url, status));
        }
        if !status.is_success() {
            return ProcessOutcome::permanent(format!("fetch {}: HTTP {}", url, status));
        }

        let mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => return ProcessOutcome::transient(format!("read body of {}: {}", url, e)),
        };
        if body.trim().is_empty() {
            return ProcessOutcome::permanent(format!("no content found at {}", url));
        }

        let title = job
            .payload_str("title")
            .map(String::from)
            .or_else(|| html_title(&body));

        ProcessOutcome::Success(ProcessedContent {
            title,
            url: Some(url.to_string()),
            content: Some(body),
            text_path: None,
            html_path: None,
            metadata: serde_json::json!({
                "origin": "http",
                "http_status": status.as_u16(),
                "mime": mime,
            }),
        })
    }
}

#[async_trait]
impl ItemProcessor for FetchProcessor {
    fn name(&self) -> &str {
        "fetch"
    }

    async fn process(&self, job: &QueueJob) -> ProcessOutcome {
        if let Some(local_path) = job.payload_str("local_path") {
            return self.from_local(job, local_path).await;
        }
        match job.payload_str("url") {
            Some(url) => self.from_url(job, url).await,
            None => ProcessOutcome::permanent("payload has neither url nor local_path"),
        }
    }
}

fn is_text_asset(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("txt" | "md" | "html" | "htm" | "json" | "srt" | "vtt")
    )
}

fn html_title(body: &str) -> Option<String> {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    let re = TITLE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex"));
    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}
