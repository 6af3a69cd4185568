//! Core data models used throughout Atlas.
//!
//! These types represent the queue jobs that move through the processing
//! pipeline and the content records they produce.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Processing status of a [`QueueJob`].
///
/// The set is closed and transitions are checked by
/// [`can_transition_to`](JobStatus::can_transition_to):
///
/// ```text
/// pending ──claim──▶ processing ──▶ completed
///    ▲                  │  │
///    │                  │  └──▶ failed ──sweep──▶ local
///    │                  └────▶ error               │
///    └──── retry ◀── failed / error / local ◀──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Error,
    Local,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Error,
        JobStatus::Local,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
            JobStatus::Local => "local",
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Error)
                | (Processing, Pending)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Error)
                | (Failed, Pending)
                | (Failed, Local)
                | (Error, Pending)
                | (Local, Pending)
        )
    }

    /// Statuses from which `next` may be reached.
    pub fn predecessors(next: JobStatus) -> Vec<JobStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "error" => Ok(JobStatus::Error),
            "local" => Ok(JobStatus::Local),
            other => Err(format!(
                "unknown job status '{}': expected pending, processing, completed, failed, error or local",
                other
            )),
        }
    }
}

/// Ordering hint for the claim step. High-priority jobs are claimed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{}': expected normal or high", other)),
        }
    }
}

/// A job as submitted to [`QueueStore::enqueue`](crate::queue::QueueStore::enqueue).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub content_type: String,
    pub source: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
}

impl NewJob {
    pub fn new(content_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            source: source.into(),
            payload: serde_json::json!({}),
            priority: Priority::Normal,
        }
    }

    /// Set a payload field. Non-object payloads are replaced by an object.
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if !self.payload.is_object() {
            self.payload = serde_json::json!({});
        }
        if let Some(map) = self.payload.as_object_mut() {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// One unit of ingestion work stored in `queue_jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct QueueJob {
    pub id: String,
    pub content_type: String,
    pub source: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub priority: Priority,
    pub dedup_key: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl QueueJob {
    /// String field from the payload, if present and non-empty.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// A processed artifact stored in `content`. Its `id` is the producing job's id.
#[derive(Debug, Clone, Serialize)]
pub struct ContentRecord {
    pub id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub source: String,
    pub content_type: String,
    pub text_path: Option<String>,
    pub html_path: Option<String>,
    pub content: Option<String>,
    pub created_at: i64,
    pub metadata: serde_json::Value,
}
