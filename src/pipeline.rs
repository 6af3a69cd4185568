//! Batch processing: claim → process (bounded concurrency) → record.
//!
//! Each claimed job runs on its own task, at most `queue.max_workers` at a
//! time. Outcomes are recorded back on the collecting task, one at a time:
//!
//! | Outcome | Content row | Status |
//! |---------|-------------|--------|
//! | success | inserted (OR IGNORE) | `completed` |
//! | transient failure, auto-retry on, attempts left | none | `pending` |
//! | any other failure | none | `failed` |
//! | processor panic / content write error | none | `error` |
//! | status write error | as written | `error` |
//!
//! A batch is always drained. An error is returned only when a job could
//! not even be moved to `error`, after the remaining jobs are recorded.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{Config, RetryConfig};
use crate::content::ContentStore;
use crate::error::QueueError;
use crate::models::{ContentRecord, JobStatus, QueueJob};
use crate::processor::{FailureKind, ProcessOutcome, ProcessedContent, ProcessorRegistry};
use crate::queue::QueueStore;

/// Counts for one processed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub errored: u64,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.claimed == 0
    }

    pub fn absorb(&mut self, other: &BatchReport) {
        self.claimed += other.claimed;
        self.completed += other.completed;
        self.failed += other.failed;
        self.retried += other.retried;
        self.errored += other.errored;
    }
}

#[derive(Clone)]
pub struct Pipeline {
    queue: QueueStore,
    content: ContentStore,
    processors: Arc<ProcessorRegistry>,
    max_workers: usize,
    retry: RetryConfig,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        queue: QueueStore,
        content: ContentStore,
        processors: Arc<ProcessorRegistry>,
    ) -> Self {
        Self {
            queue,
            content,
            processors,
            max_workers: config.queue.max_workers.max(1),
            retry: config.retry.clone(),
        }
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    /// Claim up to `limit` jobs and process them.
    pub async fn run_batch(&self, limit: usize) -> Result<BatchReport> {
        let jobs = self.queue.claim_batch(limit).await?;
        if jobs.is_empty() {
            return Ok(BatchReport::default());
        }
        debug!(count = jobs.len(), "claimed batch");
        self.process_jobs(jobs).await
    }

    /// Process jobs that are already `processing`.
    pub async fn process_jobs(&self, jobs: Vec<QueueJob>) -> Result<BatchReport> {
        let mut report = BatchReport {
            claimed: jobs.len() as u64,
            ..Default::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for job in jobs {
            let semaphore = Arc::clone(&semaphore);
            let processor = self.processors.find(&job.content_type);

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = match processor {
                    None => Ok(ProcessOutcome::permanent(format!(
                        "no processor registered for '{}'",
                        job.content_type
                    ))),
                    Some(processor) => {
                        let task_job = job.clone();
                        // Nested task so a panicking processor is reported against its job.
                        tokio::spawn(async move { processor.process(&task_job).await })
                            .await
                            .map_err(|e| format!("processor crashed: {}", e))
                    }
                };
                (job, outcome)
            });
        }

        // Drain every task: returning early would abort jobs still in flight.
        let mut unrecorded: Option<anyhow::Error> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((job, outcome)) => {
                    if let Err(e) = self.record(&job, outcome, &mut report).await {
                        if let Err(e) = self.record_write_failure(&job, e, &mut report).await {
                            unrecorded.get_or_insert(e);
                        }
                    }
                }
                Err(e) => error!(error = %e, "batch task failed"),
            }
        }

        match unrecorded {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Move a job whose outcome could not be stored to `error`.
    async fn record_write_failure(
        &self,
        job: &QueueJob,
        cause: anyhow::Error,
        report: &mut BatchReport,
    ) -> Result<()> {
        let message = format!("status write failed: {:#}", cause);
        error!(job = %job.id, error = %message, "could not record outcome");
        match self.settle(job, JobStatus::Error, Some(&message)).await {
            Ok(true) => {
                report.errored += 1;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                error!(job = %job.id, error = %e, "job left in processing");
                Err(e)
            }
        }
    }

    async fn record(
        &self,
        job: &QueueJob,
        outcome: Result<ProcessOutcome, String>,
        report: &mut BatchReport,
    ) -> Result<()> {
        match outcome {
            Ok(ProcessOutcome::Success(content)) => {
                let record = content_record(job, content);
                match self.content.insert(&record).await {
                    Ok(inserted) => {
                        if !inserted {
                            debug!(job = %job.id, "content already stored");
                        }
                        if self.settle(job, JobStatus::Completed, None).await? {
                            report.completed += 1;
                            info!(job = %job.id, content_type = %job.content_type, "completed");
                        }
                    }
                    Err(e) => {
                        let message = format!("content write failed: {}", e);
                        error!(job = %job.id, error = %e, "content write failed");
                        if self.settle(job, JobStatus::Error, Some(&message)).await? {
                            report.errored += 1;
                        }
                    }
                }
            }
            Ok(ProcessOutcome::Failed { kind, message }) => {
                if self.should_retry(job, kind) {
                    if self.settle(job, JobStatus::Pending, Some(&message)).await? {
                        report.retried += 1;
                        warn!(
                            job = %job.id,
                            attempt = job.attempts,
                            max_attempts = self.retry.max_attempts,
                            error = %message,
                            "transient failure, requeued"
                        );
                    }
                } else if self.settle(job, JobStatus::Failed, Some(&message)).await? {
                    report.failed += 1;
                    warn!(job = %job.id, kind = ?kind, error = %message, "failed");
                }
            }
            Err(message) => {
                error!(job = %job.id, error = %message, "processor error");
                if self.settle(job, JobStatus::Error, Some(&message)).await? {
                    report.errored += 1;
                }
            }
        }
        Ok(())
    }

    fn should_retry(&self, job: &QueueJob, kind: FailureKind) -> bool {
        self.retry.auto_retry
            && kind == FailureKind::Transient
            && job.attempts < i64::from(self.retry.max_attempts)
    }

    /// Apply a transition, treating a lost race as a warning.
    async fn settle(&self, job: &QueueJob, next: JobStatus, message: Option<&str>) -> Result<bool> {
        match self.queue.update_status(&job.id, next, message).await {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(job = %job.id, "job vanished before its outcome was recorded");
                Ok(false)
            }
            Err(QueueError::InvalidTransition { from, to, .. }) => {
                warn!(job = %job.id, %from, %to, "job changed status while processing");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn content_record(job: &QueueJob, content: ProcessedContent) -> ContentRecord {
    let metadata = if content.metadata.is_object() {
        content.metadata
    } else {
        serde_json::json!({})
    };

    ContentRecord {
        id: job.id.clone(),
        title: content.title.or_else(|| job.payload_str("title").map(String::from)),
        url: content.url.or_else(|| job.payload_str("url").map(String::from)),
        source: job.source.clone(),
        content_type: job.content_type.clone(),
        text_path: content.text_path,
        html_path: content.html_path,
        content: content.content,
        created_at: Utc::now().timestamp(),
        metadata,
    }
}
