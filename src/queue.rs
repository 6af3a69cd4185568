//! Persisted job queue backed by the `queue_jobs` table.
//!
//! The queue is a status column plus a handful of conditional updates:
//!
//! - [`QueueStore::enqueue`] inserts a pending job, deduplicated by key.
//! - [`QueueStore::claim_batch`] atomically moves up to N pending jobs to
//!   `processing` in a single `UPDATE … RETURNING`, so two runners never
//!   receive the same job. Claimed rows that cannot be decoded go to `error`.
//! - [`QueueStore::update_status`] applies one transition of the
//!   [`JobStatus`] state machine, guarded in SQL by the allowed
//!   predecessor statuses.
//!
//! Housekeeping ([`release_stale`](QueueStore::release_stale),
//! [`purge_errors`](QueueStore::purge_errors), [`requeue`](QueueStore::requeue))
//! is built from the same primitives.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use crate::config::{DuplicatePolicy, QueueConfig};
use crate::error::{QueueError, QueueResult};
use crate::models::{JobStatus, NewJob, Priority, QueueJob};

const JOB_COLUMNS: &str = "id, content_type, source, payload_json, status, priority, dedup_key, \
                           attempts, last_error, created_at, updated_at";

/// Claim order: high priority first, then oldest, then insertion order.
const CLAIM_ORDER: &str =
    "CASE priority WHEN 'high' THEN 0 ELSE 1 END ASC, created_at ASC, rowid ASC";

/// Result of [`QueueStore::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// A new row was written with this id.
    Inserted(String),
    /// An equivalent job already existed; nothing was written.
    Duplicate(String),
}

impl Enqueued {
    pub fn id(&self) -> &str {
        match self {
            Enqueued::Inserted(id) | Enqueued::Duplicate(id) => id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Enqueued::Inserted(_))
    }
}

/// Uniqueness key for a job.
///
/// An explicit `content_id` in the payload wins. Otherwise a `url` is hashed
/// together with the content type and source. Jobs with neither cannot be
/// deduplicated and get `None`.
pub fn dedup_key(job: &NewJob) -> Option<String> {
    if let Some(cid) = job.payload.get("content_id") {
        let cid = match cid {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        if !cid.is_empty() {
            return Some(format!("content_id:{}", cid));
        }
    }

    let url = job
        .payload
        .get("url")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())?;

    let mut hasher = Sha256::new();
    hasher.update(job.content_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(job.source.as_bytes());
    hasher.update([0u8]);
    hasher.update(url.as_bytes());
    Some(format!("url:{:x}", hasher.finalize()))
}

#[derive(Clone)]
pub struct QueueStore {
    pool: SqlitePool,
    duplicate_policy: DuplicatePolicy,
    blocked_sources: Vec<String>,
}

impl QueueStore {
    pub fn new(pool: SqlitePool, config: &QueueConfig) -> Self {
        Self {
            pool,
            duplicate_policy: config.duplicate_policy,
            blocked_sources: config.blocked_sources.clone(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new pending job.
    ///
    /// Exactly one row exists per dedup key afterwards. Whether a second
    /// enqueue of the same key is an error depends on the configured
    /// [`DuplicatePolicy`].
    pub async fn enqueue(&self, job: NewJob) -> QueueResult<Enqueued> {
        let content_type = job.content_type.trim().to_ascii_lowercase();
        let source = job.source.trim().to_string();
        if content_type.is_empty() {
            return Err(QueueError::InvalidJob("content_type must not be empty".into()));
        }
        if source.is_empty() {
            return Err(QueueError::InvalidJob("source must not be empty".into()));
        }
        if !job.payload.is_object() {
            return Err(QueueError::InvalidJob("payload must be a JSON object".into()));
        }
        if self.blocked_sources.iter().any(|b| b == &source) {
            return Err(QueueError::BlockedSource(source));
        }

        let job = NewJob {
            content_type,
            source,
            ..job
        };
        let id = Uuid::new_v4().to_string();
        let key = dedup_key(&job).unwrap_or_else(|| format!("job:{}", id));
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO queue_jobs
                (id, content_type, source, payload_json, status, priority, dedup_key, attempts, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'pending', ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&job.content_type)
        .bind(&job.source)
        .bind(serde_json::to_string(&job.payload)?)
        .bind(job.priority.as_str())
        .bind(&key)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Enqueued::Inserted(id));
        }

        let existing_id: String = sqlx::query_scalar("SELECT id FROM queue_jobs WHERE dedup_key = ?")
            .bind(&key)
            .fetch_one(&self.pool)
            .await?;

        match self.duplicate_policy {
            DuplicatePolicy::Ignore => Ok(Enqueued::Duplicate(existing_id)),
            DuplicatePolicy::Reject => Err(QueueError::Duplicate { existing_id }),
        }
    }

    /// Atomically claim up to `limit` pending jobs.
    ///
    /// Returned jobs are already `processing` with `attempts` incremented,
    /// in claim order.
    pub async fn claim_batch(&self, limit: usize) -> QueueResult<Vec<QueueJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now().timestamp();
        let sql = format!(
            r#"
            UPDATE queue_jobs
            SET status = 'processing', attempts = attempts + 1, updated_at = ?
            WHERE id IN (
                SELECT id FROM queue_jobs
                WHERE status = 'pending'
                ORDER BY {order}
                LIMIT ?
            )
            RETURNING {cols}, rowid AS seq
            "#,
            order = CLAIM_ORDER,
            cols = JOB_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        // RETURNING does not preserve the subquery order.
        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let seq: i64 = row.get("seq");
            match row_to_job(row) {
                Ok(job) => claimed.push((seq, job)),
                Err(QueueError::CorruptRow { id, message }) => {
                    warn!(job = %id, error = %message, "unreadable job moved to error");
                    self.quarantine(&id, &message).await?;
                }
                Err(e) => return Err(e),
            }
        }
        claimed.sort_by(|(sa, a), (sb, b)| {
            priority_rank(a.priority)
                .cmp(&priority_rank(b.priority))
                .then(a.created_at.cmp(&b.created_at))
                .then(sa.cmp(sb))
        });

        Ok(claimed.into_iter().map(|(_, job)| job).collect())
    }

    /// Park a claimed job whose row cannot be decoded.
    async fn quarantine(&self, id: &str, message: &str) -> QueueResult<()> {
        sqlx::query(
            "UPDATE queue_jobs SET status = 'error', last_error = ?, updated_at = ? WHERE id = ? AND status = 'processing'",
        )
        .bind(format!("corrupt row: {}", message))
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Pending jobs in claim order, without claiming them.
    pub async fn peek_pending(&self, limit: usize) -> QueueResult<Vec<QueueJob>> {
        self.list(Some(JobStatus::Pending), Some(limit)).await
    }

    /// Move job `id` to `next`.
    ///
    /// Returns `Ok(false)` when no job has this id. A job whose current
    /// status does not allow the transition yields
    /// [`QueueError::InvalidTransition`]. `message` replaces `last_error`
    /// when given; completing a job clears it.
    pub async fn update_status(
        &self,
        id: &str,
        next: JobStatus,
        message: Option<&str>,
    ) -> QueueResult<bool> {
        let preds = JobStatus::predecessors(next);
        let now = Utc::now().timestamp();

        if !preds.is_empty() {
            let placeholders = vec!["?"; preds.len()].join(", ");
            let error_clause = if next == JobStatus::Completed {
                "last_error = NULL"
            } else {
                "last_error = COALESCE(?, last_error)"
            };
            let sql = format!(
                "UPDATE queue_jobs SET status = ?, {}, updated_at = ? WHERE id = ? AND status IN ({})",
                error_clause, placeholders
            );

            let mut query = sqlx::query(&sql).bind(next.as_str());
            if next != JobStatus::Completed {
                query = query.bind(message);
            }
            query = query.bind(now).bind(id);
            for p in &preds {
                query = query.bind(p.as_str());
            }

            if query.execute(&self.pool).await?.rows_affected() > 0 {
                return Ok(true);
            }
        }

        match self.current_status(id).await? {
            None => Ok(false),
            Some(from) => Err(QueueError::InvalidTransition {
                id: id.to_string(),
                from,
                to: next,
            }),
        }
    }

    /// Move a failed job to `local`, recording where its local asset lives.
    pub async fn mark_local(&self, id: &str, local_path: &str) -> QueueResult<bool> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = 'local',
                payload_json = json_set(payload_json, '$.local_path', ?),
                updated_at = ?
            WHERE id = ? AND status = 'failed'
            "#,
        )
        .bind(local_path)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.current_status(id).await? {
            None => Ok(false),
            Some(from) => Err(QueueError::InvalidTransition {
                id: id.to_string(),
                from,
                to: JobStatus::Local,
            }),
        }
    }

    /// Reset jobs in `from` back to `pending` with a fresh attempt counter.
    ///
    /// An empty `ids` slice resets every job in `from`.
    pub async fn requeue(&self, from: JobStatus, ids: &[String]) -> QueueResult<u64> {
        if from == JobStatus::Processing || !from.can_transition_to(JobStatus::Pending) {
            return Err(QueueError::InvalidJob(format!(
                "jobs in status {} cannot be requeued",
                from
            )));
        }

        let now = Utc::now().timestamp();
        let mut sql = String::from(
            "UPDATE queue_jobs SET status = 'pending', attempts = 0, updated_at = ? WHERE status = ?",
        );
        if !ids.is_empty() {
            sql.push_str(&format!(" AND id IN ({})", vec!["?"; ids.len()].join(", ")));
        }

        let mut query = sqlx::query(&sql).bind(now).bind(from.as_str());
        for id in ids {
            query = query.bind(id);
        }

        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    /// Return `processing` jobs untouched for `older_than_secs` to `pending`.
    pub async fn release_stale(&self, older_than_secs: u64) -> QueueResult<u64> {
        let now = Utc::now().timestamp();
        let window = i64::try_from(older_than_secs).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(window);
        let result = sqlx::query(
            "UPDATE queue_jobs SET status = 'pending', updated_at = ? WHERE status = 'processing' AND updated_at < ?",
        )
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete `error` jobs last updated more than `retention_days` ago.
    pub async fn purge_errors(&self, retention_days: u32) -> QueueResult<u64> {
        let cutoff = Utc::now().timestamp() - i64::from(retention_days) * 86_400;
        let result = sqlx::query("DELETE FROM queue_jobs WHERE status = 'error' AND updated_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn get(&self, id: &str) -> QueueResult<Option<QueueJob>> {
        let sql = format!("SELECT {} FROM queue_jobs WHERE id = ?", JOB_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_job).transpose()
    }

    /// Jobs in claim order, optionally filtered by status.
    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: Option<usize>,
    ) -> QueueResult<Vec<QueueJob>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM queue_jobs WHERE status = ? ORDER BY {} LIMIT ?",
                    JOB_COLUMNS, CLAIM_ORDER
                );
                sqlx::query(&sql)
                    .bind(status.as_str())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM queue_jobs ORDER BY {} LIMIT ?",
                    JOB_COLUMNS, CLAIM_ORDER
                );
                sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?
            }
        };

        rows.iter().map(row_to_job).collect()
    }

    /// Job count per status, including statuses with no jobs.
    pub async fn status_counts(&self) -> QueueResult<Vec<(JobStatus, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM queue_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts: Vec<(JobStatus, i64)> = JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for row in &rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            if let Ok(status) = status.parse::<JobStatus>() {
                if let Some(slot) = counts.iter_mut().find(|(s, _)| *s == status) {
                    slot.1 = n;
                }
            }
        }
        Ok(counts)
    }

    /// Job count per content type, largest first.
    pub async fn type_counts(&self) -> QueueResult<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT content_type, COUNT(*) AS n FROM queue_jobs GROUP BY content_type ORDER BY n DESC, content_type ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("content_type"), row.get("n")))
            .collect())
    }

    async fn current_status(&self, id: &str) -> QueueResult<Option<JobStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM queue_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        status
            .map(|s| {
                s.parse::<JobStatus>().map_err(|message| QueueError::CorruptRow {
                    id: id.to_string(),
                    message,
                })
            })
            .transpose()
    }
}

fn priority_rank(priority: Priority) -> u8 {
    match priority {
        Priority::High => 0,
        Priority::Normal => 1,
    }
}

fn row_to_job(row: &SqliteRow) -> QueueResult<QueueJob> {
    let id: String = row.get("id");
    let corrupt = |message: String| QueueError::CorruptRow {
        id: id.clone(),
        message,
    };

    let status: String = row.get("status");
    let status = status.parse::<JobStatus>().map_err(corrupt)?;
    let priority: String = row.get("priority");
    let priority = priority.parse::<Priority>().map_err(corrupt)?;
    let payload_json: String = row.get("payload_json");
    let payload: serde_json::Value = serde_json::from_str(&payload_json)
        .map_err(|e| corrupt(format!("payload_json: {}", e)))?;

    Ok(QueueJob {
        id: id.clone(),
        content_type: row.get("content_type"),
        source: row.get("source"),
        payload,
        status,
        priority,
        dedup_key: row.get("dedup_key"),
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
