use thiserror::Error;

use crate::models::JobStatus;

/// Errors returned by [`QueueStore`](crate::queue::QueueStore) and
/// [`ContentStore`](crate::content::ContentStore).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("duplicate job: already queued as {existing_id}")]
    Duplicate { existing_id: String },

    #[error("source is blocked: {0}")]
    BlockedSource(String),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("job {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("corrupt row {id}: {message}")]
    CorruptRow { id: String, message: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Payload(#[from] serde_json::Error),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
