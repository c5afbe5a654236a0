//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue full ({capacity} jobs)")]
    Full { capacity: usize },

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Duplicate job: {0}")]
    Duplicate(String),
}
