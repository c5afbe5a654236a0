//! Worker error types.

use thiserror::Error;

use docvid_models::{JobError, JobStatus, ScriptError, SourceError};
use docvid_queue::QueueError;
use docvid_runtime::{CacheError, CircuitError, ResourceError};
use docvid_services::ServiceError;
use docvid_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Validation error: {0}")]
    Validation(#[from] SourceError),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Job state error: {0}")]
    Job(#[from] JobError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("Composition failed: {0}")]
    Compose(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Video not available: job is {status}")]
    VideoNotReady { status: JobStatus },

    #[error("Job cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CircuitError<WorkerError>> for WorkerError {
    fn from(e: CircuitError<WorkerError>) -> Self {
        match e {
            CircuitError::Open { service } => {
                WorkerError::Upstream(format!("{} circuit open", service))
            }
            CircuitError::Inner(inner) => inner,
        }
    }
}

impl WorkerError {
    pub fn compose(msg: impl Into<String>) -> Self {
        Self::Compose(msg.into())
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Cancellation is never retried; an open breaker fails the current
    /// attempt without another call; validation and state errors are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Service(e) => e.is_retryable(),
            WorkerError::Cancelled => false,
            WorkerError::Upstream(_) => false,
            _ => false,
        }
    }
}
