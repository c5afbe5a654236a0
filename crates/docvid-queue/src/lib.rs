//! In-process priority job queue.
//!
//! This crate provides:
//! - Strict-priority FIFO queueing of pending jobs
//! - Capacity limiting with queue-full rejection
//! - Retry-requeue bookkeeping and run statistics

pub mod error;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, QueueConfig, QueueStatus, QueuedJob};
