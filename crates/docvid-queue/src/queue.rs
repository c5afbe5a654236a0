//! Priority queue of pending jobs.
//!
//! Strict priority (urgent > high > normal > low), FIFO within a level.
//! Cancellation of a queued entry is lazy: the entry is tombstoned and
//! skipped at pop time, so cancel never pays for a heap rebuild.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use docvid_models::{JobId, JobPriority};

use crate::error::{QueueError, QueueResult};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum queued (not yet admitted) jobs
    pub max_size: usize,
    /// Requeue budget for failed jobs
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            max_retries: 3,
        }
    }
}

/// A job waiting in the queue.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: JobId,
    pub priority: JobPriority,
    pub enqueued_at: DateTime<Utc>,
    /// Admission sequence number; ties within a priority break FIFO
    seq: u64,
    pub source_size: u64,
    pub retry_count: u32,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier sequence
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub processing: usize,
    pub total_submitted: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<QueuedJob>,
    /// Job ids currently queued (live, not tombstoned)
    pending: HashSet<JobId>,
    /// Tombstones for cancelled-but-still-heaped entries
    cancelled: HashSet<JobId>,
    processing: HashMap<JobId, QueuedJob>,
    next_seq: u64,
    total_submitted: u64,
    total_completed: u64,
    total_failed: u64,
    total_cancelled: u64,
}

/// Priority-based in-process job queue.
pub struct JobQueue {
    config: QueueConfig,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Enqueue a job. Rejects duplicates and a full queue.
    pub fn submit(
        &self,
        job_id: JobId,
        priority: JobPriority,
        source_size: u64,
    ) -> QueueResult<usize> {
        let mut inner = self.inner.lock().unwrap();

        if inner.pending.contains(&job_id) || inner.processing.contains_key(&job_id) {
            return Err(QueueError::Duplicate(job_id.to_string()));
        }
        if inner.pending.len() >= self.config.max_size {
            warn!(job_id = %job_id, "Queue full, rejecting job");
            return Err(QueueError::Full {
                capacity: self.config.max_size,
            });
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.total_submitted += 1;

        inner.pending.insert(job_id.clone());
        inner.heap.push(QueuedJob {
            job_id: job_id.clone(),
            priority,
            enqueued_at: Utc::now(),
            seq,
            source_size,
            retry_count: 0,
        });

        let position = inner.pending.len();
        info!(
            job_id = %job_id,
            priority = priority.as_str(),
            queue_position = position,
            "Job submitted to queue"
        );

        self.notify.notify_one();
        Ok(position)
    }

    /// Pop the next live job, skipping tombstoned entries.
    pub fn pop(&self) -> Option<QueuedJob> {
        let mut inner = self.inner.lock().unwrap();

        while let Some(job) = inner.heap.pop() {
            if inner.cancelled.remove(&job.job_id) {
                debug!(job_id = %job.job_id, "Skipping cancelled queue entry");
                continue;
            }
            inner.pending.remove(&job.job_id);

            let wait_secs = (Utc::now() - job.enqueued_at).num_seconds();
            info!(
                job_id = %job.job_id,
                priority = job.priority.as_str(),
                wait_seconds = wait_secs,
                "Job leaving queue"
            );

            inner.processing.insert(job.job_id.clone(), job.clone());
            return Some(job);
        }

        None
    }

    /// Wait until a job is available, then pop it.
    pub async fn wait_and_pop(&self) -> QueuedJob {
        loop {
            let notified = self.notify.notified();
            if let Some(job) = self.pop() {
                return job;
            }
            notified.await;
        }
    }

    /// Mark an admitted job complete.
    pub fn complete(&self, job_id: &JobId) {
        let mut inner = self.inner.lock().unwrap();
        if inner.processing.remove(job_id).is_some() {
            inner.total_completed += 1;
        }
    }

    /// Mark an admitted job failed. With `retry` and budget remaining the
    /// job is requeued at its original priority (FIFO position reset);
    /// returns whether it was requeued.
    pub fn fail(&self, job_id: &JobId, error: &str, retry: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();

        let Some(mut job) = inner.processing.remove(job_id) else {
            return false;
        };

        if retry && job.retry_count < self.config.max_retries {
            job.retry_count += 1;
            job.enqueued_at = Utc::now();
            job.seq = inner.next_seq;
            inner.next_seq += 1;

            info!(
                job_id = %job_id,
                retry_count = job.retry_count,
                max_retries = self.config.max_retries,
                error,
                "Job failed, requeued"
            );

            inner.pending.insert(job.job_id.clone());
            inner.heap.push(job);
            drop(inner);
            self.notify.notify_one();
            true
        } else {
            inner.total_failed += 1;
            warn!(job_id = %job_id, retry_count = job.retry_count, error, "Job failed permanently");
            false
        }
    }

    /// Remove a still-queued job. Returns true if the job was pending;
    /// jobs already admitted are untouched (their cancellation is the
    /// orchestrator's token, not the queue's).
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.pending.remove(job_id) {
            inner.cancelled.insert(job_id.clone());
            inner.total_cancelled += 1;
            info!(job_id = %job_id, "Job cancelled while queued");
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> QueueStatus {
        let inner = self.inner.lock().unwrap();
        QueueStatus {
            queued: inner.pending.len(),
            processing: inner.processing.len(),
            total_submitted: inner.total_submitted,
            total_completed: inner.total_completed,
            total_failed: inner.total_failed,
            total_cancelled: inner.total_cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn queue() -> JobQueue {
        JobQueue::new(QueueConfig::default())
    }

    #[test]
    fn test_strict_priority_ordering() {
        let q = queue();
        let low = JobId::new();
        let urgent = JobId::new();
        let normal = JobId::new();

        q.submit(low.clone(), JobPriority::Low, 0).unwrap();
        q.submit(urgent.clone(), JobPriority::Urgent, 0).unwrap();
        q.submit(normal.clone(), JobPriority::Normal, 0).unwrap();

        assert_eq!(q.pop().unwrap().job_id, urgent);
        assert_eq!(q.pop().unwrap().job_id, normal);
        assert_eq!(q.pop().unwrap().job_id, low);
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let q = queue();
        let ids: Vec<JobId> = (0..4).map(|_| JobId::new()).collect();
        for id in &ids {
            q.submit(id.clone(), JobPriority::Normal, 0).unwrap();
        }

        for id in &ids {
            assert_eq!(&q.pop().unwrap().job_id, id);
        }
    }

    #[test]
    fn test_cancel_before_admission() {
        let q = queue();
        let keep = JobId::new();
        let drop_id = JobId::new();

        q.submit(keep.clone(), JobPriority::Normal, 0).unwrap();
        q.submit(drop_id.clone(), JobPriority::Urgent, 0).unwrap();

        assert!(q.cancel(&drop_id));
        assert!(!q.cancel(&drop_id));
        assert_eq!(q.len(), 1);

        // Tombstoned urgent entry is skipped despite higher priority
        assert_eq!(q.pop().unwrap().job_id, keep);
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_queue_full_rejection() {
        let q = JobQueue::new(QueueConfig {
            max_size: 2,
            max_retries: 3,
        });
        q.submit(JobId::new(), JobPriority::Normal, 0).unwrap();
        q.submit(JobId::new(), JobPriority::Normal, 0).unwrap();

        let result = q.submit(JobId::new(), JobPriority::Normal, 0);
        assert!(matches!(result, Err(QueueError::Full { capacity: 2 })));
    }

    #[test]
    fn test_duplicate_rejection() {
        let q = queue();
        let id = JobId::new();
        q.submit(id.clone(), JobPriority::Normal, 0).unwrap();
        assert!(matches!(
            q.submit(id.clone(), JobPriority::Normal, 0),
            Err(QueueError::Duplicate(_))
        ));
    }

    #[test]
    fn test_fail_requeues_within_budget() {
        let q = JobQueue::new(QueueConfig {
            max_size: 10,
            max_retries: 1,
        });
        let id = JobId::new();
        q.submit(id.clone(), JobPriority::Normal, 0).unwrap();

        let popped = q.pop().unwrap();
        assert_eq!(popped.retry_count, 0);
        assert!(q.fail(&id, "transient", true));

        let retried = q.pop().unwrap();
        assert_eq!(retried.retry_count, 1);
        assert!(!q.fail(&id, "still broken", true));
        assert_eq!(q.status().total_failed, 1);
    }

    #[test]
    fn test_status_counters() {
        let q = queue();
        let id = JobId::new();
        q.submit(id.clone(), JobPriority::High, 0).unwrap();
        q.pop().unwrap();
        q.complete(&id);

        let status = q.status();
        assert_eq!(status.total_submitted, 1);
        assert_eq!(status.total_completed, 1);
        assert_eq!(status.queued, 0);
        assert_eq!(status.processing, 0);
    }

    #[tokio::test]
    async fn test_wait_and_pop_wakes_on_submit() {
        let q = Arc::new(queue());
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.wait_and_pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = JobId::new();
        q.submit(id.clone(), JobPriority::Normal, 0).unwrap();

        let popped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(popped.job_id, id);
    }
}
