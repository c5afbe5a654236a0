//! Orchestrator: the programmatic surface the HTTP layer calls.
//!
//! Owns the worker run loop (admission gated by job slots) and the per-job
//! cancellation registry. All public operations are cheap; the expensive
//! work happens in spawned pipeline tasks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use docvid_models::{Job, JobId, JobPriority, JobView, SourceDocument};
use docvid_queue::QueueStatus;
use docvid_runtime::{CircuitState, ResourceSnapshot, SlotKind};

use crate::context::ServiceContext;
use crate::error::{WorkerError, WorkerResult};
use crate::pipeline;

/// Health report for the `health()` operation.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub llm: bool,
    pub tts: bool,
    pub breakers: BreakerStates,
    pub resources: ResourceSnapshot,
    pub queue: QueueStatus,
}

#[derive(Debug, Serialize)]
pub struct BreakerStates {
    pub llm: CircuitState,
    pub tts: CircuitState,
    pub visual: CircuitState,
}

/// Drives jobs from submission to completion.
pub struct Orchestrator {
    ctx: ServiceContext,
    tokens: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            ctx,
            tokens: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    /// Token the run loop observes; cancel it to stop admitting jobs.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Validate and enqueue a submission. Validation failures surface to
    /// the caller and never reach the pipeline.
    pub fn submit(
        &self,
        path: impl Into<PathBuf>,
        filename: impl Into<String>,
        size_bytes: u64,
        priority: JobPriority,
    ) -> WorkerResult<JobId> {
        let source = SourceDocument::new(path, filename, size_bytes)?;
        let job = Job::new(source, priority);
        let job_id = job.id.clone();

        self.ctx.store.create(job)?;
        if let Err(e) = self.ctx.queue.submit(job_id.clone(), priority, size_bytes) {
            // Enqueue failed (full queue): drop the record so the id does
            // not linger as a permanently-pending job.
            self.ctx.store.delete(&job_id);
            return Err(e.into());
        }

        info!(job_id = %job_id, priority = priority.as_str(), "Job submitted");
        Ok(job_id)
    }

    /// Read-only status projection.
    pub fn status(&self, job_id: &JobId) -> WorkerResult<JobView> {
        self.ctx
            .store
            .view(job_id)
            .ok_or_else(|| WorkerError::NotFound(job_id.to_string()))
    }

    /// Cancel a job. Never blocks: queued jobs are tombstoned, running jobs
    /// observe their token at phase entries and external-call boundaries.
    /// Returns whether the job moved to cancelled (false when it was
    /// already terminal).
    pub fn cancel(&self, job_id: &JobId, reason: &str) -> WorkerResult<bool> {
        if let Some(token) = self.tokens.lock().unwrap().get(job_id) {
            token.cancel();
        }
        self.ctx.queue.cancel(job_id);

        let cancelled = self.ctx.store.update(job_id, |job| {
            if job.status.is_terminal() {
                false
            } else {
                job.cancel(reason).is_ok()
            }
        })?;

        if cancelled {
            info!(job_id = %job_id, reason, "Job cancelled");
        }
        Ok(cancelled)
    }

    pub fn list(&self, limit: usize) -> Vec<JobView> {
        self.ctx.store.list(limit)
    }

    pub fn list_active(&self, limit: usize) -> Vec<JobView> {
        self.ctx.store.list_active(limit)
    }

    /// Path of the finished video. Errors unless the job completed.
    pub fn video_path(&self, job_id: &JobId) -> WorkerResult<PathBuf> {
        let job = self
            .ctx
            .store
            .get(job_id)
            .ok_or_else(|| WorkerError::NotFound(job_id.to_string()))?;

        if !job.status.has_output() {
            return Err(WorkerError::VideoNotReady { status: job.status });
        }

        job.video
            .map(|v| v.path)
            .ok_or(WorkerError::VideoNotReady { status: job.status })
    }

    /// Probe the external services and report breaker/resource state.
    pub async fn health(&self) -> HealthReport {
        let (llm_ok, tts_ok) = tokio::join!(self.ctx.llm.health_check(), self.ctx.tts.health_check());

        let breakers = BreakerStates {
            llm: self.ctx.llm_breaker.state(),
            tts: self.ctx.tts_breaker.state(),
            visual: self.ctx.visual_breaker.state(),
        };

        let degraded = !llm_ok
            || !tts_ok
            || breakers.llm != CircuitState::Closed
            || breakers.tts != CircuitState::Closed
            || breakers.visual != CircuitState::Closed;

        HealthReport {
            status: if degraded { "degraded" } else { "healthy" },
            llm: llm_ok,
            tts: tts_ok,
            breakers,
            resources: self.ctx.governor.snapshot(),
            queue: self.ctx.queue.status(),
        }
    }

    /// Worker loop: admit queued jobs as job slots free up and spawn their
    /// pipelines. Runs until shutdown, then waits for in-flight jobs.
    pub async fn run(self: Arc<Self>) -> WorkerResult<()> {
        info!(
            max_concurrent_jobs = self.ctx.config.limits.max_concurrent_jobs,
            "Orchestrator started"
        );

        loop {
            let queued = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                queued = self.ctx.queue.wait_and_pop() => queued,
            };

            // Admission requires a job slot
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.ctx.governor.acquire(SlotKind::Job) => match permit {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "Governor closed, stopping admission");
                        break;
                    }
                },
            };

            let token = CancellationToken::new();
            self.tokens
                .lock()
                .unwrap()
                .insert(queued.job_id.clone(), token.clone());

            let ctx = self.ctx.clone();
            let tokens = Arc::clone(&self.tokens);
            let job_id = queued.job_id.clone();

            tokio::spawn(async move {
                let _permit = permit;
                pipeline::run_job(ctx, job_id.clone(), token).await;
                tokens.lock().unwrap().remove(&job_id);
            });
        }

        info!("Shutdown requested, waiting for in-flight jobs");
        self.wait_for_jobs(self.ctx.config.shutdown_timeout).await;
        info!("Orchestrator stopped");
        Ok(())
    }

    /// Wait until all job slots are free or the grace period elapses.
    async fn wait_for_jobs(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.ctx.governor.snapshot().jobs.in_use == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("Shutdown grace period elapsed with jobs still running");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
