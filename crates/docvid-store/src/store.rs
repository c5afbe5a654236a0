//! Job store: id -> Job mapping with snapshot persistence and retention.
//!
//! Persistence is "write the whole store to JSON periodically" - best-effort
//! durability under a single writer, not a transaction log. On startup the
//! snapshot is loaded if present; a corrupt snapshot is discarded rather
//! than blocking startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use docvid_models::{Job, JobId, JobView};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Duplicate job id: {0}")]
    Duplicate(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Snapshot file location
    pub snapshot_path: PathBuf,
    /// Interval between background snapshots
    pub snapshot_interval: Duration,
    /// Age after which terminal jobs are removed
    pub retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("job_store.json"),
            snapshot_interval: Duration::from_secs(60),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Process-wide mapping from job id to job record.
pub struct JobStore {
    config: StoreConfig,
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new(config: StoreConfig) -> Self {
        let store = Self {
            config,
            jobs: RwLock::new(HashMap::new()),
        };
        store.load();
        store
    }

    /// Insert a new job. Ids are unique for the lifetime of the store.
    pub fn create(&self, job: Job) -> StoreResult<()> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id.to_string()));
        }
        debug!(job_id = %job.id, "Job created in store");
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Mutate a job under the store's write lock.
    ///
    /// The closure sees the current record; concurrent updates to the same
    /// id serialize here.
    pub fn update<F, R>(&self, job_id: &JobId, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Job) -> R,
    {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        Ok(f(job))
    }

    /// Clone the current record.
    pub fn get(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.read().unwrap().get(job_id).cloned()
    }

    /// Read-only status projection.
    pub fn view(&self, job_id: &JobId) -> Option<JobView> {
        self.jobs.read().unwrap().get(job_id).map(|j| j.view())
    }

    /// Most recently created jobs first.
    pub fn list(&self, limit: usize) -> Vec<JobView> {
        let jobs = self.jobs.read().unwrap();
        let mut all: Vec<&Job> = jobs.values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.into_iter().take(limit).map(|j| j.view()).collect()
    }

    /// Non-terminal jobs, most recently updated first.
    pub fn list_active(&self, limit: usize) -> Vec<JobView> {
        let jobs = self.jobs.read().unwrap();
        let mut active: Vec<&Job> = jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .collect();
        active.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        active.into_iter().take(limit).map(|j| j.view()).collect()
    }

    pub fn delete(&self, job_id: &JobId) -> bool {
        self.jobs.write().unwrap().remove(job_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove terminal jobs older than `max_age` and delete their on-disk
    /// assets. Returns the number of jobs removed.
    pub fn cleanup_expired(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(max_age).unwrap_or_else(|_| ChronoDuration::hours(24));

        let expired: Vec<Job> = {
            let jobs = self.jobs.read().unwrap();
            jobs.values()
                .filter(|j| j.status.is_terminal() && j.updated_at < cutoff)
                .cloned()
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        {
            let mut jobs = self.jobs.write().unwrap();
            for job in &expired {
                jobs.remove(&job.id);
            }
        }

        for job in &expired {
            remove_job_assets(job);
        }

        info!(removed = expired.len(), "Retention sweep removed expired jobs");
        expired.len()
    }

    /// Write the whole store to the snapshot file (atomic tmp-file rename).
    pub fn snapshot(&self) -> StoreResult<()> {
        let payload = {
            let jobs = self.jobs.read().unwrap();
            serde_json::to_vec_pretty(&*jobs)
                .map_err(|e| StoreError::Persistence(e.to_string()))?
        };

        if let Some(parent) = self.config.snapshot_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Persistence(e.to_string()))?;
            }
        }

        let tmp = self.config.snapshot_path.with_extension("json.tmp");
        std::fs::write(&tmp, &payload).map_err(|e| StoreError::Persistence(e.to_string()))?;
        std::fs::rename(&tmp, &self.config.snapshot_path)
            .map_err(|e| StoreError::Persistence(e.to_string()))?;

        debug!(
            path = %self.config.snapshot_path.display(),
            bytes = payload.len(),
            "Store snapshot written"
        );
        Ok(())
    }

    /// Load the snapshot if one exists. Corrupt data is discarded.
    fn load(&self) {
        let path = &self.config.snapshot_path;
        if !path.exists() {
            return;
        }

        match std::fs::read(path) {
            Ok(data) => match serde_json::from_slice::<HashMap<JobId, Job>>(&data) {
                Ok(loaded) => {
                    info!(jobs = loaded.len(), "Loaded job store snapshot");
                    *self.jobs.write().unwrap() = loaded;
                }
                Err(e) => warn!(error = %e, "Discarding corrupt job store snapshot"),
            },
            Err(e) => warn!(error = %e, "Failed to read job store snapshot"),
        }
    }

    /// Run the background sweeper: periodic snapshot + retention, with one
    /// final snapshot when `shutdown` fires.
    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.snapshot_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sweeper shutting down, taking final snapshot");
                    if let Err(e) = self.snapshot() {
                        error!(error = %e, "Final snapshot failed");
                    }
                    return;
                }
                _ = interval.tick() => {
                    self.cleanup_expired(self.config.retention);
                    if let Err(e) = self.snapshot() {
                        error!(error = %e, "Periodic snapshot failed");
                    }
                }
            }
        }
    }
}

/// Delete a job's persisted assets: per-scene audio/visual files and the
/// final video. Missing files are fine; the sweep is idempotent.
fn remove_job_assets(job: &Job) {
    let mut paths: Vec<&Path> = Vec::new();

    for outcome in job.scenes.values() {
        if let Some(audio) = &outcome.audio {
            paths.push(&audio.path);
        }
        if let Some(visual) = &outcome.visual {
            paths.push(&visual.path);
        }
    }
    if let Some(video) = &job.video {
        paths.push(&video.path);
    }

    for path in paths {
        if path.as_os_str().is_empty() {
            continue;
        }
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove expired asset");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docvid_models::{JobPriority, JobStatus, SourceDocument};

    fn test_job() -> Job {
        let source = SourceDocument::new("/tmp/doc.txt", "doc.txt", 1024).unwrap();
        Job::new(source, JobPriority::Normal)
    }

    fn temp_store() -> (JobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(StoreConfig {
            snapshot_path: dir.path().join("job_store.json"),
            ..Default::default()
        });
        (store, dir)
    }

    #[test]
    fn test_create_get_update() {
        let (store, _dir) = temp_store();
        let job = test_job();
        let id = job.id.clone();

        store.create(job).unwrap();
        assert!(store.get(&id).is_some());

        store
            .update(&id, |j| {
                j.start().unwrap();
                j.set_progress(30);
            })
            .unwrap();

        let loaded = store.get(&id).unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
        assert_eq!(loaded.progress, 30);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let (store, _dir) = temp_store();
        let job = test_job();
        let dup = job.clone();

        store.create(job).unwrap();
        assert!(matches!(store.create(dup), Err(StoreError::Duplicate(_))));
    }

    #[test]
    fn test_update_missing_job() {
        let (store, _dir) = temp_store();
        let result = store.update(&JobId::new(), |_| ());
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_list_active_excludes_terminal() {
        let (store, _dir) = temp_store();

        let active = test_job();
        let active_id = active.id.clone();
        store.create(active).unwrap();

        let mut done = test_job();
        done.start().unwrap();
        done.fail("broke").unwrap();
        store.create(done).unwrap();

        let listed = store.list_active(10);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].job_id, active_id);
        assert_eq!(store.list(10).len(), 2);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_store.json");

        let job = test_job();
        let id = job.id.clone();
        {
            let store = JobStore::new(StoreConfig {
                snapshot_path: path.clone(),
                ..Default::default()
            });
            store.create(job).unwrap();
            store.snapshot().unwrap();
        }

        let reloaded = JobStore::new(StoreConfig {
            snapshot_path: path,
            ..Default::default()
        });
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get(&id).is_some());
    }

    #[test]
    fn test_corrupt_snapshot_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_store.json");
        std::fs::write(&path, b"{not valid json").unwrap();

        let store = JobStore::new(StoreConfig {
            snapshot_path: path,
            ..Default::default()
        });
        assert!(store.is_empty());
    }

    #[test]
    fn test_cleanup_removes_old_terminal_jobs_only() {
        let (store, _dir) = temp_store();

        let mut old_done = test_job();
        old_done.start().unwrap();
        old_done.fail("old failure").unwrap();
        old_done.updated_at = Utc::now() - ChronoDuration::hours(48);
        let old_id = old_done.id.clone();
        store.create(old_done).unwrap();

        let mut old_cancelled = test_job();
        old_cancelled.cancel("stale").unwrap();
        old_cancelled.updated_at = Utc::now() - ChronoDuration::hours(48);
        store.create(old_cancelled).unwrap();

        let fresh = test_job();
        let fresh_id = fresh.id.clone();
        store.create(fresh).unwrap();

        let mut old_active = test_job();
        old_active.start().unwrap();
        old_active.updated_at = Utc::now() - ChronoDuration::hours(48);
        let active_id = old_active.id.clone();
        store.create(old_active).unwrap();

        let removed = store.cleanup_expired(Duration::from_secs(24 * 3600));
        assert_eq!(removed, 2);
        assert!(store.get(&old_id).is_none());
        assert!(store.get(&fresh_id).is_some());
        // Non-terminal jobs survive regardless of age
        assert!(store.get(&active_id).is_some());
    }

    #[tokio::test]
    async fn test_sweeper_final_snapshot_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_store.json");

        let store = Arc::new(JobStore::new(StoreConfig {
            snapshot_path: path.clone(),
            snapshot_interval: Duration::from_secs(3600),
            ..Default::default()
        }));
        store.create(test_job()).unwrap();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&store).run_sweeper(shutdown.clone()));

        shutdown.cancel();
        handle.await.unwrap();

        assert!(path.exists());
    }
}
