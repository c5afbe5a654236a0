//! Orchestrator surface tests: submission, validation, cancellation, and
//! status projection - everything that must work without any external
//! service reachable.

use std::sync::Arc;

use docvid_models::{JobPriority, JobStatus, MAX_UPLOAD_BYTES};
use docvid_runtime::ResourceLimits;
use docvid_store::StoreConfig;
use docvid_worker::{Orchestrator, ServiceContext, WorkerConfig, WorkerError};

fn test_orchestrator(dir: &tempfile::TempDir) -> Arc<Orchestrator> {
    let config = WorkerConfig {
        store: StoreConfig {
            snapshot_path: dir.path().join("job_store.json"),
            ..Default::default()
        },
        limits: ResourceLimits {
            cpu_soft_ceiling: 1000.0,
            memory_soft_ceiling: 1000.0,
            memory_cleanup_ceiling: 1000.0,
            ..Default::default()
        },
        video_dir: dir.path().join("videos"),
        work_dir: dir.path().join("work"),
        ..Default::default()
    };

    let ctx = ServiceContext::new(config).expect("context should build");
    Arc::new(Orchestrator::new(ctx))
}

#[tokio::test]
async fn test_submit_creates_pending_job() {
    let dir = tempfile::tempdir().unwrap();
    let orch = test_orchestrator(&dir);

    let job_id = orch
        .submit("/tmp/doc.txt", "doc.txt", 2048, JobPriority::Normal)
        .unwrap();

    let view = orch.status(&job_id).unwrap();
    assert_eq!(view.status, JobStatus::Pending);
    assert_eq!(view.progress, 0);
    assert!(view.result.is_none());

    assert_eq!(orch.context().queue.len(), 1);
}

#[tokio::test]
async fn test_submit_rejects_oversized_upload() {
    let dir = tempfile::tempdir().unwrap();
    let orch = test_orchestrator(&dir);

    // Exactly at the boundary is accepted
    assert!(orch
        .submit("/tmp/a.txt", "a.txt", MAX_UPLOAD_BYTES, JobPriority::Normal)
        .is_ok());

    // One byte over is a validation error
    let result = orch.submit(
        "/tmp/b.txt",
        "b.txt",
        MAX_UPLOAD_BYTES + 1,
        JobPriority::Normal,
    );
    assert!(matches!(result, Err(WorkerError::Validation(_))));
}

#[tokio::test]
async fn test_submit_rejects_unsupported_type() {
    let dir = tempfile::tempdir().unwrap();
    let orch = test_orchestrator(&dir);

    let result = orch.submit("/tmp/x.docx", "x.docx", 100, JobPriority::Normal);
    assert!(matches!(result, Err(WorkerError::Validation(_))));
}

#[tokio::test]
async fn test_cancel_before_admission() {
    let dir = tempfile::tempdir().unwrap();
    let orch = test_orchestrator(&dir);

    let job_id = orch
        .submit("/tmp/doc.txt", "doc.txt", 2048, JobPriority::High)
        .unwrap();

    // No run loop is active, so the job sits queued; cancel must remove it
    let cancelled = orch.cancel(&job_id, "changed my mind").unwrap();
    assert!(cancelled);

    let view = orch.status(&job_id).unwrap();
    assert_eq!(view.status, JobStatus::Cancelled);
    assert_eq!(orch.context().queue.len(), 0);

    // Cancelling again is a no-op on a terminal job
    assert!(!orch.cancel(&job_id, "again").unwrap());
}

#[tokio::test]
async fn test_video_path_requires_completion() {
    let dir = tempfile::tempdir().unwrap();
    let orch = test_orchestrator(&dir);

    let job_id = orch
        .submit("/tmp/doc.txt", "doc.txt", 2048, JobPriority::Normal)
        .unwrap();

    let result = orch.video_path(&job_id);
    assert!(matches!(
        result,
        Err(WorkerError::VideoNotReady {
            status: JobStatus::Pending
        })
    ));
}

#[tokio::test]
async fn test_status_of_unknown_job() {
    let dir = tempfile::tempdir().unwrap();
    let orch = test_orchestrator(&dir);

    let unknown = docvid_models::JobId::new();
    assert!(matches!(
        orch.status(&unknown),
        Err(WorkerError::NotFound(_))
    ));
    assert!(matches!(
        orch.video_path(&unknown),
        Err(WorkerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_and_list_active() {
    let dir = tempfile::tempdir().unwrap();
    let orch = test_orchestrator(&dir);

    let first = orch
        .submit("/tmp/a.txt", "a.txt", 100, JobPriority::Normal)
        .unwrap();
    let second = orch
        .submit("/tmp/b.md", "b.md", 100, JobPriority::Low)
        .unwrap();

    assert_eq!(orch.list(10).len(), 2);
    assert_eq!(orch.list_active(10).len(), 2);

    orch.cancel(&first, "done with it").unwrap();
    let active = orch.list_active(10);
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].job_id, second);
    assert_eq!(orch.list(10).len(), 2);
}

#[tokio::test]
async fn test_duplicate_submit_ids_never_collide() {
    let dir = tempfile::tempdir().unwrap();
    let orch = test_orchestrator(&dir);

    let mut seen = std::collections::HashSet::new();
    for _ in 0..20 {
        let id = orch
            .submit("/tmp/doc.txt", "doc.txt", 512, JobPriority::Normal)
            .unwrap();
        assert!(seen.insert(id));
    }
}
