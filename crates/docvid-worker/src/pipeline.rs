//! Per-job pipeline: script -> asset fan-out -> compose.
//!
//! Phases are strictly ordered within a job. Within the asset phase, every
//! scene runs an audio task and a visual task concurrently, bounded by the
//! governor's per-kind slots. Scene failures are recorded on the scene and
//! never fail the job; the job fails only when no scene can be composed,
//! composition itself fails, or the script source cannot be read.
//!
//! Cancellation is checked before each phase, at every external-call
//! boundary, and between scene-task launches; a cancelled job skips
//! compose, enters terminal `cancelled`, and still runs cleanup.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use docvid_models::{
    AudioAsset, JobId, JobPhase, JobStatus, Scene, SceneOutcome, SceneStatus, Script,
};
use docvid_runtime::{retry_async, CacheNamespace, CacheValue, SlotKind};
use docvid_services::{fallback_script, TtsClient};

use crate::asset_router::{produce_visual_or_placeholder, VisualOutcome};
use crate::composer::ComposeScene;
use crate::context::ServiceContext;
use crate::error::{WorkerError, WorkerResult};

/// Progress landmarks. The asset phase scales completed scene-assets over
/// the span up to `ASSETS_DONE`; the last stretch belongs to compose.
const PROGRESS_STARTED: u8 = 5;
const PROGRESS_SCRIPT_REQUESTED: u8 = 15;
const PROGRESS_SCRIPT_DONE: u8 = 25;
const PROGRESS_ASSETS_DONE: u8 = 90;

/// Run one job to a terminal state. Always records the outcome; never
/// panics the worker loop.
pub async fn run_job(ctx: ServiceContext, job_id: JobId, token: CancellationToken) {
    let result = process(&ctx, &job_id, &token).await;

    match result {
        Ok(status) => {
            info!(job_id = %job_id, status = %status, "Job reached terminal state");
            ctx.queue.complete(&job_id);
        }
        Err(WorkerError::Cancelled) => {
            info!(job_id = %job_id, "Job cancelled");
            mark_cancelled(&ctx, &job_id);
            ctx.queue.complete(&job_id);
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Job failed");
            mark_failed(&ctx, &job_id, &e.to_string());
            ctx.queue.fail(&job_id, &e.to_string(), false);
        }
    }

    cleanup_work_dir(&ctx, &job_id).await;
}

/// The state machine proper. Returns the terminal status on success.
async fn process(
    ctx: &ServiceContext,
    job_id: &JobId,
    token: &CancellationToken,
) -> WorkerResult<JobStatus> {
    // pending -> processing (phase=script). A cancel can land between the
    // queue pop and this transition; the job must stay cancelled.
    let source = ctx.store.update(job_id, |job| {
        if job.status.is_terminal() {
            return Err(WorkerError::Cancelled);
        }
        job.start()?;
        job.set_phase(JobPhase::Script, "Extracting source text");
        job.set_progress(PROGRESS_STARTED);
        Ok(job.source.clone())
    })??;

    check_cancelled(token)?;

    let text = crate::extract::extract_text(&source).await?;

    ctx.store.update(job_id, |job| {
        job.set_phase(JobPhase::Script, "Generating script from source text");
        job.set_progress(PROGRESS_SCRIPT_REQUESTED);
    })?;

    let script = script_phase(ctx, token, &text, &source.filename).await?;
    script.validate()?;

    check_cancelled(token)?;

    let scene_count = script.len();
    ctx.store.update(job_id, |job| {
        job.script = Some(script.clone());
        job.set_phase(
            JobPhase::Audio,
            format!("Generated script with {} scenes", scene_count),
        );
        job.set_progress(PROGRESS_SCRIPT_DONE);
    })?;

    // Fan-out: one audio and one visual task per scene
    asset_phase(ctx, job_id, token, &script).await?;

    check_cancelled(token)?;

    // Compose over the successful scenes in script order
    compose_phase(ctx, job_id, token, &script).await
}

fn check_cancelled(token: &CancellationToken) -> WorkerResult<()> {
    if token.is_cancelled() {
        Err(WorkerError::Cancelled)
    } else {
        Ok(())
    }
}

/// Script via cache -> breaker -> retry -> LLM, with the deterministic
/// fallback when the model is unavailable or keeps producing bad output.
async fn script_phase(
    ctx: &ServiceContext,
    token: &CancellationToken,
    text: &str,
    filename: &str,
) -> WorkerResult<Script> {
    let fingerprint = ctx.llm.script_fingerprint(text);

    let producer = {
        let llm = Arc::clone(&ctx.llm);
        let breaker = Arc::clone(&ctx.llm_breaker);
        let policy = ctx.config.retry.clone();
        let token = token.clone();
        let text = text.to_string();
        let filename = filename.to_string();

        move || {
            Box::pin(async move {
                let result = breaker
                    .call(|| {
                        retry_async(
                            &policy,
                            "llm_script",
                            |e: &WorkerError| e.is_retryable(),
                            || async {
                                if token.is_cancelled() {
                                    return Err(WorkerError::Cancelled);
                                }
                                let script = llm.generate_script(&text, &filename).await?;
                                Ok(CacheValue::Script(script))
                            },
                        )
                    })
                    .await;
                result.map_err(WorkerError::from)
            }) as futures::future::BoxFuture<'static, Result<CacheValue, WorkerError>>
        }
    };

    match ctx
        .cache
        .get_or_compute(CacheNamespace::Script, &fingerprint, producer)
        .await
    {
        Ok(CacheValue::Script(script)) => Ok(script),
        Ok(_) => {
            warn!("Script cache returned a non-script value, falling back");
            Ok(fallback_script(text))
        }
        Err(_) if token.is_cancelled() => Err(WorkerError::Cancelled),
        Err(e) => {
            warn!(error = %e, "Script generation failed, using fallback script");
            Ok(fallback_script(text))
        }
    }
}

/// Tracks completed scene-assets and projects them onto the progress bar.
struct AssetProgress {
    done: AtomicUsize,
    total: usize,
}

impl AssetProgress {
    fn new(total: usize) -> Self {
        Self {
            done: AtomicUsize::new(0),
            total,
        }
    }

    fn bump(&self, ctx: &ServiceContext, job_id: &JobId) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let span = PROGRESS_ASSETS_DONE - PROGRESS_SCRIPT_DONE;
        let progress =
            PROGRESS_SCRIPT_DONE + ((done * span as usize) / self.total.max(1)) as u8;
        ctx.store
            .update(job_id, |job| job.set_progress(progress))
            .ok();
    }
}

/// Launch the per-scene audio/visual pairs and record their outcomes.
async fn asset_phase(
    ctx: &ServiceContext,
    job_id: &JobId,
    token: &CancellationToken,
    script: &Script,
) -> WorkerResult<()> {
    ctx.store.update(job_id, |job| {
        job.set_phase(JobPhase::Visual, "Generating audio and visual assets");
    })?;

    let progress = Arc::new(AssetProgress::new(script.len() * 2));
    let mut tasks = Vec::with_capacity(script.len());

    for scene in &script.scenes {
        // Cancellation between scene-task launches
        if token.is_cancelled() {
            break;
        }

        let ctx = ctx.clone();
        let job_id = job_id.clone();
        let token = token.clone();
        let scene = scene.clone();
        let progress = Arc::clone(&progress);

        tasks.push(tokio::spawn(async move {
            process_scene(&ctx, &job_id, &token, &scene, &progress).await
        }));
    }

    let results = join_all(tasks).await;

    if token.is_cancelled() {
        return Err(WorkerError::Cancelled);
    }

    for result in results {
        match result {
            Ok((scene_id, outcome)) => {
                ctx.store
                    .update(job_id, |job| job.set_scene_outcome(scene_id, outcome))?;
            }
            Err(join_err) => {
                error!(error = %join_err, "Scene task panicked");
            }
        }
    }

    ctx.store
        .update(job_id, |job| job.set_progress(PROGRESS_ASSETS_DONE))?;
    Ok(())
}

/// Run one scene's audio and visual tasks concurrently and fold the
/// results into its outcome.
async fn process_scene(
    ctx: &ServiceContext,
    job_id: &JobId,
    token: &CancellationToken,
    scene: &Scene,
    progress: &AssetProgress,
) -> (u32, SceneOutcome) {
    let audio_task = async {
        let result = produce_audio(ctx, token, scene).await;
        progress.bump(ctx, job_id);
        result
    };
    let visual_task = async {
        let result = produce_visual_or_placeholder(ctx, token, scene).await;
        progress.bump(ctx, job_id);
        result
    };

    let (audio_result, visual_result) = tokio::join!(audio_task, visual_task);

    let mut outcome = SceneOutcome {
        status: SceneStatus::Processing,
        ..Default::default()
    };
    let mut errors = Vec::new();

    match audio_result {
        Ok(asset) => outcome.audio = Some(asset),
        Err(WorkerError::Cancelled) => {}
        Err(e) => errors.push(format!("audio: {}", e)),
    }

    match visual_result {
        VisualOutcome::Ok(asset) => outcome.visual = Some(asset),
        VisualOutcome::Cancelled => {}
        VisualOutcome::Failed { placeholder, error } => {
            // The placeholder is recorded so the file is tracked for
            // retention, but the scene still counts as failed.
            outcome.visual = placeholder;
            errors.push(format!("visual: {}", error));
        }
    }

    outcome.status = if errors.is_empty() && outcome.audio.is_some() && outcome.visual.is_some() {
        SceneStatus::Completed
    } else {
        SceneStatus::Failed
    };
    if !errors.is_empty() {
        outcome.error = Some(errors.join("; "));
    }

    (scene.id, outcome)
}

/// Audio via cache -> breaker -> retry -> tts slot -> synthesis.
async fn produce_audio(
    ctx: &ServiceContext,
    token: &CancellationToken,
    scene: &Scene,
) -> WorkerResult<AudioAsset> {
    if token.is_cancelled() {
        return Err(WorkerError::Cancelled);
    }

    scene.validate()?;

    let fingerprint = ctx.tts.fingerprint(&scene.narration_text);

    // A cached waveform may have been swept away; invalidate and re-run once.
    for _ in 0..2 {
        let producer = {
            let tts = Arc::clone(&ctx.tts);
            let breaker = Arc::clone(&ctx.tts_breaker);
            let governor = Arc::clone(&ctx.governor);
            let policy = ctx.config.retry.clone();
            let token = token.clone();
            let text = scene.narration_text.clone();
            let scene_id = scene.id;

            move || {
                Box::pin(async move {
                    let result = breaker
                        .call(|| {
                            retry_async(
                                &policy,
                                "tts_synthesize",
                                |e: &WorkerError| e.is_retryable(),
                                || async {
                                    if token.is_cancelled() {
                                        return Err(WorkerError::Cancelled);
                                    }
                                    let _permit = governor.acquire(SlotKind::Tts).await?;
                                    let audio = tts.synthesize(scene_id, &text).await?;
                                    Ok(CacheValue::Audio {
                                        path: audio.path,
                                        duration_seconds: audio.duration_seconds,
                                    })
                                },
                            )
                        })
                        .await;
                    result.map_err(WorkerError::from)
                }) as futures::future::BoxFuture<'static, Result<CacheValue, WorkerError>>
            }
        };

        let value = match ctx
            .cache
            .get_or_compute(CacheNamespace::Audio, &fingerprint, producer)
            .await
        {
            Ok(v) => v,
            Err(_) if token.is_cancelled() => return Err(WorkerError::Cancelled),
            Err(e) => return Err(e.into()),
        };

        if let CacheValue::Audio {
            path,
            duration_seconds,
        } = value
        {
            if TtsClient::cached_file_exists(&path) {
                return Ok(AudioAsset {
                    scene_id: scene.id,
                    path,
                    duration_seconds,
                    fingerprint: fingerprint.clone(),
                });
            }
            warn!(scene_id = scene.id, "Cached waveform is gone, re-synthesizing");
            ctx.cache.invalidate(CacheNamespace::Audio, &fingerprint);
        } else {
            ctx.cache.invalidate(CacheNamespace::Audio, &fingerprint);
        }
    }

    Err(WorkerError::compose(format!(
        "Audio for scene {} vanished after re-synthesis",
        scene.id
    )))
}

/// What a job's terminal state should be after compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalDecision {
    /// No scene produced both assets; compose never runs.
    Failed,
    /// Every scene completed.
    Completed,
    /// A successful subset composed.
    CompletedWithErrors,
}

/// Decide the terminal status from scene accounting. Pinned: zero
/// composable scenes is a failure, not a degraded success.
pub fn decide_terminal(completed: usize, failed: usize) -> TerminalDecision {
    if completed == 0 {
        TerminalDecision::Failed
    } else if failed > 0 {
        TerminalDecision::CompletedWithErrors
    } else {
        TerminalDecision::Completed
    }
}

async fn compose_phase(
    ctx: &ServiceContext,
    job_id: &JobId,
    token: &CancellationToken,
    script: &Script,
) -> WorkerResult<JobStatus> {
    check_cancelled(token)?;

    let job = ctx
        .store
        .get(job_id)
        .ok_or_else(|| WorkerError::NotFound(job_id.to_string()))?;

    let completed = job.completed_scene_count();
    let failed = job.failed_scene_count();

    match decide_terminal(completed, failed) {
        TerminalDecision::Failed => Err(WorkerError::compose(
            "No scene produced both audio and visual assets",
        )),
        decision => {
            ctx.store.update(job_id, |j| {
                j.set_phase(JobPhase::Compose, "Composing final video");
            })?;

            // Successful scenes in script order
            let compose_scenes: Vec<ComposeScene> = script
                .scenes
                .iter()
                .filter_map(|scene| {
                    let outcome = job.scenes.get(&scene.id)?;
                    if outcome.status != SceneStatus::Completed {
                        return None;
                    }
                    Some(ComposeScene {
                        scene_id: scene.id,
                        visual_path: outcome.visual.as_ref()?.path.clone(),
                        audio_path: outcome.audio.as_ref()?.path.clone(),
                    })
                })
                .collect();

            let work_dir = ctx.config.work_dir.join(job_id.as_str());
            let video = ctx.composer.compose(job_id, &compose_scenes, &work_dir).await?;

            let status = if decision == TerminalDecision::CompletedWithErrors {
                ctx.store
                    .update(job_id, |j| j.complete_with_errors(video.clone()))??;
                JobStatus::CompletedWithErrors
            } else {
                ctx.store.update(job_id, |j| j.complete(video.clone()))??;
                JobStatus::Completed
            };

            Ok(status)
        }
    }
}

fn mark_cancelled(ctx: &ServiceContext, job_id: &JobId) {
    ctx.store
        .update(job_id, |job| {
            if !job.status.is_terminal() {
                job.cancel("Cancelled during processing").ok();
            }
        })
        .ok();
}

fn mark_failed(ctx: &ServiceContext, job_id: &JobId, error: &str) {
    ctx.store
        .update(job_id, |job| {
            if !job.status.is_terminal() {
                job.fail(error).ok();
            }
        })
        .ok();
}

async fn cleanup_work_dir(ctx: &ServiceContext, job_id: &JobId) {
    let work_dir = ctx.config.work_dir.join(job_id.as_str());
    if work_dir.exists() {
        tokio::fs::remove_dir_all(&work_dir).await.ok();
    }
}
