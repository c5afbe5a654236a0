//! Visual asset production.
//!
//! Dispatch on the scene's visual type happens inside the visual client;
//! this module owns the wrapping order around the raw render call:
//! cache -> circuit breaker -> retry -> visual slot -> renderer.
//!
//! Rendering failures never propagate to the job: the scene gets an error
//! placeholder and a failed outcome, and composition proceeds with the
//! scenes that worked.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use docvid_models::{Scene, VisualAsset};
use docvid_runtime::{retry_async, CacheNamespace, CacheValue, SlotKind};

use crate::context::ServiceContext;
use crate::error::{WorkerError, WorkerResult};

/// Result of producing a scene's visual.
#[derive(Debug)]
pub enum VisualOutcome {
    /// Rendered successfully.
    Ok(VisualAsset),
    /// Rendering failed for good; a placeholder stands in when one could
    /// be written.
    Failed {
        placeholder: Option<VisualAsset>,
        error: String,
    },
    /// The job was cancelled while this visual was in flight.
    Cancelled,
}

/// Produce the visual for a scene through the full wrap chain.
pub async fn produce_visual(
    ctx: &ServiceContext,
    token: &CancellationToken,
    scene: &Scene,
) -> WorkerResult<VisualAsset> {
    if token.is_cancelled() {
        return Err(WorkerError::Cancelled);
    }

    scene.validate()?;

    let fingerprint = ctx.visual.fingerprint(scene.visual_type, &scene.visual_prompt);

    // Two passes: a cached path may dangle after a retention sweep, in
    // which case the entry is invalidated and the visual re-rendered.
    for _ in 0..2 {
        let value = ctx
            .cache
            .get_or_compute(
                CacheNamespace::Visual,
                &fingerprint,
                render_producer(ctx, token, scene),
            )
            .await;

        let value = match value {
            Ok(v) => v,
            Err(_) if token.is_cancelled() => return Err(WorkerError::Cancelled),
            Err(e) => return Err(e.into()),
        };

        if let CacheValue::Visual {
            path,
            width,
            height,
            format,
        } = value
        {
            if path.is_file() {
                return Ok(VisualAsset {
                    scene_id: scene.id,
                    path,
                    width,
                    height,
                    format,
                    fingerprint: fingerprint.clone(),
                });
            }
            warn!(
                scene_id = scene.id,
                "Cached visual file is gone, re-rendering"
            );
            ctx.cache.invalidate(CacheNamespace::Visual, &fingerprint);
        } else {
            ctx.cache.invalidate(CacheNamespace::Visual, &fingerprint);
        }
    }

    Err(WorkerError::compose(format!(
        "Visual for scene {} vanished after re-render",
        scene.id
    )))
}

/// Build the cache producer: breaker around retry around a slot-gated
/// render call.
fn render_producer(
    ctx: &ServiceContext,
    token: &CancellationToken,
    scene: &Scene,
) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<CacheValue, WorkerError>> {
    let visual = Arc::clone(&ctx.visual);
    let breaker = Arc::clone(&ctx.visual_breaker);
    let governor = Arc::clone(&ctx.governor);
    let policy = ctx.config.retry.clone();
    let token = token.clone();
    let visual_type = scene.visual_type;
    let prompt = scene.visual_prompt.clone();
    let scene_id = scene.id;

    move || {
        Box::pin(async move {
            let result = breaker
                .call(|| {
                    retry_async(
                        &policy,
                        "visual_render",
                        |e: &WorkerError| e.is_retryable(),
                        || async {
                            if token.is_cancelled() {
                                return Err(WorkerError::Cancelled);
                            }
                            let _permit = governor.acquire(SlotKind::Visual).await?;
                            let asset = visual.render(scene_id, visual_type, &prompt).await?;
                            Ok(CacheValue::Visual {
                                path: asset.path,
                                width: asset.width,
                                height: asset.height,
                                format: asset.format,
                            })
                        },
                    )
                })
                .await;

            result.map_err(WorkerError::from)
        }) as futures::future::BoxFuture<'static, Result<CacheValue, WorkerError>>
    }
}

/// Produce the visual, converting terminal failures into a placeholder
/// outcome instead of an error.
pub async fn produce_visual_or_placeholder(
    ctx: &ServiceContext,
    token: &CancellationToken,
    scene: &Scene,
) -> VisualOutcome {
    match produce_visual(ctx, token, scene).await {
        Ok(asset) => VisualOutcome::Ok(asset),
        Err(WorkerError::Cancelled) => VisualOutcome::Cancelled,
        Err(_) if token.is_cancelled() => VisualOutcome::Cancelled,
        Err(e) => {
            let error = e.to_string();
            let placeholder = ctx
                .visual
                .error_placeholder(scene.id, scene.visual_type, &error)
                .await
                .ok();
            VisualOutcome::Failed { placeholder, error }
        }
    }
}
