//! Job definitions and lifecycle state.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::asset::{AudioAsset, Video, VisualAsset};
use crate::script::{SceneStatus, Script};
use crate::source::SourceDocument;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job priority. Strict priority, FIFO within a level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Urgent => "urgent",
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue
    #[default]
    Pending,
    /// Owned by the orchestrator, moving through phases
    Processing,
    /// All scenes completed and video composed
    Completed,
    /// Video composed from a successful subset of scenes
    CompletedWithErrors,
    /// No usable output
    Failed,
    /// Cancelled by the client
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::CompletedWithErrors
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }

    /// Whether a video is available for download.
    pub fn has_output(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::CompletedWithErrors)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline phase within a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    #[default]
    Upload,
    Script,
    Audio,
    Visual,
    Compose,
    Done,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Upload => "upload",
            JobPhase::Script => "script",
            JobPhase::Audio => "audio",
            JobPhase::Visual => "visual",
            JobPhase::Compose => "compose",
            JobPhase::Done => "done",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

/// Processed state of a single scene: status plus the assets produced so far.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SceneOutcome {
    #[serde(default)]
    pub status: SceneStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioAsset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual: Option<VisualAsset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SceneOutcome {
    /// A scene is complete only when both assets exist.
    pub fn is_complete(&self) -> bool {
        self.audio.is_some() && self.visual.is_some()
    }
}

/// One user submission, owned by the orchestrator while processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub priority: JobPriority,
    /// Progress percentage, 0-100, non-decreasing within a run
    pub progress: u8,
    /// Human-readable status message
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub source: SourceDocument,
    /// Generated script, set exactly once by the script phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,
    /// Per-scene processed state, keyed by scene id
    #[serde(default)]
    pub scenes: BTreeMap<u32, SceneOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Video>,
    /// Errors accumulated over the run (scene-level and job-level)
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(source: SourceDocument, priority: JobPriority) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            phase: JobPhase::Upload,
            priority,
            progress: 0,
            message: "Queued for processing".to_string(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            source,
            script: None,
            scenes: BTreeMap::new(),
            video: None,
            errors: Vec::new(),
            cancellation_reason: None,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), JobError> {
        let allowed = match (self.status, to) {
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Pending, JobStatus::Cancelled) => true,
            (JobStatus::Processing, JobStatus::Completed) => true,
            (JobStatus::Processing, JobStatus::CompletedWithErrors) => true,
            (JobStatus::Processing, JobStatus::Failed) => true,
            (JobStatus::Processing, JobStatus::Cancelled) => true,
            _ => false,
        };

        if !allowed {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        self.status = to;
        self.touch();
        Ok(())
    }

    /// Move the job into processing.
    pub fn start(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Processing)?;
        self.phase = JobPhase::Script;
        Ok(())
    }

    /// Advance the pipeline phase and update the status message.
    pub fn set_phase(&mut self, phase: JobPhase, message: impl Into<String>) {
        self.phase = phase;
        self.message = message.into();
        self.touch();
    }

    /// Update progress. Regressions are clamped so progress never decreases
    /// within a run.
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
        self.touch();
    }

    /// Record a scene outcome.
    pub fn set_scene_outcome(&mut self, scene_id: u32, outcome: SceneOutcome) {
        if let Some(err) = &outcome.error {
            self.errors.push(format!("scene {}: {}", scene_id, err));
        }
        self.scenes.insert(scene_id, outcome);
        self.touch();
    }

    /// Number of scenes with both assets present.
    pub fn completed_scene_count(&self) -> usize {
        self.scenes
            .values()
            .filter(|o| o.status == SceneStatus::Completed)
            .count()
    }

    /// Number of scenes marked failed.
    pub fn failed_scene_count(&self) -> usize {
        self.scenes
            .values()
            .filter(|o| o.status == SceneStatus::Failed)
            .count()
    }

    /// Mark fully completed.
    pub fn complete(&mut self, video: Video) -> Result<(), JobError> {
        self.transition(JobStatus::Completed)?;
        self.video = Some(video);
        self.phase = JobPhase::Done;
        self.progress = 100;
        self.message = "Video generation completed successfully".to_string();
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark completed from a successful subset of scenes.
    pub fn complete_with_errors(&mut self, video: Video) -> Result<(), JobError> {
        let failed = self.failed_scene_count();
        self.transition(JobStatus::CompletedWithErrors)?;
        self.video = Some(video);
        self.phase = JobPhase::Done;
        self.progress = 100;
        self.message = format!("Completed with {} failed scene(s)", failed);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), JobError> {
        let error = error.into();
        self.transition(JobStatus::Failed)?;
        self.message = error.clone();
        self.errors.push(error);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark cancelled. Reachable from pending or processing only.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), JobError> {
        let reason = reason.into();
        self.transition(JobStatus::Cancelled)?;
        self.message = format!("Cancelled: {}", reason);
        self.cancellation_reason = Some(reason);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Read-only projection for status queries.
    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.id.clone(),
            status: self.status,
            phase: self.phase,
            progress: self.progress,
            message: self.message.clone(),
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            result: self.video.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// Read-only status projection returned to pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub progress: u8,
    pub message: String,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Video>,
    pub errors: Vec<String>,
}
