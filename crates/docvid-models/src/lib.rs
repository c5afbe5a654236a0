//! Shared data models for the docvid pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, priorities, and lifecycle state
//! - Scripts and scenes
//! - Audio, visual, and video assets
//! - Source documents and upload validation

pub mod asset;
pub mod job;
pub mod script;
pub mod source;

pub use asset::{AudioAsset, ImageFormat, Video, VideoStatus, VisualAsset};
pub use job::{Job, JobError, JobId, JobPhase, JobPriority, JobStatus, JobView, SceneOutcome};
pub use script::{Scene, SceneStatus, Script, ScriptError, VisualType, MAX_SCENES, MIN_SCENES};
pub use source::{SourceDocument, SourceError, SourceKind, MAX_UPLOAD_BYTES};
