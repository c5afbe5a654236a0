//! External service clients for the docvid pipeline.
//!
//! This crate provides:
//! - LLM client: script generation with tolerant JSON parsing and a
//!   deterministic fallback generator
//! - TTS client: narration synthesis to disk with file-measured duration
//! - Visual clients: one renderer per visual type plus an error placeholder
//! - ffprobe wrapper for measuring media durations

pub mod error;
pub mod fingerprint;
pub mod llm;
pub mod probe;
pub mod tts;
pub mod visual;

pub use error::{ServiceError, ServiceResult};
pub use fingerprint::content_fingerprint;
pub use llm::{fallback_script, LlmClient, LlmConfig};
pub use probe::media_duration;
pub use tts::{TtsClient, TtsConfig};
pub use visual::{ChartKind, VisualClient, VisualConfig};
