//! Document-to-video job orchestration.
//!
//! This crate provides:
//! - Orchestrator: submit/status/cancel surface plus the worker run loop
//! - Per-job pipeline: script -> asset fan-out -> compose state machine
//! - Asset router: visual-type dispatch wrapped in cache, breaker, retry,
//!   and resource slots
//! - Composer: ffmpeg-backed muxing of per-scene audio/visual pairs
//! - Text extraction for txt/md/pdf uploads

pub mod asset_router;
pub mod composer;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod pipeline;

pub use config::WorkerConfig;
pub use context::ServiceContext;
pub use error::{WorkerError, WorkerResult};
pub use orchestrator::{HealthReport, Orchestrator};
