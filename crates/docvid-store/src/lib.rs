//! Process-wide job store with best-effort persistence.
//!
//! This crate provides:
//! - Concurrent-safe job map (writes serialize, reads clone a snapshot)
//! - Periodic whole-store JSON snapshots plus a final one on shutdown
//! - Retention sweep removing expired terminal jobs and their disk assets

pub mod store;

pub use store::{JobStore, StoreConfig, StoreError, StoreResult};
