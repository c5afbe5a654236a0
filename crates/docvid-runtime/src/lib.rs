//! Runtime primitives for the docvid pipeline.
//!
//! This crate provides:
//! - Resource governor: per-kind concurrency slots gated by CPU/memory load
//! - Circuit breaker: per-service failure gates with closed/open/half-open states
//! - Retry: exponential backoff with jitter
//! - Cache: content-addressed, single-flight, TTL + LRU eviction

pub mod cache;
pub mod circuit_breaker;
pub mod resources;
pub mod retry;

pub use cache::{AssetCache, CacheConfig, CacheError, CacheNamespace, CacheStats, CacheValue};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState};
pub use resources::{
    MemoryEvictor, ResourceError, ResourceGovernor, ResourceLimits, ResourceSnapshot, SlotKind,
    SlotPermit, SlotUsage,
};
pub use retry::{retry_async, RetryPolicy};
