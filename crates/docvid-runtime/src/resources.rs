//! Resource governor: bounds the process's concurrent load.
//!
//! Each slot kind is backed by a counting semaphore. Expensive work acquires
//! a permit before running; above the soft CPU/memory ceilings acquisition
//! spins on short waits, and above the cleanup ceiling it asks the cache
//! layer to shed entries before re-checking.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sysinfo::System;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Fraction of cache entries kept when the governor triggers a cleanup pass.
const CLEANUP_TARGET_FRACTION: f64 = 0.5;

/// Wait between load re-checks while over a soft ceiling.
const OVERLOAD_POLL: Duration = Duration::from_millis(250);

/// Minimum interval between sysinfo refreshes.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

pub type ResourceResult<T> = Result<T, ResourceError>;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Resource exhausted: no {kind} slot within {waited_ms}ms")]
    Exhausted { kind: SlotKind, waited_ms: u64 },

    #[error("Governor is shutting down")]
    Closed,
}

/// Kind of governed work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Job,
    Tts,
    Visual,
}

impl SlotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotKind::Job => "job",
            SlotKind::Tts => "tts",
            SlotKind::Visual => "visual",
        }
    }
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Concurrency and load limits.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Maximum concurrent TTS operations
    pub max_concurrent_tts: usize,
    /// Maximum concurrent visual renderings
    pub max_concurrent_visual: usize,
    /// Soft CPU ceiling (percent)
    pub cpu_soft_ceiling: f32,
    /// Soft memory ceiling (percent)
    pub memory_soft_ceiling: f32,
    /// Memory level that triggers a cache cleanup pass (percent)
    pub memory_cleanup_ceiling: f32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            max_concurrent_tts: 2,
            max_concurrent_visual: 4,
            cpu_soft_ceiling: 80.0,
            memory_soft_ceiling: 85.0,
            memory_cleanup_ceiling: 70.0,
        }
    }
}

/// Hook the cache layer implements so the governor can shed memory.
pub trait MemoryEvictor: Send + Sync {
    /// Evict least-recently-used entries until roughly `target_fraction`
    /// of the current entries remain. Returns the number evicted.
    fn evict_until(&self, target_fraction: f64) -> usize;
}

/// Per-kind slot usage.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SlotUsage {
    pub in_use: usize,
    pub available: usize,
}

/// Point-in-time view of system load and slot usage.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub jobs: SlotUsage,
    pub tts: SlotUsage,
    pub visual: SlotUsage,
}

/// A held slot. Released on drop, on every exit path.
#[derive(Debug)]
pub struct SlotPermit {
    kind: SlotKind,
    _permit: OwnedSemaphorePermit,
}

impl SlotPermit {
    pub fn kind(&self) -> SlotKind {
        self.kind
    }
}

struct LoadMonitor {
    sys: Mutex<System>,
    last_sample: Mutex<(std::time::Instant, f32, f32)>,
}

impl LoadMonitor {
    fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self {
            sys: Mutex::new(sys),
            last_sample: Mutex::new((std::time::Instant::now(), 0.0, 0.0)),
        }
    }

    /// Sample (cpu%, memory%), rate-limited to avoid hammering /proc.
    fn sample(&self) -> (f32, f32) {
        {
            let last = self.last_sample.lock().unwrap();
            if last.0.elapsed() < SAMPLE_INTERVAL {
                return (last.1, last.2);
            }
        }

        let mut sys = self.sys.lock().unwrap();
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu = sys.global_cpu_usage();
        let memory = if sys.total_memory() > 0 {
            (sys.used_memory() as f32 / sys.total_memory() as f32) * 100.0
        } else {
            0.0
        };

        *self.last_sample.lock().unwrap() = (std::time::Instant::now(), cpu, memory);
        (cpu, memory)
    }
}

/// Process-wide semaphores and load thresholds that gate expensive work.
pub struct ResourceGovernor {
    limits: ResourceLimits,
    job_slots: Arc<Semaphore>,
    tts_slots: Arc<Semaphore>,
    visual_slots: Arc<Semaphore>,
    monitor: LoadMonitor,
    evictor: Mutex<Option<Arc<dyn MemoryEvictor>>>,
}

impl ResourceGovernor {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            job_slots: Arc::new(Semaphore::new(limits.max_concurrent_jobs)),
            tts_slots: Arc::new(Semaphore::new(limits.max_concurrent_tts)),
            visual_slots: Arc::new(Semaphore::new(limits.max_concurrent_visual)),
            monitor: LoadMonitor::new(),
            evictor: Mutex::new(None),
            limits,
        }
    }

    /// Register the cache layer's eviction hook.
    pub fn set_evictor(&self, evictor: Arc<dyn MemoryEvictor>) {
        *self.evictor.lock().unwrap() = Some(evictor);
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    fn semaphore(&self, kind: SlotKind) -> &Arc<Semaphore> {
        match kind {
            SlotKind::Job => &self.job_slots,
            SlotKind::Tts => &self.tts_slots,
            SlotKind::Visual => &self.visual_slots,
        }
    }

    fn capacity(&self, kind: SlotKind) -> usize {
        match kind {
            SlotKind::Job => self.limits.max_concurrent_jobs,
            SlotKind::Tts => self.limits.max_concurrent_tts,
            SlotKind::Visual => self.limits.max_concurrent_visual,
        }
    }

    /// Wait for the system to drop below the soft ceilings.
    ///
    /// Above the cleanup ceiling the registered evictor runs before the next
    /// check, so a loaded process sheds cache instead of queueing forever.
    async fn wait_for_headroom(&self) {
        loop {
            let (cpu, memory) = self.monitor.sample();

            if memory >= self.limits.memory_cleanup_ceiling {
                let evictor = self.evictor.lock().unwrap().clone();
                if let Some(evictor) = evictor {
                    let evicted = evictor.evict_until(CLEANUP_TARGET_FRACTION);
                    if evicted > 0 {
                        info!(
                            memory_percent = memory,
                            evicted, "Memory pressure triggered cache eviction"
                        );
                    }
                }
            }

            if cpu < self.limits.cpu_soft_ceiling && memory < self.limits.memory_soft_ceiling {
                return;
            }

            warn!(
                cpu_percent = cpu,
                memory_percent = memory,
                cpu_ceiling = self.limits.cpu_soft_ceiling,
                memory_ceiling = self.limits.memory_soft_ceiling,
                "System over soft ceiling, delaying slot acquisition"
            );
            tokio::time::sleep(OVERLOAD_POLL).await;
        }
    }

    /// Acquire a permit of the requested kind.
    ///
    /// Waits for both load headroom and a free permit. Fails only if the
    /// governor is torn down. FIFO among waiters per kind.
    pub async fn acquire(&self, kind: SlotKind) -> ResourceResult<SlotPermit> {
        self.wait_for_headroom().await;

        let permit = self
            .semaphore(kind)
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ResourceError::Closed)?;

        debug!(kind = %kind, "Acquired slot");
        Ok(SlotPermit {
            kind,
            _permit: permit,
        })
    }

    /// Acquire with a deadline; fails with `Exhausted` when it elapses.
    pub async fn try_acquire(&self, kind: SlotKind, timeout: Duration) -> ResourceResult<SlotPermit> {
        match tokio::time::timeout(timeout, self.acquire(kind)).await {
            Ok(result) => result,
            Err(_) => Err(ResourceError::Exhausted {
                kind,
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Current CPU%, memory%, and per-kind slot usage.
    pub fn snapshot(&self) -> ResourceSnapshot {
        let (cpu_percent, memory_percent) = self.monitor.sample();
        let usage = |kind: SlotKind| {
            let available = self.semaphore(kind).available_permits();
            SlotUsage {
                in_use: self.capacity(kind).saturating_sub(available),
                available,
            }
        };

        ResourceSnapshot {
            cpu_percent,
            memory_percent,
            jobs: usage(SlotKind::Job),
            tts: usage(SlotKind::Tts),
            visual: usage(SlotKind::Visual),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unbounded_load_limits() -> ResourceLimits {
        // Ceilings above any real reading so tests never block on load
        ResourceLimits {
            cpu_soft_ceiling: 1000.0,
            memory_soft_ceiling: 1000.0,
            memory_cleanup_ceiling: 1000.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_permit_counts_respect_limits() {
        let limits = ResourceLimits {
            max_concurrent_tts: 2,
            ..unbounded_load_limits()
        };
        let governor = Arc::new(ResourceGovernor::new(limits));

        let p1 = governor.acquire(SlotKind::Tts).await.unwrap();
        let _p2 = governor.acquire(SlotKind::Tts).await.unwrap();

        // Third acquisition must time out while both permits are held
        let third = governor
            .try_acquire(SlotKind::Tts, Duration::from_millis(50))
            .await;
        assert!(matches!(
            third,
            Err(ResourceError::Exhausted {
                kind: SlotKind::Tts,
                ..
            })
        ));

        // Releasing one lets the next waiter in
        drop(p1);
        let p3 = governor
            .try_acquire(SlotKind::Tts, Duration::from_millis(200))
            .await;
        assert!(p3.is_ok());
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let governor = ResourceGovernor::new(ResourceLimits {
            max_concurrent_jobs: 1,
            ..unbounded_load_limits()
        });

        {
            let _permit = governor.acquire(SlotKind::Job).await.unwrap();
            assert_eq!(governor.snapshot().jobs.available, 0);
        }
        assert_eq!(governor.snapshot().jobs.available, 1);
    }

    #[tokio::test]
    async fn test_snapshot_reports_usage() {
        let governor = ResourceGovernor::new(unbounded_load_limits());
        let _permit = governor.acquire(SlotKind::Visual).await.unwrap();

        let snap = governor.snapshot();
        assert_eq!(snap.visual.in_use, 1);
        assert_eq!(snap.visual.available, 3);
        assert_eq!(snap.jobs.in_use, 0);
    }

    struct CountingEvictor(AtomicUsize);

    impl MemoryEvictor for CountingEvictor {
        fn evict_until(&self, _target: f64) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst);
            1
        }
    }

    #[tokio::test]
    async fn test_evictor_runs_above_cleanup_ceiling() {
        // Cleanup ceiling at zero: any memory reading triggers eviction.
        // Soft ceilings stay unbounded so acquire still proceeds.
        let limits = ResourceLimits {
            cpu_soft_ceiling: 1000.0,
            memory_soft_ceiling: 1000.0,
            memory_cleanup_ceiling: 0.0,
            ..Default::default()
        };
        let governor = ResourceGovernor::new(limits);
        let evictor = Arc::new(CountingEvictor(AtomicUsize::new(0)));
        governor.set_evictor(evictor.clone());

        let _permit = governor.acquire(SlotKind::Job).await.unwrap();
        assert!(evictor.0.load(Ordering::SeqCst) >= 1);
    }
}
