//! Content-addressed cache with single-flight coalescing.
//!
//! Three namespaces (script, audio, visual) keyed by stable fingerprints of
//! the inputs that produced each value. Values carry paths to persisted
//! files; the files' lifetime is managed by the retention sweeper, so a
//! cached path can dangle and callers must treat a missing file as a miss.
//!
//! `get_or_compute` coalesces concurrent same-key callers onto one producer
//! run. Producer failures are never memoised.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use docvid_models::{ImageFormat, Script};

use crate::resources::MemoryEvictor;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Producer failed: {0}")]
    Producer(String),
}

/// Cache namespace, one per asset class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    Script,
    Audio,
    Visual,
}

impl CacheNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::Script => "script",
            CacheNamespace::Audio => "audio",
            CacheNamespace::Visual => "visual",
        }
    }
}

/// Cached value, typed per namespace.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Script(Script),
    Audio {
        path: PathBuf,
        duration_seconds: f64,
    },
    Visual {
        path: PathBuf,
        width: u32,
        height: u32,
        format: ImageFormat,
    },
}

impl CacheValue {
    pub fn as_script(&self) -> Option<&Script> {
        match self {
            CacheValue::Script(s) => Some(s),
            _ => None,
        }
    }

    /// Path of the persisted file, if this value references one.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            CacheValue::Script(_) => None,
            CacheValue::Audio { path, .. } | CacheValue::Visual { path, .. } => Some(path),
        }
    }
}

/// Per-namespace TTLs. TTL is a hint; the governor may evict earlier.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub script_ttl: Duration,
    pub audio_ttl: Duration,
    pub visual_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        const DAY: Duration = Duration::from_secs(24 * 60 * 60);
        Self {
            script_ttl: DAY,
            audio_ttl: DAY,
            visual_ttl: DAY,
        }
    }
}

impl CacheConfig {
    fn ttl(&self, ns: CacheNamespace) -> Duration {
        match ns {
            CacheNamespace::Script => self.script_ttl,
            CacheNamespace::Audio => self.audio_ttl,
            CacheNamespace::Visual => self.visual_ttl,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub script_entries: usize,
    pub audio_entries: usize,
    pub visual_entries: usize,
}

type CacheKey = (CacheNamespace, String);

struct Entry {
    value: CacheValue,
    expires_at: Instant,
    last_used: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

type FlightOutput = Result<CacheValue, String>;
type Flight = Shared<BoxFuture<'static, FlightOutput>>;

struct CacheInner {
    config: CacheConfig,
    store: Mutex<HashMap<CacheKey, Entry>>,
    inflight: Mutex<HashMap<CacheKey, Flight>>,
}

impl CacheInner {
    fn lookup(&self, key: &CacheKey) -> Option<CacheValue> {
        let mut store = self.store.lock().unwrap();
        match store.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.last_used = Instant::now();
                Some(entry.value.clone())
            }
            Some(_) => {
                store.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: CacheKey, value: CacheValue) {
        let ttl = self.config.ttl(key.0);
        let now = Instant::now();
        self.store.lock().unwrap().insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
                last_used: now,
            },
        );
    }
}

/// Content-addressed cache shared across the pipeline.
#[derive(Clone)]
pub struct AssetCache {
    inner: Arc<CacheInner>,
}

impl AssetCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                store: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Fetch the cached value or run `producer` to compute it.
    ///
    /// Single-flight: concurrent callers with the same key share one
    /// producer run and all observe its outcome. A failed producer is not
    /// cached. Concurrent different keys proceed in parallel.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        ns: CacheNamespace,
        key: &str,
        producer: F,
    ) -> CacheResult<CacheValue>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let cache_key = (ns, key.to_string());

        if let Some(value) = self.inner.lookup(&cache_key) {
            debug!(namespace = ns.as_str(), key, "Cache hit");
            return Ok(value);
        }

        let flight = {
            let mut inflight = self.inner.inflight.lock().unwrap();

            // Re-check under the in-flight lock: a producer may have
            // finished between the store lookup and here.
            if let Some(value) = self.inner.lookup(&cache_key) {
                return Ok(value);
            }

            match inflight.get(&cache_key) {
                Some(existing) => {
                    debug!(namespace = ns.as_str(), key, "Joining in-flight producer");
                    existing.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let owned_key = cache_key.clone();
                    let fut = producer();

                    let flight: Flight = async move {
                        let result = fut.await;
                        let output = match result {
                            Ok(value) => {
                                inner.insert(owned_key.clone(), value.clone());
                                Ok(value)
                            }
                            Err(e) => Err(e.to_string()),
                        };
                        inner.inflight.lock().unwrap().remove(&owned_key);
                        output
                    }
                    .boxed()
                    .shared();

                    inflight.insert(cache_key.clone(), flight.clone());
                    flight
                }
            }
        };

        flight.await.map_err(CacheError::Producer)
    }

    /// Peek without computing.
    pub fn get(&self, ns: CacheNamespace, key: &str) -> Option<CacheValue> {
        self.inner.lookup(&(ns, key.to_string()))
    }

    pub fn invalidate(&self, ns: CacheNamespace, key: &str) {
        self.inner
            .store
            .lock()
            .unwrap()
            .remove(&(ns, key.to_string()));
    }

    pub fn invalidate_all(&self, ns: CacheNamespace) {
        self.inner
            .store
            .lock()
            .unwrap()
            .retain(|(entry_ns, _), _| *entry_ns != ns);
    }

    pub fn len(&self) -> usize {
        self.inner.store.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let store = self.inner.store.lock().unwrap();
        let count = |ns: CacheNamespace| store.keys().filter(|(k, _)| *k == ns).count();
        CacheStats {
            total_entries: store.len(),
            script_entries: count(CacheNamespace::Script),
            audio_entries: count(CacheNamespace::Audio),
            visual_entries: count(CacheNamespace::Visual),
        }
    }
}

impl MemoryEvictor for AssetCache {
    /// Drop expired entries, then least-recently-used entries across all
    /// namespaces until `target_fraction` of the entries remain.
    fn evict_until(&self, target_fraction: f64) -> usize {
        let mut store = self.inner.store.lock().unwrap();
        let before = store.len();

        store.retain(|_, entry| !entry.is_expired());

        let target = (before as f64 * target_fraction.clamp(0.0, 1.0)).floor() as usize;
        if store.len() > target {
            let mut by_age: Vec<(CacheKey, Instant)> = store
                .iter()
                .map(|(k, e)| (k.clone(), e.last_used))
                .collect();
            by_age.sort_by_key(|(_, last_used)| *last_used);

            for (key, _) in by_age {
                if store.len() <= target {
                    break;
                }
                store.remove(&key);
            }
        }

        before - store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn audio_value(path: &str) -> CacheValue {
        CacheValue::Audio {
            path: path.into(),
            duration_seconds: 3.2,
        }
    }

    #[tokio::test]
    async fn test_second_call_skips_producer() {
        let cache = AssetCache::new(CacheConfig::default());
        let runs = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let runs = Arc::clone(&runs);
            let value = cache
                .get_or_compute(CacheNamespace::Audio, "key-a", move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(audio_value("/tmp/a.wav"))
                })
                .await
                .unwrap();
            assert!(matches!(value, CacheValue::Audio { .. }));
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_flight_producer_runs_once() {
        let cache = AssetCache::new(CacheConfig::default());
        let runs = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                let runs = Arc::clone(&runs);
                tokio::spawn(async move {
                    cache
                        .get_or_compute(CacheNamespace::Visual, "shared-key", move || async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, String>(CacheValue::Visual {
                                path: "/tmp/v.png".into(),
                                width: 1280,
                                height: 720,
                                format: ImageFormat::Png,
                            })
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_memoised() {
        let cache = AssetCache::new(CacheConfig::default());
        let runs = Arc::new(AtomicU32::new(0));

        let first = {
            let runs = Arc::clone(&runs);
            cache
                .get_or_compute(CacheNamespace::Audio, "flaky", move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err::<CacheValue, _>("tts down".to_string())
                })
                .await
        };
        assert!(matches!(first, Err(CacheError::Producer(msg)) if msg.contains("tts down")));

        let second = {
            let runs = Arc::clone(&runs);
            cache
                .get_or_compute(CacheNamespace::Audio, "flaky", move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(audio_value("/tmp/b.wav"))
                })
                .await
        };
        assert!(second.is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_coalesce() {
        let cache = AssetCache::new(CacheConfig::default());
        let runs = Arc::new(AtomicU32::new(0));

        for key in ["k1", "k2", "k3"] {
            let runs = Arc::clone(&runs);
            cache
                .get_or_compute(CacheNamespace::Audio, key, move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(audio_value("/tmp/x.wav"))
                })
                .await
                .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = AssetCache::new(CacheConfig {
            audio_ttl: Duration::from_secs(60),
            ..Default::default()
        });

        cache
            .get_or_compute(CacheNamespace::Audio, "short-lived", || async {
                Ok::<_, String>(audio_value("/tmp/t.wav"))
            })
            .await
            .unwrap();
        assert!(cache.get(CacheNamespace::Audio, "short-lived").is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(CacheNamespace::Audio, "short-lived").is_none());
    }

    #[tokio::test]
    async fn test_invalidate_namespace() {
        let cache = AssetCache::new(CacheConfig::default());
        for key in ["a", "b"] {
            cache
                .get_or_compute(CacheNamespace::Audio, key, || async {
                    Ok::<_, String>(audio_value("/tmp/x.wav"))
                })
                .await
                .unwrap();
        }
        cache
            .get_or_compute(CacheNamespace::Script, "s", || async {
                Ok::<_, String>(CacheValue::Script(Script::new(Vec::new())))
            })
            .await
            .unwrap();

        cache.invalidate_all(CacheNamespace::Audio);
        assert_eq!(cache.stats().audio_entries, 0);
        assert_eq!(cache.stats().script_entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_until_drops_lru_first() {
        let cache = AssetCache::new(CacheConfig::default());

        for key in ["old", "mid", "new"] {
            cache
                .get_or_compute(CacheNamespace::Visual, key, move || async move {
                    Ok::<_, String>(CacheValue::Visual {
                        path: "/tmp/v.png".into(),
                        width: 100,
                        height: 100,
                        format: ImageFormat::Png,
                    })
                })
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        // Touch "old" so "mid" becomes least recently used
        cache.get(CacheNamespace::Visual, "old");

        let evicted = cache.evict_until(0.34);
        assert_eq!(evicted, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(CacheNamespace::Visual, "old").is_some());
    }
}
