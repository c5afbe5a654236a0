//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use docvid_queue::QueueConfig;
use docvid_runtime::{CacheConfig, CircuitBreakerConfig, ResourceLimits, RetryPolicy};
use docvid_services::{LlmConfig, TtsConfig, VisualConfig};
use docvid_store::StoreConfig;

/// Worker configuration, assembled from environment variables with
/// defaults that match a single-machine deployment.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub limits: ResourceLimits,
    pub circuit: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub visual: VisualConfig,
    /// Directory finished videos are written into
    pub video_dir: PathBuf,
    /// Scratch directory for per-job intermediate files
    pub work_dir: PathBuf,
    /// Grace period for in-flight jobs at shutdown
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            circuit: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            store: StoreConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
            visual: VisualConfig::default(),
            video_dir: PathBuf::from("videos"),
            work_dir: PathBuf::from("work"),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let limits = ResourceLimits {
            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS", 3),
            max_concurrent_tts: env_parse("MAX_CONCURRENT_TTS", 2),
            max_concurrent_visual: env_parse("MAX_CONCURRENT_VISUAL", 4),
            cpu_soft_ceiling: env_parse("CPU_SOFT_CEILING", 80.0),
            memory_soft_ceiling: env_parse("MEMORY_SOFT_CEILING", 85.0),
            memory_cleanup_ceiling: env_parse("MEMORY_CLEANUP_CEILING", 70.0),
        };

        let circuit = CircuitBreakerConfig {
            failure_threshold: env_parse("CIRCUIT_FAILURE_THRESHOLD", 3),
            cooldown: Duration::from_secs(env_parse("CIRCUIT_COOLDOWN_SECS", 30)),
        };

        let retry = RetryPolicy {
            max_attempts: env_parse("RETRY_MAX_ATTEMPTS", 3),
            initial_delay: Duration::from_millis(env_parse("RETRY_INITIAL_DELAY_MS", 500)),
            multiplier: env_parse("RETRY_MULTIPLIER", 2.0),
            ..RetryPolicy::default()
        };

        let cache = CacheConfig {
            script_ttl: Duration::from_secs(env_parse("CACHE_SCRIPT_TTL_HOURS", 24u64) * 3600),
            audio_ttl: Duration::from_secs(env_parse("CACHE_AUDIO_TTL_HOURS", 24u64) * 3600),
            visual_ttl: Duration::from_secs(env_parse("CACHE_VISUAL_TTL_HOURS", 24u64) * 3600),
        };

        let queue = QueueConfig {
            max_size: env_parse("QUEUE_MAX_SIZE", 100),
            max_retries: env_parse("QUEUE_MAX_RETRIES", 3),
        };

        let store = StoreConfig {
            snapshot_path: PathBuf::from(env_string("JOB_STORE_PATH", "job_store.json")),
            snapshot_interval: Duration::from_secs(env_parse("JOB_STORE_SNAPSHOT_SECS", 60)),
            retention: Duration::from_secs(env_parse("JOB_RETENTION_HOURS", 24u64) * 3600),
        };

        let call_timeout = Duration::from_secs(env_parse("EXTERNAL_CALL_TIMEOUT_SECS", 60));

        let llm = LlmConfig {
            base_url: env_string("LLM_URL", &defaults.llm.base_url),
            api_key: env_string("LLM_API_KEY", ""),
            model: env_string("LLM_MODEL", &defaults.llm.model),
            timeout: call_timeout,
        };

        let tts = TtsConfig {
            base_url: env_string("TTS_BASE_URL", &defaults.tts.base_url),
            voice: env_string("TTS_VOICE", &defaults.tts.voice),
            speed: env_parse("TTS_SPEED", defaults.tts.speed),
            timeout: call_timeout,
            output_dir: PathBuf::from(env_string("AUDIO_STORAGE_PATH", "assets/audio")),
            ..defaults.tts.clone()
        };

        let visual = VisualConfig {
            slide_base_url: env_string("SLIDE_BASE_URL", &defaults.visual.slide_base_url),
            renderer_base_url: env_string(
                "VISUAL_RENDERER_URL",
                &defaults.visual.renderer_base_url,
            ),
            output_dir: PathBuf::from(env_string("VISUAL_STORAGE_PATH", "assets/visuals")),
            timeout: call_timeout,
            ..defaults.visual.clone()
        };

        Self {
            limits,
            circuit,
            retry,
            cache,
            queue,
            store,
            llm,
            tts,
            visual,
            video_dir: PathBuf::from(env_string("VIDEO_STORAGE_PATH", "videos")),
            work_dir: PathBuf::from(env_string("WORK_DIR", "work")),
            shutdown_timeout: Duration::from_secs(env_parse("SHUTDOWN_TIMEOUT_SECS", 30)),
        }
    }
}
