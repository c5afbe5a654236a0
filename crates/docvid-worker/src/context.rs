//! Shared service context.
//!
//! One explicit struct built at startup and threaded through the
//! orchestrator and pipeline - no global singletons. Cloning is cheap;
//! every field is shared.

use std::sync::Arc;

use docvid_queue::JobQueue;
use docvid_runtime::{AssetCache, CircuitBreaker, ResourceGovernor};
use docvid_services::{LlmClient, TtsClient, VisualClient};
use docvid_store::JobStore;

use crate::composer::Composer;
use crate::config::WorkerConfig;
use crate::error::WorkerResult;

/// Everything a job needs to run, constructed once at startup.
#[derive(Clone)]
pub struct ServiceContext {
    pub config: Arc<WorkerConfig>,
    pub governor: Arc<ResourceGovernor>,
    pub cache: AssetCache,
    pub llm: Arc<LlmClient>,
    pub tts: Arc<TtsClient>,
    pub visual: Arc<VisualClient>,
    pub llm_breaker: Arc<CircuitBreaker>,
    pub tts_breaker: Arc<CircuitBreaker>,
    pub visual_breaker: Arc<CircuitBreaker>,
    pub store: Arc<JobStore>,
    pub queue: Arc<JobQueue>,
    pub composer: Arc<Composer>,
}

impl ServiceContext {
    pub fn new(config: WorkerConfig) -> WorkerResult<Self> {
        let governor = Arc::new(ResourceGovernor::new(config.limits.clone()));
        let cache = AssetCache::new(config.cache.clone());

        // The governor sheds cache entries under memory pressure
        governor.set_evictor(Arc::new(cache.clone()));

        let llm = Arc::new(LlmClient::new(config.llm.clone())?);
        let tts = Arc::new(TtsClient::new(config.tts.clone())?);
        let visual = Arc::new(VisualClient::new(config.visual.clone())?);

        let llm_breaker = Arc::new(CircuitBreaker::new("llm", config.circuit.clone()));
        let tts_breaker = Arc::new(CircuitBreaker::new("tts", config.circuit.clone()));
        let visual_breaker = Arc::new(CircuitBreaker::new("visual", config.circuit.clone()));

        let store = Arc::new(JobStore::new(config.store.clone()));
        let queue = Arc::new(JobQueue::new(config.queue.clone()));
        let composer = Arc::new(Composer::new(config.video_dir.clone()));

        Ok(Self {
            config: Arc::new(config),
            governor,
            cache,
            llm,
            tts,
            visual,
            llm_breaker,
            tts_breaker,
            visual_breaker,
            store,
            queue,
            composer,
        })
    }
}
