//! Engine registry.
//!
//! One [`Engine`] is built at startup and handed to every caller. It owns the
//! tiered cache, the query service and the training orchestrator, all wired
//! to the same clock and invalidation manager.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use unibi_core::{CacheError, Clock, DatasetId, UnibiResult};
use unibi_llm::providers::{OpenAIClient, OpenAIGenerator};
use unibi_llm::ProviderRegistry;
use unibi_storage::{
    CacheBackend, InMemoryProgressStore, InvalidationManager, InvalidationReport,
    LmdbCacheBackend, LmdbProgressStore, MemoryCacheBackend, ProgressStore, TieredCache,
    TieredStats,
};

use crate::config::{EngineConfig, ProviderSettings, StorageBackend, StorageSettings};
use crate::query::{QueryAnswer, QueryRequest, QueryService};
use crate::training::{RecoveryReport, TrainingOrchestrator};

/// Storage the engine is assembled from.
pub struct EngineParts {
    pub translation: Arc<dyn CacheBackend>,
    pub result: Arc<dyn CacheBackend>,
    pub progress: Arc<dyn ProgressStore>,
    pub clock: Arc<dyn Clock>,
}

impl EngineParts {
    /// Everything in process memory.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            translation: Arc::new(MemoryCacheBackend::new()),
            result: Arc::new(MemoryCacheBackend::new()),
            progress: Arc::new(InMemoryProgressStore::new()),
            clock,
        }
    }

    /// One LMDB environment per tier plus one for job records, under `root`.
    pub fn lmdb(root: &Path, map_size_mb: usize, clock: Arc<dyn Clock>) -> UnibiResult<Self> {
        let translation = LmdbCacheBackend::open(root.join("translation"), map_size_mb)
            .map_err(CacheError::from)?;
        let result =
            LmdbCacheBackend::open(root.join("result"), map_size_mb).map_err(CacheError::from)?;
        let progress = LmdbProgressStore::open(root.join("progress"), map_size_mb)?;
        Ok(Self {
            translation: Arc::new(translation),
            result: Arc::new(result),
            progress: Arc::new(progress),
            clock,
        })
    }

    /// Build from settings. A Redis URL replaces both cache tiers when the
    /// crate is built with the `redis` feature.
    pub async fn from_settings(settings: &StorageSettings, clock: Arc<dyn Clock>) -> UnibiResult<Self> {
        #[allow(unused_mut)]
        let mut parts = match settings.backend {
            StorageBackend::Memory => Self::in_memory(clock),
            StorageBackend::Lmdb => {
                Self::lmdb(&settings.lmdb_path, settings.lmdb_map_size_mb, clock)?
            }
        };

        if let Some(url) = &settings.redis_url {
            #[cfg(feature = "redis")]
            {
                use unibi_storage::cache::RedisCacheBackend;
                parts.translation =
                    Arc::new(RedisCacheBackend::connect(url, "unibi:translation:").await?);
                parts.result = Arc::new(RedisCacheBackend::connect(url, "unibi:result:").await?);
                info!("Cache tiers use Redis");
            }
            #[cfg(not(feature = "redis"))]
            warn!(
                redis_url = %url,
                "redis_url is set but the redis feature is disabled; keeping local cache tiers"
            );
        }

        info!(
            backend = ?settings.backend,
            translation = parts.translation.name(),
            result = parts.result.name(),
            "Storage initialized"
        );
        Ok(parts)
    }
}

/// Register the OpenAI-compatible generator if an API key is configured.
///
/// Returns whether a generator was registered.
pub fn register_hosted_generator(registry: &mut ProviderRegistry, settings: &ProviderSettings) -> bool {
    let Some(api_key) = &settings.api_key else {
        return false;
    };
    let client = OpenAIClient::new(api_key.clone(), settings.requests_per_minute)
        .with_base_url(settings.api_base.clone());
    registry.register_generator(Arc::new(OpenAIGenerator::new(client, settings.model.clone())));
    info!(model = %settings.model, api_base = %settings.api_base, "Hosted generator registered");
    true
}

/// The assembled query cache and training engine.
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    cache: Arc<TieredCache>,
    invalidation: InvalidationManager,
    query: Arc<QueryService>,
    training: TrainingOrchestrator,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cache", &self.cache)
            .field("query", &self.query)
            .field("training", &self.training)
            .finish()
    }
}

impl Engine {
    /// Wire the engine.
    ///
    /// # Errors
    /// * `ConfigError` - `config` fails validation
    /// * `ProviderError::NotConfigured` - `providers` lacks a generator,
    ///   ingestor or executor
    pub fn new(
        config: EngineConfig,
        providers: &ProviderRegistry,
        parts: EngineParts,
    ) -> UnibiResult<Self> {
        config.validate()?;
        let generator = providers.generator()?;
        let ingestor = providers.ingestor()?;
        let executor = providers.executor()?;

        let cache = Arc::new(TieredCache::new(
            parts.translation,
            parts.result,
            Arc::clone(&parts.clock),
            config.cache.tier_config(),
        ));
        let invalidation = InvalidationManager::new(Arc::clone(&cache));
        let query = QueryService::new(
            Arc::clone(&cache),
            generator,
            executor,
            config.provider.generation_timeout,
            config.cache.waiter_timeout,
        );
        let training = TrainingOrchestrator::new(
            parts.progress,
            ingestor,
            invalidation.clone(),
            parts.clock,
            config.training.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            cache,
            invalidation,
            query: Arc::new(query),
            training,
        })
    }

    /// Wire the engine and run the training recovery sweep.
    pub async fn start(
        config: EngineConfig,
        providers: &ProviderRegistry,
        parts: EngineParts,
    ) -> UnibiResult<(Self, RecoveryReport)> {
        let engine = Self::new(config, providers, parts)?;
        let report = engine.training.recover().await?;
        info!(
            failed = report.failed.len(),
            paused = report.paused.len(),
            max_concurrent_jobs = engine.config.training.max_concurrent_jobs,
            "Engine started"
        );
        Ok((engine, report))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    pub fn training(&self) -> &TrainingOrchestrator {
        &self.training
    }

    /// Answer a question through the caches.
    pub async fn ask(&self, request: &QueryRequest) -> UnibiResult<QueryAnswer> {
        self.query.ask(request).await
    }

    /// Purge both cache tiers of a dataset outside of training.
    pub async fn invalidate_dataset(&self, dataset_id: &DatasetId) -> InvalidationReport {
        self.invalidation.invalidate_dataset(dataset_id).await
    }

    pub async fn cache_stats(&self) -> TieredStats {
        self.cache.stats().await
    }
}
