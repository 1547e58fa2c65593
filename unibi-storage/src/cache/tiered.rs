//! Two-tier TTL cache over pluggable backends.
//!
//! The *translation* tier maps question fingerprints to generated SQL and
//! keeps entries for about a week. The *result* tier maps SQL plus dataset to
//! the last result and keeps entries for a few minutes. Each tier has its own
//! backend instance, so the two never share storage or eviction.
//!
//! # Degradation
//!
//! Every backend call runs under `backend_timeout`. A failed or timed-out
//! call is logged, counted as a fallback and turned into a miss (for reads)
//! or a no-op (for writes). Callers never see a cache error from `get` or
//! `set`. Dataset-wide purges run under the longer `purge_timeout`.
//!
//! # Expiry
//!
//! Entries are valid strictly before `created_at + ttl`, measured with the
//! injected [`Clock`]. An expired entry found on read is deleted and reported
//! as a miss. So is an entry written before its dataset's latest
//! invalidation, whether or not the purge managed to delete it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use unibi_core::{CacheError, CacheKey, Clock, DatasetId, KeyPattern, Namespace};

use super::epoch::{DatasetEpochs, Epoch};
use super::memory_backend::MemoryCacheBackend;
use super::read::CacheRead;
use super::traits::{CacheBackend, CacheStats, StoredEntry};

/// Default TTL of the translation tier (7 days).
pub const DEFAULT_TRANSLATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default TTL of the result tier (5 minutes).
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default timeout for a single backend call.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Default timeout for one dataset-wide bulk delete.
pub const DEFAULT_PURGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the tiered cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierConfig {
    pub translation_ttl: Duration,
    pub result_ttl: Duration,
    pub backend_timeout: Duration,
    pub purge_timeout: Duration,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            translation_ttl: DEFAULT_TRANSLATION_TTL,
            result_ttl: DEFAULT_RESULT_TTL,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            purge_timeout: DEFAULT_PURGE_TIMEOUT,
        }
    }
}

impl TierConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_translation_ttl(mut self, ttl: Duration) -> Self {
        self.translation_ttl = ttl;
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_purge_timeout(mut self, timeout: Duration) -> Self {
        self.purge_timeout = timeout;
        self
    }
}

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    fenced: AtomicU64,
    writes: AtomicU64,
    stale_writes_skipped: AtomicU64,
    fallbacks: AtomicU64,
}

impl TierCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, entry_count: Option<u64>) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            fenced: self.fenced.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            stale_writes_skipped: self.stale_writes_skipped.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            entry_count,
        }
    }
}

/// Statistics for both tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TieredStats {
    pub translation: CacheStats,
    pub result: CacheStats,
}

/// Two-tier cache with lazy TTL expiry and backend degradation.
pub struct TieredCache {
    translation: Arc<dyn CacheBackend>,
    result: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    epochs: DatasetEpochs,
    config: TierConfig,
    translation_counters: TierCounters,
    result_counters: TierCounters,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("translation", &self.translation.name())
            .field("result", &self.result.name())
            .field("config", &self.config)
            .finish()
    }
}

impl TieredCache {
    pub fn new(
        translation: Arc<dyn CacheBackend>,
        result: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
        config: TierConfig,
    ) -> Self {
        Self {
            translation,
            result,
            clock,
            epochs: DatasetEpochs::new(),
            config,
            translation_counters: TierCounters::default(),
            result_counters: TierCounters::default(),
        }
    }

    /// Both tiers in process memory.
    pub fn in_memory(clock: Arc<dyn Clock>, config: TierConfig) -> Self {
        Self::new(
            Arc::new(MemoryCacheBackend::new()),
            Arc::new(MemoryCacheBackend::new()),
            clock,
            config,
        )
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// TTL class of a namespace.
    pub fn ttl_for(&self, namespace: Namespace) -> Duration {
        match namespace {
            Namespace::Translation => self.config.translation_ttl,
            Namespace::Result => self.config.result_ttl,
        }
    }

    fn backend(&self, namespace: Namespace) -> &Arc<dyn CacheBackend> {
        match namespace {
            Namespace::Translation => &self.translation,
            Namespace::Result => &self.result,
        }
    }

    fn counters(&self, namespace: Namespace) -> &TierCounters {
        match namespace {
            Namespace::Translation => &self.translation_counters,
            Namespace::Result => &self.result_counters,
        }
    }

    /// Run a backend call under the timeout, degrading failures to `None`.
    async fn guarded<T>(
        &self,
        namespace: Namespace,
        op: &'static str,
        key: &str,
        call: impl Future<Output = Result<T, CacheError>>,
    ) -> Option<T> {
        let backend = self.backend(namespace).name();
        let outcome = match tokio::time::timeout(self.config.backend_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                backend: backend.to_string(),
                timeout_ms: self.config.backend_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(value) => Some(value),
            Err(e) => {
                TierCounters::bump(&self.counters(namespace).fallbacks);
                tracing::warn!(
                    backend,
                    namespace = %namespace,
                    op,
                    key,
                    error = %e,
                    "Cache backend call failed, degrading"
                );
                None
            }
        }
    }

    /// Look up a key. Misses, expired entries and backend failures all
    /// return `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheRead<T>> {
        let namespace = key.namespace();
        let counters = self.counters(namespace);
        let raw = key.render();

        let entry = self
            .guarded(namespace, "get", &raw, self.backend(namespace).get(&raw))
            .await
            .flatten();

        let Some(entry) = entry else {
            TierCounters::bump(&counters.misses);
            return None;
        };

        if self
            .epochs
            .is_fenced(key.dataset_id(), entry.created_at, entry.epoch)
        {
            TierCounters::bump(&counters.fenced);
            TierCounters::bump(&counters.misses);
            tracing::debug!(namespace = %namespace, key = %raw, "Dropping cache entry from before invalidation");
            self.guarded(namespace, "delete", &raw, self.backend(namespace).delete(&raw))
                .await;
            return None;
        }

        let now = self.clock.now();
        if entry.is_expired_at(now) {
            TierCounters::bump(&counters.expired);
            TierCounters::bump(&counters.misses);
            tracing::debug!(namespace = %namespace, key = %raw, "Evicting expired cache entry");
            self.guarded(namespace, "delete", &raw, self.backend(namespace).delete(&raw))
                .await;
            return None;
        }

        match serde_json::from_slice::<T>(&entry.payload) {
            Ok(value) => {
                TierCounters::bump(&counters.hits);
                Some(CacheRead::from_cache(
                    value,
                    entry.created_at,
                    entry.expires_at(),
                ))
            }
            Err(e) => {
                TierCounters::bump(&counters.misses);
                tracing::warn!(
                    namespace = %namespace,
                    key = %raw,
                    error = %e,
                    "Dropping undecodable cache entry"
                );
                self.guarded(namespace, "delete", &raw, self.backend(namespace).delete(&raw))
                    .await;
                None
            }
        }
    }

    /// Store a value with its namespace's TTL. Returns whether it was written.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T) -> bool {
        self.set_with_ttl(key, value, self.ttl_for(key.namespace()))
            .await
    }

    /// Store a value with an explicit TTL.
    pub async fn set_with_ttl<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) -> bool {
        let namespace = key.namespace();
        let raw = key.render();
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(namespace = %namespace, key = %raw, error = %e, "Failed to encode cache value");
                return false;
            }
        };

        let epoch = self.epochs.current(key.dataset_id());
        let entry = StoredEntry::new(payload, self.clock.now(), ttl).with_epoch(epoch.sequence());
        let written = self
            .guarded(namespace, "set", &raw, self.backend(namespace).set(&raw, entry))
            .await
            .is_some();
        if written {
            TierCounters::bump(&self.counters(namespace).writes);
        }
        written
    }

    /// Store a value only if the key's dataset has not been invalidated
    /// since `epoch` was observed.
    ///
    /// The epoch is checked again after the write and the entry removed if an
    /// invalidation raced with it, so no stale value outlives the purge.
    pub async fn set_if_current<T: Serialize>(&self, key: &CacheKey, value: &T, epoch: Epoch) -> bool {
        let namespace = key.namespace();
        let dataset_id = key.dataset_id();

        if !self.epochs.is_current(dataset_id, epoch) {
            TierCounters::bump(&self.counters(namespace).stale_writes_skipped);
            tracing::debug!(namespace = %namespace, dataset_id = %dataset_id, "Skipping stale cache write");
            return false;
        }

        if !self.set(key, value).await {
            return false;
        }

        if !self.epochs.is_current(dataset_id, epoch) {
            TierCounters::bump(&self.counters(namespace).stale_writes_skipped);
            self.delete(key).await;
            return false;
        }
        true
    }

    /// Remove one entry. Returns whether it existed.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        let namespace = key.namespace();
        let raw = key.render();
        self.guarded(namespace, "delete", &raw, self.backend(namespace).delete(&raw))
            .await
            .unwrap_or(false)
    }

    /// Bulk delete every entry matching the pattern in its namespace's tier,
    /// under `purge_timeout`.
    ///
    /// Unlike `get`/`set`, failures are returned so invalidation can report
    /// them.
    pub async fn invalidate(&self, pattern: &KeyPattern) -> Result<u64, CacheError> {
        let backend = self.backend(pattern.namespace());
        match tokio::time::timeout(self.config.purge_timeout, backend.delete_matching(pattern)).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                backend: backend.name().to_string(),
                timeout_ms: self.config.purge_timeout.as_millis() as u64,
            }),
        }
    }

    /// Current invalidation epoch of a dataset.
    pub fn epoch(&self, dataset_id: &DatasetId) -> Epoch {
        self.epochs.current(dataset_id)
    }

    /// Advance a dataset's epoch, fencing off in-flight producers and every
    /// entry written so far.
    pub fn bump_epoch(&self, dataset_id: &DatasetId) -> Epoch {
        self.epochs.bump(dataset_id, self.clock.now())
    }

    pub async fn stats(&self) -> TieredStats {
        let translation_len = self
            .guarded(Namespace::Translation, "len", "*", self.translation.len())
            .await
            .flatten();
        let result_len = self
            .guarded(Namespace::Result, "len", "*", self.result.len())
            .await
            .flatten();
        TieredStats {
            translation: self.translation_counters.snapshot(translation_len),
            result: self.result_counters.snapshot(result_len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use unibi_core::{FingerprintKeyer, MockClock, QueryResult};

    struct DownBackend;

    #[async_trait]
    impl CacheBackend for DownBackend {
        fn name(&self) -> &'static str {
            "down"
        }
        async fn get(&self, _key: &str) -> Result<Option<StoredEntry>, CacheError> {
            Err(CacheError::Unavailable {
                backend: "down".to_string(),
                reason: "connection refused".to_string(),
            })
        }
        async fn set(&self, _key: &str, _entry: StoredEntry) -> Result<(), CacheError> {
            Err(CacheError::Unavailable {
                backend: "down".to_string(),
                reason: "connection refused".to_string(),
            })
        }
        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable {
                backend: "down".to_string(),
                reason: "connection refused".to_string(),
            })
        }
        async fn delete_matching(&self, _pattern: &KeyPattern) -> Result<u64, CacheError> {
            Err(CacheError::Unavailable {
                backend: "down".to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    struct HangingBackend;

    #[async_trait]
    impl CacheBackend for HangingBackend {
        fn name(&self) -> &'static str {
            "hanging"
        }
        async fn get(&self, _key: &str) -> Result<Option<StoredEntry>, CacheError> {
            std::future::pending().await
        }
        async fn set(&self, _key: &str, _entry: StoredEntry) -> Result<(), CacheError> {
            std::future::pending().await
        }
        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            std::future::pending().await
        }
        async fn delete_matching(&self, _pattern: &KeyPattern) -> Result<u64, CacheError> {
            std::future::pending().await
        }
    }

    fn setup() -> (TieredCache, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let cache = TieredCache::in_memory(clock.clone(), TierConfig::default());
        (cache, clock)
    }

    fn translation_key(dataset: u64, question: &str) -> CacheKey {
        FingerprintKeyer::new().fingerprint(&DatasetId::from(dataset), question, "v1")
    }

    #[tokio::test]
    async fn test_translation_ttl_boundary() {
        let (cache, clock) = setup();
        let key = translation_key(7, "total sales last month");
        assert!(cache.set(&key, &"SELECT SUM(amount) FROM sales".to_string()).await);

        clock.advance(ChronoDuration::days(6) + ChronoDuration::hours(23));
        let hit = cache.get::<String>(&key).await.expect("hit before expiry");
        assert!(hit.was_cache_hit());
        assert_eq!(hit.value(), "SELECT SUM(amount) FROM sales");

        clock.advance(ChronoDuration::hours(1) + ChronoDuration::minutes(1));
        assert!(cache.get::<String>(&key).await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.translation.hits, 1);
        assert_eq!(stats.translation.expired, 1);
        assert_eq!(stats.translation.entry_count, Some(0));
    }

    #[tokio::test]
    async fn test_result_tier_uses_short_ttl() {
        let (cache, clock) = setup();
        let key = FingerprintKeyer::new().result_key(&DatasetId::from(7), "SELECT 1");
        let result = QueryResult::new(vec!["x".to_string()], vec![vec![serde_json::json!(1)]]);
        assert!(cache.set(&key, &result).await);

        clock.advance(ChronoDuration::minutes(4));
        assert_eq!(
            cache.get::<QueryResult>(&key).await.map(|r| r.into_value()),
            Some(result)
        );

        clock.advance(ChronoDuration::minutes(2));
        assert!(cache.get::<QueryResult>(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_namespaces_do_not_share_storage() {
        let (cache, _clock) = setup();
        let translation = translation_key(7, "q");
        assert!(cache.set(&translation, &"SELECT 1".to_string()).await);

        let purged = cache
            .invalidate(&KeyPattern::dataset(Namespace::Result, &DatasetId::from(7)))
            .await
            .unwrap();
        assert_eq!(purged, 0);
        assert!(cache.get::<String>(&translation).await.is_some());
    }

    #[tokio::test]
    async fn test_unavailable_backend_degrades() {
        let clock: Arc<dyn Clock> = Arc::new(MockClock::default());
        let cache = TieredCache::new(
            Arc::new(DownBackend),
            Arc::new(DownBackend),
            clock,
            TierConfig::default(),
        );
        let key = translation_key(7, "q");

        assert!(!cache.set(&key, &"SELECT 1".to_string()).await);
        assert!(cache.get::<String>(&key).await.is_none());
        assert!(!cache.delete(&key).await);

        let stats = cache.stats().await;
        assert_eq!(stats.translation.fallbacks, 3);
        assert_eq!(stats.translation.misses, 1);
    }

    #[tokio::test]
    async fn test_hanging_backend_times_out() {
        let clock: Arc<dyn Clock> = Arc::new(MockClock::default());
        let cache = TieredCache::new(
            Arc::new(HangingBackend),
            Arc::new(HangingBackend),
            clock,
            TierConfig::default()
                .with_backend_timeout(Duration::from_millis(20))
                .with_purge_timeout(Duration::from_millis(40)),
        );
        let key = translation_key(7, "q");

        assert!(cache.get::<String>(&key).await.is_none());
        assert!(!cache.set(&key, &"SELECT 1".to_string()).await);
        assert!(matches!(
            cache
                .invalidate(&KeyPattern::dataset(Namespace::Translation, &DatasetId::from(7)))
                .await,
            Err(CacheError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_if_current_rejects_stale_epoch() {
        let (cache, _clock) = setup();
        let dataset = DatasetId::from(7);
        let key = translation_key(7, "q");

        let epoch = cache.epoch(&dataset);
        cache.bump_epoch(&dataset);
        assert!(!cache.set_if_current(&key, &"SELECT old".to_string(), epoch).await);
        assert!(cache.get::<String>(&key).await.is_none());

        let epoch = cache.epoch(&dataset);
        assert!(cache.set_if_current(&key, &"SELECT new".to_string(), epoch).await);
        assert_eq!(cache.stats().await.translation.stale_writes_skipped, 1);
    }

    #[tokio::test]
    async fn test_entries_before_bump_are_misses_without_purge() {
        let (cache, clock) = setup();
        let seven = translation_key(7, "q");
        let eight = translation_key(8, "q");
        assert!(cache.set(&seven, &"SELECT old".to_string()).await);
        assert!(cache.set(&eight, &"SELECT other".to_string()).await);

        // Same mock instant as the writes; the epoch stamp decides.
        cache.bump_epoch(&DatasetId::from(7));
        assert!(cache.get::<String>(&seven).await.is_none());
        assert!(cache.get::<String>(&eight).await.is_some());

        assert!(cache.set(&seven, &"SELECT new".to_string()).await);
        assert_eq!(
            cache.get::<String>(&seven).await.map(|r| r.into_value()),
            Some("SELECT new".to_string())
        );

        clock.advance(ChronoDuration::minutes(1));
        assert!(cache.get::<String>(&seven).await.is_some());
        assert_eq!(cache.stats().await.translation.fenced, 1);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let (cache, _clock) = setup();
        let key = translation_key(7, "q");
        assert!(cache.set(&key, &"not a number".to_string()).await);
        assert!(cache.get::<u64>(&key).await.is_none());
        assert!(cache.get::<String>(&key).await.is_none());
    }
}
