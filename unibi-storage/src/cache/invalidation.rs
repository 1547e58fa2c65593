//! Dataset-scoped cache invalidation.

use std::sync::Arc;

use unibi_core::{CacheKey, DatasetId, FingerprintKeyer, KeyPattern, Namespace};

use super::epoch::Epoch;
use super::tiered::TieredCache;

/// Outcome of purging one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationReport {
    pub dataset_id: DatasetId,
    /// Epoch the dataset moved to. Producers that started earlier will not
    /// write their results.
    pub epoch: Epoch,
    pub translation_purged: u64,
    pub result_purged: u64,
    /// Namespaces whose bulk delete failed, with the reason.
    pub failures: Vec<(Namespace, String)>,
}

impl InvalidationReport {
    pub fn total_purged(&self) -> u64 {
        self.translation_purged + self.result_purged
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Purges cache entries when a dataset's training corpus changes.
#[derive(Debug, Clone)]
pub struct InvalidationManager {
    cache: Arc<TieredCache>,
}

impl InvalidationManager {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self { cache }
    }

    /// Purge both tiers for one dataset. Other datasets are untouched.
    ///
    /// The epoch is bumped before the purge so that an in-flight producer
    /// either sees the new epoch and skips its write, or writes before the
    /// purge and is removed by it.
    pub async fn invalidate_dataset(&self, dataset_id: &DatasetId) -> InvalidationReport {
        let epoch = self.cache.bump_epoch(dataset_id);
        let mut report = InvalidationReport {
            dataset_id: dataset_id.clone(),
            epoch,
            translation_purged: 0,
            result_purged: 0,
            failures: Vec::new(),
        };

        for namespace in Namespace::ALL {
            let pattern = KeyPattern::dataset(namespace, dataset_id);
            match self.cache.invalidate(&pattern).await {
                Ok(purged) => match namespace {
                    Namespace::Translation => report.translation_purged = purged,
                    Namespace::Result => report.result_purged = purged,
                },
                Err(e) => {
                    tracing::warn!(
                        dataset_id = %dataset_id,
                        pattern = %pattern,
                        error = %e,
                        "Cache purge failed"
                    );
                    report.failures.push((namespace, e.to_string()));
                }
            }
        }

        tracing::info!(
            dataset_id = %dataset_id,
            epoch = epoch.sequence(),
            translation_purged = report.translation_purged,
            result_purged = report.result_purged,
            "Dataset cache invalidated"
        );
        report
    }

    /// Drop a single cached entry, e.g. a translation whose SQL no longer
    /// executes.
    pub async fn invalidate_key(&self, key: &CacheKey) -> bool {
        let removed = self.cache.delete(key).await;
        tracing::debug!(key = %key, removed, "Cache entry invalidated");
        removed
    }

    /// Drop the cached translation of one question.
    pub async fn invalidate_question(
        &self,
        keyer: &FingerprintKeyer,
        dataset_id: &DatasetId,
        question: &str,
        schema_version: &str,
    ) -> bool {
        let key = keyer.fingerprint(dataset_id, question, schema_version);
        self.invalidate_key(&key).await
    }
}
