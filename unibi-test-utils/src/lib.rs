//! Universal BI Test Utilities
//!
//! Controllable providers and backends, proptest generators and fixtures
//! shared by the workspace's integration tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;
use unibi_core::{CacheError, CorpusUnit, DatasetId, KeyPattern, ProviderError};
use unibi_llm::{CorpusIngestor, IngestAck, MockIngestor};
use unibi_storage::{CacheBackend, MemoryCacheBackend, StoredEntry};

// Re-export the mock providers for convenience
pub use unibi_llm::{MockExecutor, MockGenerator};

// ============================================================================
// GATED INGESTOR
// ============================================================================

/// Ingestor that parks one call until the test releases it.
///
/// The call with zero-based index `gate_at` signals [`wait_until_reached`]
/// and then blocks until [`release`] is called. This lets a test issue
/// pause or cancel requests while a specific unit is mid-ingestion.
///
/// [`wait_until_reached`]: GatedIngestor::wait_until_reached
/// [`release`]: GatedIngestor::release
#[derive(Debug, Default)]
pub struct GatedIngestor {
    inner: MockIngestor,
    gate_at: usize,
    calls: AtomicUsize,
    reached: Notify,
    released: Notify,
}

impl GatedIngestor {
    pub fn new(gate_at: usize) -> Self {
        Self {
            gate_at,
            ..Self::default()
        }
    }

    /// Wait until the gated call has started.
    pub async fn wait_until_reached(&self) {
        self.reached.notified().await;
    }

    /// Let the gated call finish.
    pub fn release(&self) {
        self.released.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Units ingested so far, in order.
    pub fn ingested(&self) -> Vec<CorpusUnit> {
        self.inner
            .ingested()
            .into_iter()
            .map(|(_, unit)| unit)
            .collect()
    }
}

#[async_trait]
impl CorpusIngestor for GatedIngestor {
    async fn ingest(
        &self,
        dataset_id: &DatasetId,
        unit: &CorpusUnit,
    ) -> Result<IngestAck, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.gate_at {
            self.reached.notify_one();
            self.released.notified().await;
        }
        self.inner.ingest(dataset_id, unit).await
    }
}

// ============================================================================
// FLAKY BACKEND
// ============================================================================

/// In-memory cache backend that can be switched off to simulate an outage.
///
/// Bulk deletes can be failed on their own, the way a `SCAN` over a large
/// keyspace times out while point reads still succeed.
#[derive(Debug)]
pub struct FlakyBackend {
    inner: MemoryCacheBackend,
    available: AtomicBool,
    purges_available: AtomicBool,
}

impl Default for FlakyBackend {
    fn default() -> Self {
        Self {
            inner: MemoryCacheBackend::new(),
            available: AtomicBool::new(true),
            purges_available: AtomicBool::new(true),
        }
    }
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail `delete_matching` only.
    pub fn set_purge_available(&self, available: bool) {
        self.purges_available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable {
                backend: "flaky".to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        self.check()?;
        self.inner.set(key, entry).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, CacheError> {
        self.check()?;
        if !self.purges_available.load(Ordering::SeqCst) {
            return Err(CacheError::Timeout {
                backend: "flaky".to_string(),
                timeout_ms: 0,
            });
        }
        self.inner.delete_matching(pattern).await
    }

    async fn len(&self) -> Result<Option<u64>, CacheError> {
        self.check()?;
        self.inner.len().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use proptest::prelude::*;
    use unibi_core::{CorpusUnit, DatasetId, JobStatus};

    /// Valid dataset identifiers.
    pub fn arb_dataset_id() -> impl Strategy<Value = DatasetId> {
        "[A-Za-z0-9_-]{1,32}".prop_filter_map("valid dataset id", |s| DatasetId::new(s).ok())
    }

    /// Question-like text with irregular spacing and casing.
    pub fn arb_question() -> impl Strategy<Value = String> {
        proptest::collection::vec("[A-Za-z]{1,10}", 1..8).prop_flat_map(|words| {
            let n = words.len();
            (
                Just(words),
                proptest::collection::vec(prop_oneof![Just(" "), Just("  "), Just("\t")], n),
            )
                .prop_map(|(words, gaps)| {
                    words
                        .iter()
                        .zip(gaps)
                        .map(|(w, g)| format!("{}{}", w, g))
                        .collect::<String>()
                })
        })
    }

    pub fn arb_corpus_unit() -> impl Strategy<Value = CorpusUnit> {
        prop_oneof![
            "[a-z_]{1,16}".prop_map(|table| CorpusUnit::Ddl {
                statement: format!("CREATE TABLE {} (id INT)", table),
                table,
            }),
            ("[a-z ]{1,24}", "[a-z ]{1,64}")
                .prop_map(|(title, text)| CorpusUnit::Documentation { title, text }),
            "[a-z_]{1,16}".prop_map(|table| CorpusUnit::QuestionSql {
                question: format!("how many rows are in {}", table),
                sql: format!("SELECT COUNT(*) FROM {}", table),
            }),
        ]
    }

    pub fn arb_job_status() -> impl Strategy<Value = JobStatus> {
        prop_oneof![
            Just(JobStatus::Queued),
            Just(JobStatus::Running),
            Just(JobStatus::Paused),
            Just(JobStatus::Completed),
            Just(JobStatus::Failed),
            Just(JobStatus::Cancelled),
        ]
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use serde_json::json;
    use unibi_core::{CorpusSpec, CorpusUnit, QueryResult, SchemaContext};

    pub fn sales_schema() -> SchemaContext {
        SchemaContext::new(
            "v1",
            "CREATE TABLE sales (id INT, region VARCHAR, amount DECIMAL, sold_at DATE)",
        )
    }

    pub fn sales_result() -> QueryResult {
        QueryResult::new(
            vec!["total".to_string()],
            vec![vec![json!(125_000.5)]],
        )
    }

    /// A corpus of `n` table DDL units.
    pub fn ddl_corpus(n: usize) -> CorpusSpec {
        CorpusSpec::new(
            (0..n)
                .map(|i| CorpusUnit::Ddl {
                    table: format!("table_{}", i),
                    statement: format!("CREATE TABLE table_{} (id INT, amount DECIMAL)", i),
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use unibi_core::CacheKey;

    #[tokio::test]
    async fn test_gated_ingestor_parks_the_gated_call() {
        let ingestor = Arc::new(GatedIngestor::new(1));
        let dataset = DatasetId::from(7);
        let units = fixtures::ddl_corpus(2).units;

        ingestor.ingest(&dataset, &units[0]).await.unwrap();

        let worker = {
            let ingestor = Arc::clone(&ingestor);
            let dataset = dataset.clone();
            let unit = units[1].clone();
            tokio::spawn(async move { ingestor.ingest(&dataset, &unit).await })
        };

        ingestor.wait_until_reached().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!worker.is_finished());
        assert_eq!(ingestor.ingested().len(), 1);

        ingestor.release();
        worker.await.unwrap().unwrap();
        assert_eq!(ingestor.ingested().len(), 2);
    }

    #[tokio::test]
    async fn test_flaky_backend_outage() {
        let backend = FlakyBackend::new();
        let key = CacheKey::parse("translation:7:abc").unwrap().render();
        let entry = StoredEntry::new(b"SELECT 1".to_vec(), chrono::Utc::now(), Duration::from_secs(60));

        backend.set(&key, entry).await.unwrap();
        backend.set_available(false);
        assert!(backend.get(&key).await.is_err());
        backend.set_available(true);
        assert!(backend.get(&key).await.unwrap().is_some());

        backend.set_purge_available(false);
        let pattern = KeyPattern::dataset(unibi_core::Namespace::Translation, &DatasetId::from(7));
        assert!(backend.delete_matching(&pattern).await.is_err());
        assert!(backend.get(&key).await.unwrap().is_some());
    }
}
