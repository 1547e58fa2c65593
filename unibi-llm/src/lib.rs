//! Universal BI LLM - Provider Capability Traits
//!
//! Small traits for the three external capabilities the engine depends on:
//! turning a question into SQL, ingesting training material into the
//! provider's vector store, and executing SQL against a dataset. Concrete
//! adapters live in [`providers`]; mocks for tests live at the bottom of this
//! file.

pub mod providers;
pub mod sql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use unibi_core::{CorpusUnit, DatasetId, ProviderError, QueryResult, SchemaContext};

pub use sql::{clean_sql, ensure_sql};

// ============================================================================
// GENERATOR TRAIT
// ============================================================================

/// Translates natural-language questions into SQL.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate SQL for a question.
    ///
    /// # Arguments
    /// * `question` - The user's question, as typed
    /// * `schema` - Schema description of the dataset being queried
    ///
    /// # Returns
    /// * `Ok(String)` - The SQL text (may still need [`clean_sql`])
    /// * `Err(ProviderError)` - If generation fails
    async fn generate_sql(&self, question: &str, schema: &SchemaContext)
        -> Result<String, ProviderError>;

    /// Model identifier (e.g., "qwen-max", "gpt-4o-mini").
    fn model_id(&self) -> &str;
}

// ============================================================================
// CORPUS INGESTOR TRAIT
// ============================================================================

/// Acknowledgement of one ingested corpus unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestAck {
    /// Provider-side identifier of the stored training item.
    pub id: String,
}

/// Ingests training material into the provider's vector store.
#[async_trait]
pub trait CorpusIngestor: Send + Sync {
    /// Ingest one unit for a dataset.
    ///
    /// # Returns
    /// * `Ok(IngestAck)` - The unit is stored and will inform future generation
    /// * `Err(ProviderError::Ingestion)` - If the unit could not be stored
    async fn ingest(&self, dataset_id: &DatasetId, unit: &CorpusUnit)
        -> Result<IngestAck, ProviderError>;
}

// ============================================================================
// QUERY EXECUTOR TRAIT
// ============================================================================

/// Runs SQL against a dataset's data source.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute SQL and return columns and rows.
    ///
    /// # Returns
    /// * `Err(ProviderError::Query)` - If the statement fails
    async fn execute(&self, sql: &str, dataset_id: &DatasetId) -> Result<QueryResult, ProviderError>;
}

// ============================================================================
// PROVIDER REGISTRY
// ============================================================================

/// Registry for the engine's external capabilities.
/// Providers must be explicitly registered - no auto-discovery.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    generator: Option<Arc<dyn Generator>>,
    ingestor: Option<Arc<dyn CorpusIngestor>>,
    executor: Option<Arc<dyn QueryExecutor>>,
}

fn not_configured(capability: &str) -> ProviderError {
    ProviderError::NotConfigured {
        capability: capability.to_string(),
    }
}

impl ProviderRegistry {
    /// Create a new empty provider registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the SQL generator, replacing any previous one.
    pub fn register_generator(&mut self, provider: Arc<dyn Generator>) {
        self.generator = Some(provider);
    }

    /// Register the corpus ingestor, replacing any previous one.
    pub fn register_ingestor(&mut self, provider: Arc<dyn CorpusIngestor>) {
        self.ingestor = Some(provider);
    }

    /// Register the query executor, replacing any previous one.
    pub fn register_executor(&mut self, provider: Arc<dyn QueryExecutor>) {
        self.executor = Some(provider);
    }

    /// Get the registered generator.
    ///
    /// # Returns
    /// * `Err(ProviderError::NotConfigured)` - If no generator is registered
    pub fn generator(&self) -> Result<Arc<dyn Generator>, ProviderError> {
        self.generator
            .clone()
            .ok_or_else(|| not_configured("generator"))
    }

    pub fn ingestor(&self) -> Result<Arc<dyn CorpusIngestor>, ProviderError> {
        self.ingestor.clone().ok_or_else(|| not_configured("ingestor"))
    }

    pub fn executor(&self) -> Result<Arc<dyn QueryExecutor>, ProviderError> {
        self.executor.clone().ok_or_else(|| not_configured("executor"))
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub fn has_ingestor(&self) -> bool {
        self.ingestor.is_some()
    }

    pub fn has_executor(&self) -> bool {
        self.executor.is_some()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("generator", &self.generator.as_ref().map(|g| g.model_id().to_string()))
            .field("ingestor", &self.ingestor.is_some())
            .field("executor", &self.executor.is_some())
            .finish()
    }
}

// ============================================================================
// USAGE TRACKER
// ============================================================================

/// Tracks provider usage. Thread-safe via atomic operations.
#[derive(Debug, Default)]
pub struct UsageTracker {
    generations: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed generation call.
    pub fn record_generation(&self, prompt_tokens: u64, completion_tokens: u64) {
        self.generations.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(completion_tokens, Ordering::Relaxed);
    }

    pub fn generations(&self) -> u64 {
        self.generations.load(Ordering::Relaxed)
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens.load(Ordering::Relaxed)
    }

    pub fn completion_tokens(&self) -> u64 {
        self.completion_tokens.load(Ordering::Relaxed)
    }
}

// ============================================================================
// MOCK PROVIDERS FOR TESTING
// ============================================================================

/// Generator returning canned SQL and counting calls.
///
/// Questions without a canned answer get `SELECT '<question>' AS answer`.
#[derive(Debug, Default)]
pub struct MockGenerator {
    canned: Mutex<HashMap<String, String>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    failure: Mutex<Option<ProviderError>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer `question` (matched exactly) with `sql`.
    pub fn with_answer(self, question: impl Into<String>, sql: impl Into<String>) -> Self {
        self.canned
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(question.into(), sql.into());
        self
    }

    /// Fail every subsequent call with `error` (or stop failing with `None`).
    pub fn set_failure(&self, error: Option<ProviderError>) {
        *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = error;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate_sql(
        &self,
        question: &str,
        _schema: &SchemaContext,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.lock().unwrap_or_else(|p| p.into_inner()).clone() {
            return Err(error);
        }
        let canned = self
            .canned
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(question)
            .cloned();
        Ok(canned.unwrap_or_else(|| format!("SELECT '{}' AS answer", question.replace('\'', "''"))))
    }

    fn model_id(&self) -> &str {
        "mock-generator"
    }
}

/// Ingestor that records every unit it receives.
#[derive(Debug, Default)]
pub struct MockIngestor {
    ingested: Mutex<Vec<(DatasetId, CorpusUnit)>>,
    /// Fail the call with this zero-based index.
    fail_at: Option<usize>,
    calls: AtomicUsize,
}

impl MockIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(call: usize) -> Self {
        Self {
            fail_at: Some(call),
            ..Self::default()
        }
    }

    pub fn ingested(&self) -> Vec<(DatasetId, CorpusUnit)> {
        self.ingested
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CorpusIngestor for MockIngestor {
    async fn ingest(
        &self,
        dataset_id: &DatasetId,
        unit: &CorpusUnit,
    ) -> Result<IngestAck, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(call) {
            return Err(ProviderError::Ingestion {
                unit: unit.describe(),
                reason: "vector store rejected the document".to_string(),
            });
        }
        self.ingested
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((dataset_id.clone(), unit.clone()));
        Ok(IngestAck {
            id: format!("{}-{}", dataset_id, call),
        })
    }
}

/// Executor returning one fixed result and counting calls.
#[derive(Debug, Default)]
pub struct MockExecutor {
    result: QueryResult,
    /// Statements containing this substring fail.
    fail_on: Option<String>,
    calls: AtomicUsize,
}

impl MockExecutor {
    pub fn new(result: QueryResult) -> Self {
        Self {
            result,
            ..Self::default()
        }
    }

    pub fn failing_on(mut self, fragment: impl Into<String>) -> Self {
        self.fail_on = Some(fragment.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for MockExecutor {
    async fn execute(&self, sql: &str, _dataset_id: &DatasetId) -> Result<QueryResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fragment) = &self.fail_on {
            if sql.contains(fragment.as_str()) {
                return Err(ProviderError::Query {
                    reason: format!("no such table in statement: {}", sql),
                });
            }
        }
        Ok(self.result.clone())
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> SchemaContext {
        SchemaContext::new("v1", "CREATE TABLE sales (amount DECIMAL, sold_at DATE)")
    }

    #[test]
    fn test_provider_registry_new_is_empty() {
        let registry = ProviderRegistry::new();
        assert!(!registry.has_generator());
        assert!(!registry.has_ingestor());
        assert!(!registry.has_executor());
        assert!(matches!(
            registry.generator(),
            Err(ProviderError::NotConfigured { .. })
        ));
    }

    #[test]
    fn test_provider_registry_register() {
        let mut registry = ProviderRegistry::new();
        registry.register_generator(Arc::new(MockGenerator::new()));
        registry.register_ingestor(Arc::new(MockIngestor::new()));
        assert!(registry.has_generator());
        assert!(registry.has_ingestor());
        assert!(!registry.has_executor());
        assert_eq!(registry.generator().unwrap().model_id(), "mock-generator");
    }

    #[tokio::test]
    async fn test_mock_generator_canned_and_default() {
        let generator = MockGenerator::new().with_answer("total sales", "SELECT SUM(amount) FROM sales");
        assert_eq!(
            generator.generate_sql("total sales", &schema()).await.unwrap(),
            "SELECT SUM(amount) FROM sales"
        );
        assert_eq!(
            generator.generate_sql("it's late", &schema()).await.unwrap(),
            "SELECT 'it''s late' AS answer"
        );
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_generator_failure() {
        let generator = MockGenerator::new();
        generator.set_failure(Some(ProviderError::Generation {
            reason: "quota".to_string(),
        }));
        assert!(generator.generate_sql("q", &schema()).await.is_err());
        generator.set_failure(None);
        assert!(generator.generate_sql("q", &schema()).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_ingestor_fails_at_index() {
        let ingestor = MockIngestor::failing_at(1);
        let unit = CorpusUnit::Documentation {
            title: "terms".to_string(),
            text: "GMV".to_string(),
        };
        let dataset = DatasetId::from(7);
        assert!(ingestor.ingest(&dataset, &unit).await.is_ok());
        assert!(matches!(
            ingestor.ingest(&dataset, &unit).await,
            Err(ProviderError::Ingestion { .. })
        ));
        assert_eq!(ingestor.ingested().len(), 1);
        assert_eq!(ingestor.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_executor() {
        let executor = MockExecutor::new(QueryResult::new(vec!["n".to_string()], vec![]))
            .failing_on("missing_table");
        let dataset = DatasetId::from(7);
        assert!(executor.execute("SELECT 1", &dataset).await.is_ok());
        assert!(matches!(
            executor.execute("SELECT * FROM missing_table", &dataset).await,
            Err(ProviderError::Query { .. })
        ));
    }

    #[test]
    fn test_usage_tracker() {
        let tracker = UsageTracker::new();
        tracker.record_generation(120, 30);
        tracker.record_generation(80, 20);
        assert_eq!(tracker.generations(), 2);
        assert_eq!(tracker.prompt_tokens(), 200);
        assert_eq!(tracker.completion_tokens(), 50);
    }
}
