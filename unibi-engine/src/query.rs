//! Question answering through the two cache tiers.
//!
//! ```text
//! question -> fingerprint -> translation tier -(miss)-> single-flight -> generator
//!                                  |
//!                                 sql -> result tier -(miss)-> single-flight -> executor
//! ```
//!
//! Producers snapshot the dataset epoch before calling out and write with
//! [`TieredCache::set_if_current`], so a translation produced against a
//! corpus that was retrained meanwhile is returned to its callers but never
//! cached.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use unibi_core::{
    CacheKey, DatasetId, FingerprintKeyer, ProviderError, QueryResult, SchemaContext, UnibiResult,
};
use unibi_llm::{ensure_sql, Generator, QueryExecutor};
use unibi_storage::{InvalidationManager, SingleFlight, TieredCache};

/// One natural-language question against one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub dataset_id: DatasetId,
    pub question: String,
    pub schema: SchemaContext,
    /// `false` skips every cache read and write for this request.
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

fn default_use_cache() -> bool {
    true
}

impl QueryRequest {
    pub fn new(dataset_id: DatasetId, question: impl Into<String>, schema: SchemaContext) -> Self {
        Self {
            dataset_id,
            question: question.into(),
            schema,
            use_cache: true,
        }
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// SQL and rows for a question, with where each came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub sql: String,
    pub result: QueryResult,
    /// The SQL was served from the translation tier (no generator call).
    pub sql_from_cache: bool,
    /// The rows were served from the result tier (no executor call).
    pub result_from_cache: bool,
}

/// Outcome shared by every caller of one in-flight producer.
type Shared<T> = Result<(T, bool), ProviderError>;

/// Answers questions, generating and executing SQL at most once per key.
pub struct QueryService {
    cache: Arc<TieredCache>,
    invalidation: InvalidationManager,
    keyer: FingerprintKeyer,
    producer: Producer,
    translations: SingleFlight<Shared<String>>,
    executions: SingleFlight<Shared<QueryResult>>,
    waiter_timeout: Duration,
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("generator", &self.producer.generator.model_id())
            .field("translations_in_flight", &self.translations.in_flight())
            .field("executions_in_flight", &self.executions.in_flight())
            .field("generation_timeout", &self.producer.generation_timeout)
            .field("waiter_timeout", &self.waiter_timeout)
            .finish()
    }
}

/// Provider calls run by a single-flight producer task.
///
/// Owned handles only: the task outlives the caller that spawned it.
#[derive(Clone)]
struct Producer {
    cache: Arc<TieredCache>,
    generator: Arc<dyn Generator>,
    executor: Arc<dyn QueryExecutor>,
    generation_timeout: Duration,
}

impl Producer {
    async fn generate(&self, question: &str, schema: &SchemaContext) -> Result<String, ProviderError> {
        let raw = tokio::time::timeout(
            self.generation_timeout,
            self.generator.generate_sql(question, schema),
        )
        .await
        .map_err(|_| ProviderError::GenerationTimeout {
            timeout_ms: self.generation_timeout.as_millis() as u64,
        })??;
        ensure_sql(&raw)
    }

    async fn translation(self, key: CacheKey, request: QueryRequest) -> Shared<String> {
        // Another flight may have filled the entry since our miss.
        if let Some(hit) = self.cache.get::<String>(&key).await {
            return Ok((hit.into_value(), true));
        }
        let epoch = self.cache.epoch(&request.dataset_id);
        let sql = self.generate(&request.question, &request.schema).await?;
        let stored = self.cache.set_if_current(&key, &sql, epoch).await;
        debug!(key = %key, stored, "Translation generated");
        Ok((sql, false))
    }

    async fn result(self, key: CacheKey, dataset_id: DatasetId, sql: String) -> Shared<QueryResult> {
        if let Some(hit) = self.cache.get::<QueryResult>(&key).await {
            return Ok((hit.into_value(), true));
        }
        let epoch = self.cache.epoch(&dataset_id);
        let result = self.executor.execute(&sql, &dataset_id).await?;
        self.cache.set_if_current(&key, &result, epoch).await;
        Ok((result, false))
    }
}

impl QueryService {
    pub fn new(
        cache: Arc<TieredCache>,
        generator: Arc<dyn Generator>,
        executor: Arc<dyn QueryExecutor>,
        generation_timeout: Duration,
        waiter_timeout: Duration,
    ) -> Self {
        Self {
            invalidation: InvalidationManager::new(Arc::clone(&cache)),
            producer: Producer {
                cache: Arc::clone(&cache),
                generator,
                executor,
                generation_timeout,
            },
            cache,
            keyer: FingerprintKeyer::new(),
            translations: SingleFlight::new(),
            executions: SingleFlight::new(),
            waiter_timeout,
        }
    }

    /// Use a different keyer, e.g. [`FingerprintKeyer::exact`].
    pub fn with_keyer(mut self, keyer: FingerprintKeyer) -> Self {
        self.keyer = keyer;
        self
    }

    pub fn keyer(&self) -> &FingerprintKeyer {
        &self.keyer
    }

    /// Answer a question.
    ///
    /// If the SQL fails to execute, its translation entry is dropped before
    /// the `Query` error is returned, so the next ask regenerates it.
    pub async fn ask(&self, request: &QueryRequest) -> UnibiResult<QueryAnswer> {
        if !request.use_cache {
            return self.ask_uncached(request).await;
        }

        let key = self.keyer.fingerprint(
            &request.dataset_id,
            &request.question,
            &request.schema.version,
        );
        let (sql, sql_from_cache) = self.translate(&key, request).await?;

        match self.execute(&request.dataset_id, &sql).await {
            Ok((result, result_from_cache)) => Ok(QueryAnswer {
                sql,
                result,
                sql_from_cache,
                result_from_cache,
            }),
            Err(e) => {
                if matches!(e, ProviderError::Query { .. }) {
                    let dropped = self.invalidation.invalidate_key(&key).await;
                    warn!(
                        dataset_id = %request.dataset_id,
                        key = %key,
                        dropped,
                        error = %e,
                        "Cached SQL failed to execute"
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Drop the cached translation of one question.
    pub async fn forget_question(
        &self,
        dataset_id: &DatasetId,
        question: &str,
        schema_version: &str,
    ) -> bool {
        self.invalidation
            .invalidate_question(&self.keyer, dataset_id, question, schema_version)
            .await
    }

    async fn ask_uncached(&self, request: &QueryRequest) -> UnibiResult<QueryAnswer> {
        let sql = self
            .producer
            .generate(&request.question, &request.schema)
            .await?;
        let result = self.producer.executor.execute(&sql, &request.dataset_id).await?;
        Ok(QueryAnswer {
            sql,
            result,
            sql_from_cache: false,
            result_from_cache: false,
        })
    }

    async fn translate(&self, key: &CacheKey, request: &QueryRequest) -> Shared<String> {
        if let Some(hit) = self.cache.get::<String>(key).await {
            debug!(key = %key, "Translation cache hit");
            return Ok((hit.into_value(), true));
        }

        let producer = self.producer.clone();
        let (owned_key, owned_request) = (key.clone(), request.clone());
        let outcome = self
            .translations
            .execute_once_within(&key.render(), self.waiter_timeout, move || {
                producer.translation(owned_key, owned_request)
            })
            .await;

        outcome.unwrap_or_else(|| {
            Err(ProviderError::GenerationTimeout {
                timeout_ms: self.waiter_timeout.as_millis() as u64,
            })
        })
    }

    async fn execute(&self, dataset_id: &DatasetId, sql: &str) -> Shared<QueryResult> {
        let key = self.keyer.result_key(dataset_id, sql);
        if let Some(hit) = self.cache.get::<QueryResult>(&key).await {
            debug!(key = %key, "Result cache hit");
            return Ok((hit.into_value(), true));
        }

        let producer = self.producer.clone();
        let (owned_key, owned_dataset, owned_sql) = (key.clone(), dataset_id.clone(), sql.to_string());
        let outcome = self
            .executions
            .execute_once_within(&key.render(), self.waiter_timeout, move || {
                producer.result(owned_key, owned_dataset, owned_sql)
            })
            .await;

        outcome.unwrap_or_else(|| {
            Err(ProviderError::Query {
                reason: format!(
                    "no result within {}ms of waiting on the in-flight execution",
                    self.waiter_timeout.as_millis()
                ),
            })
        })
    }
}
