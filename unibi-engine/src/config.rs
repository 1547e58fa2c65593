//! Engine Configuration Module
//!
//! Plain configuration structs with defaults from [`crate::constants`].
//! Every struct can be loaded from `UNIBI_*` environment variables; values
//! that are missing or fail to parse fall back to the default, and
//! [`EngineConfig::validate`] rejects combinations the engine cannot run
//! with.

use crate::constants::*;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use unibi_core::ConfigError;
use unibi_storage::TierConfig;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// CACHE TIERS
// ============================================================================

/// Freshness and timeout settings for the two cache tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTierConfig {
    /// TTL of question -> SQL entries (default: 7 days)
    pub translation_ttl: Duration,

    /// TTL of SQL -> rows entries (default: 5 minutes)
    pub result_ttl: Duration,

    /// Timeout of one backend call before it degrades to a miss/no-op
    /// (default: 250ms)
    pub backend_timeout: Duration,

    /// How long a caller waits on someone else's in-flight producer
    /// (default: 90 seconds)
    pub waiter_timeout: Duration,

    /// Timeout of one dataset-wide bulk delete (default: 30 seconds)
    pub purge_timeout: Duration,
}

impl Default for CacheTierConfig {
    fn default() -> Self {
        Self {
            translation_ttl: Duration::from_secs(DEFAULT_TRANSLATION_TTL_SECS),
            result_ttl: Duration::from_secs(DEFAULT_RESULT_TTL_SECS),
            backend_timeout: Duration::from_millis(DEFAULT_BACKEND_TIMEOUT_MS),
            waiter_timeout: Duration::from_secs(DEFAULT_WAITER_TIMEOUT_SECS),
            purge_timeout: Duration::from_secs(DEFAULT_PURGE_TIMEOUT_SECS),
        }
    }
}

impl CacheTierConfig {
    /// Environment variables:
    /// - `UNIBI_TRANSLATION_TTL_SECS` (default: 604800)
    /// - `UNIBI_RESULT_TTL_SECS` (default: 300)
    /// - `UNIBI_CACHE_BACKEND_TIMEOUT_MS` (default: 250)
    /// - `UNIBI_CACHE_WAITER_TIMEOUT_SECS` (default: 90)
    /// - `UNIBI_CACHE_PURGE_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Self {
        Self {
            translation_ttl: Duration::from_secs(env_or(
                "UNIBI_TRANSLATION_TTL_SECS",
                DEFAULT_TRANSLATION_TTL_SECS,
            )),
            result_ttl: Duration::from_secs(env_or("UNIBI_RESULT_TTL_SECS", DEFAULT_RESULT_TTL_SECS)),
            backend_timeout: Duration::from_millis(env_or(
                "UNIBI_CACHE_BACKEND_TIMEOUT_MS",
                DEFAULT_BACKEND_TIMEOUT_MS,
            )),
            waiter_timeout: Duration::from_secs(env_or(
                "UNIBI_CACHE_WAITER_TIMEOUT_SECS",
                DEFAULT_WAITER_TIMEOUT_SECS,
            )),
            purge_timeout: Duration::from_secs(env_or(
                "UNIBI_CACHE_PURGE_TIMEOUT_SECS",
                DEFAULT_PURGE_TIMEOUT_SECS,
            )),
        }
    }

    /// The storage-layer view of these settings.
    pub fn tier_config(&self) -> TierConfig {
        TierConfig::new()
            .with_translation_ttl(self.translation_ttl)
            .with_result_ttl(self.result_ttl)
            .with_backend_timeout(self.backend_timeout)
            .with_purge_timeout(self.purge_timeout)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.translation_ttl.is_zero() {
            return Err(invalid("translation_ttl", "0s", "must be positive"));
        }
        if self.result_ttl.is_zero() {
            return Err(invalid("result_ttl", "0s", "must be positive"));
        }
        if self.backend_timeout.is_zero() {
            return Err(invalid("backend_timeout", "0ms", "must be positive"));
        }
        if self.waiter_timeout.is_zero() {
            return Err(invalid("waiter_timeout", "0s", "must be positive"));
        }
        if self.purge_timeout.is_zero() {
            return Err(invalid("purge_timeout", "0s", "must be positive"));
        }
        Ok(())
    }
}

// ============================================================================
// TRAINING
// ============================================================================

/// Training orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingConfig {
    /// Jobs ingesting at the same time across all datasets (default: 4).
    /// Further jobs wait in `Queued`.
    pub max_concurrent_jobs: usize,

    /// Timeout of one ingestion unit (default: 120 seconds)
    pub unit_timeout: Duration,

    /// Log entries returned when no limit is given (default: 200)
    pub default_log_limit: usize,

    /// Cap on requested log limits (default: 1000)
    pub max_log_limit: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            unit_timeout: Duration::from_secs(DEFAULT_UNIT_TIMEOUT_SECS),
            default_log_limit: DEFAULT_LOG_LIMIT,
            max_log_limit: MAX_LOG_LIMIT,
        }
    }
}

impl TrainingConfig {
    /// Environment variables:
    /// - `UNIBI_TRAINING_MAX_CONCURRENT_JOBS` (default: 4)
    /// - `UNIBI_TRAINING_UNIT_TIMEOUT_SECS` (default: 120)
    /// - `UNIBI_TRAINING_LOG_LIMIT` (default: 200)
    /// - `UNIBI_TRAINING_MAX_LOG_LIMIT` (default: 1000)
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: env_or(
                "UNIBI_TRAINING_MAX_CONCURRENT_JOBS",
                DEFAULT_MAX_CONCURRENT_JOBS,
            ),
            unit_timeout: Duration::from_secs(env_or(
                "UNIBI_TRAINING_UNIT_TIMEOUT_SECS",
                DEFAULT_UNIT_TIMEOUT_SECS,
            )),
            default_log_limit: env_or("UNIBI_TRAINING_LOG_LIMIT", DEFAULT_LOG_LIMIT),
            max_log_limit: env_or("UNIBI_TRAINING_MAX_LOG_LIMIT", MAX_LOG_LIMIT),
        }
    }

    /// Resolve a caller-supplied log limit.
    pub fn log_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_log_limit)
            .min(self.max_log_limit)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(invalid("max_concurrent_jobs", 0, "at least one worker is required"));
        }
        if self.unit_timeout.is_zero() {
            return Err(invalid("unit_timeout", "0s", "must be positive"));
        }
        if self.default_log_limit == 0 || self.default_log_limit > self.max_log_limit {
            return Err(invalid(
                "default_log_limit",
                self.default_log_limit,
                "must be between 1 and max_log_limit",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// PROVIDER
// ============================================================================

/// Inference provider settings.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Timeout of one generation call, surfaced as `GenerationTimeout`
    /// (default: 60 seconds)
    pub generation_timeout: Duration,

    /// Base URL of the OpenAI-compatible endpoint
    pub api_base: String,

    /// API key; the hosted generator is only built when present
    pub api_key: Option<String>,

    /// Chat model used for generation
    pub model: String,

    /// Request budget per minute
    pub requests_per_minute: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
            api_base: unibi_llm::providers::openai::client::DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
        }
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("generation_timeout", &self.generation_timeout)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

impl ProviderSettings {
    /// Environment variables:
    /// - `UNIBI_GENERATION_TIMEOUT_SECS` (default: 60)
    /// - `UNIBI_LLM_API_BASE` (default: OpenAI)
    /// - `UNIBI_LLM_API_KEY` (no default)
    /// - `UNIBI_LLM_MODEL` (default: gpt-4o-mini)
    /// - `UNIBI_LLM_REQUESTS_PER_MINUTE` (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            generation_timeout: Duration::from_secs(env_or(
                "UNIBI_GENERATION_TIMEOUT_SECS",
                DEFAULT_GENERATION_TIMEOUT_SECS,
            )),
            api_base: std::env::var("UNIBI_LLM_API_BASE").unwrap_or(defaults.api_base),
            api_key: std::env::var("UNIBI_LLM_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            model: std::env::var("UNIBI_LLM_MODEL").unwrap_or(defaults.model),
            requests_per_minute: env_or(
                "UNIBI_LLM_REQUESTS_PER_MINUTE",
                DEFAULT_REQUESTS_PER_MINUTE,
            ),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation_timeout.is_zero() {
            return Err(invalid("generation_timeout", "0s", "must be positive"));
        }
        if self.requests_per_minute == 0 {
            return Err(invalid("requests_per_minute", 0, "must be positive"));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "model".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// STORAGE
// ============================================================================

/// Where cache entries and job records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process memory; nothing survives a restart.
    Memory,
    /// LMDB environments under `lmdb_path`.
    Lmdb,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "lmdb" => Ok(StorageBackend::Lmdb),
            other => Err(invalid("storage_backend", other, "expected memory or lmdb")),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub backend: StorageBackend,

    /// Root directory of the LMDB environments
    pub lmdb_path: PathBuf,

    /// LMDB map size per environment
    pub lmdb_map_size_mb: usize,

    /// When set (and built with the `redis` feature), both cache tiers use
    /// this Redis server instead of `backend`.
    pub redis_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            lmdb_path: PathBuf::from(DEFAULT_LMDB_PATH),
            lmdb_map_size_mb: DEFAULT_LMDB_MAP_SIZE_MB,
            redis_url: None,
        }
    }
}

impl StorageSettings {
    /// Environment variables:
    /// - `UNIBI_STORAGE_BACKEND`: "memory" or "lmdb" (default: memory)
    /// - `UNIBI_LMDB_PATH` (default: ./data/unibi)
    /// - `UNIBI_LMDB_MAP_SIZE_MB` (default: 1024)
    /// - `UNIBI_REDIS_URL` (no default)
    pub fn from_env() -> Self {
        Self {
            backend: env_or("UNIBI_STORAGE_BACKEND", StorageBackend::Memory),
            lmdb_path: std::env::var("UNIBI_LMDB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LMDB_PATH)),
            lmdb_map_size_mb: env_or("UNIBI_LMDB_MAP_SIZE_MB", DEFAULT_LMDB_MAP_SIZE_MB),
            redis_url: std::env::var("UNIBI_REDIS_URL").ok(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == StorageBackend::Lmdb && self.lmdb_map_size_mb == 0 {
            return Err(invalid("lmdb_map_size_mb", 0, "must be positive"));
        }
        if let Some(url) = &self.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(invalid("redis_url", url, "expected a redis:// URL"));
            }
        }
        Ok(())
    }
}

// ============================================================================
// TELEMETRY
// ============================================================================

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(invalid("log_format", other, "expected json or pretty")),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,

    /// Filter used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Environment variables:
    /// - `UNIBI_LOG_FORMAT`: "json" or "pretty" (default: json)
    /// - `UNIBI_LOG_FILTER` (default: unibi_engine=debug,unibi_storage=info,info)
    pub fn from_env() -> Self {
        Self {
            log_format: env_or("UNIBI_LOG_FORMAT", LogFormat::Json),
            filter: std::env::var("UNIBI_LOG_FILTER")
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub cache: CacheTierConfig,
    pub training: TrainingConfig,
    pub provider: ProviderSettings,
    pub storage: StorageSettings,
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            cache: CacheTierConfig::from_env(),
            training: TrainingConfig::from_env(),
            provider: ProviderSettings::from_env(),
            storage: StorageSettings::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }

    /// Short timeouts, in-memory storage and human-readable logs.
    pub fn development() -> Self {
        Self {
            cache: CacheTierConfig {
                backend_timeout: Duration::from_millis(100),
                waiter_timeout: Duration::from_secs(15),
                ..CacheTierConfig::default()
            },
            training: TrainingConfig {
                max_concurrent_jobs: 2,
                unit_timeout: Duration::from_secs(10),
                ..TrainingConfig::default()
            },
            provider: ProviderSettings {
                generation_timeout: Duration::from_secs(10),
                ..ProviderSettings::default()
            },
            storage: StorageSettings::default(),
            telemetry: TelemetryConfig {
                log_format: LogFormat::Pretty,
                filter: "unibi_engine=debug,unibi_storage=debug,info".to_string(),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.training.validate()?;
        self.provider.validate()?;
        self.storage.validate()?;
        if self.cache.waiter_timeout <= self.provider.generation_timeout {
            return Err(invalid(
                "waiter_timeout",
                format!("{}s", self.cache.waiter_timeout.as_secs_f64()),
                "must exceed provider.generation_timeout",
            ));
        }
        Ok(())
    }
}
