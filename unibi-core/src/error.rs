//! Error types for Universal BI operations

use crate::{JobId, JobStatus};
use thiserror::Error;

/// Cache key construction errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid dataset id {value:?}: {reason}")]
    InvalidDatasetId { value: String, reason: String },

    #[error("Malformed cache key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },
}

/// Cache backend errors.
///
/// These never reach request callers: the tiered cache logs them and degrades
/// the operation to a miss or a no-op.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend {backend} unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("Cache backend {backend} timed out after {timeout_ms}ms")]
    Timeout { backend: String, timeout_ms: u64 },

    #[error("Failed to encode cache payload: {reason}")]
    Serialization { reason: String },

    #[error("Failed to decode cache payload: {reason}")]
    Deserialization { reason: String },
}

/// Inference provider and execution engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("SQL generation failed: {reason}")]
    Generation { reason: String },

    #[error("SQL generation timed out after {timeout_ms}ms")]
    GenerationTimeout { timeout_ms: u64 },

    #[error("Query execution failed: {reason}")]
    Query { reason: String },

    #[error("Ingestion of {unit} failed: {reason}")]
    Ingestion { unit: String, reason: String },

    #[error("No {capability} provider configured")]
    NotConfigured { capability: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Training job state machine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Dataset {dataset_id} already has job {existing} in state {status}")]
    Conflict {
        dataset_id: String,
        existing: JobId,
        status: JobStatus,
    },

    #[error("Cannot {operation} job {job_id} while it is {status}")]
    InvalidTransition {
        job_id: JobId,
        status: JobStatus,
        operation: String,
    },

    #[error("Training job not found: {job_id}")]
    NotFound { job_id: JobId },
}

/// Durable storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record not found: {record} with id {id}")]
    NotFound { record: String, id: String },

    #[error("Stale write for job {job_id}: stored revision {stored}, attempted {attempted}")]
    StaleRevision {
        job_id: JobId,
        stored: u64,
        attempted: u64,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Coarse error classification exposed to the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidKey,
    CacheUnavailable,
    Generation,
    GenerationTimeout,
    Query,
    Ingestion,
    JobConflict,
    InvalidTransition,
    JobNotFound,
    Storage,
    Config,
}

impl ErrorKind {
    /// HTTP status an API layer would answer with for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidKey => 400,
            ErrorKind::JobNotFound => 404,
            ErrorKind::JobConflict | ErrorKind::InvalidTransition => 409,
            ErrorKind::Query => 422,
            ErrorKind::Generation | ErrorKind::Ingestion => 502,
            ErrorKind::CacheUnavailable => 503,
            ErrorKind::GenerationTimeout => 504,
            ErrorKind::Storage | ErrorKind::Config => 500,
        }
    }
}

/// Master error type for all Universal BI errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnibiError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl UnibiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnibiError::Key(_) => ErrorKind::InvalidKey,
            UnibiError::Cache(_) => ErrorKind::CacheUnavailable,
            UnibiError::Provider(err) => match err {
                ProviderError::GenerationTimeout { .. } => ErrorKind::GenerationTimeout,
                ProviderError::Query { .. } => ErrorKind::Query,
                ProviderError::Ingestion { .. } => ErrorKind::Ingestion,
                ProviderError::Generation { .. }
                | ProviderError::NotConfigured { .. }
                | ProviderError::RequestFailed { .. }
                | ProviderError::RateLimited { .. }
                | ProviderError::InvalidResponse { .. } => ErrorKind::Generation,
            },
            UnibiError::Job(err) => match err {
                JobError::Conflict { .. } => ErrorKind::JobConflict,
                JobError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
                JobError::NotFound { .. } => ErrorKind::JobNotFound,
            },
            UnibiError::Storage(_) => ErrorKind::Storage,
            UnibiError::Config(_) => ErrorKind::Config,
        }
    }
}

/// Result type alias for Universal BI operations.
pub type UnibiResult<T> = Result<T, UnibiError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_job_conflict_display() {
        let err = JobError::Conflict {
            dataset_id: "7".to_string(),
            existing: Uuid::nil(),
            status: JobStatus::Running,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Dataset 7"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
        assert!(msg.contains("running"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = JobError::InvalidTransition {
            job_id: Uuid::nil(),
            status: JobStatus::Completed,
            operation: "resume".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Cannot resume"));
        assert!(msg.contains("completed"));
    }

    #[test]
    fn test_provider_error_display_timeout() {
        let err = ProviderError::GenerationTimeout { timeout_ms: 60_000 };
        let msg = format!("{}", err);
        assert!(msg.contains("timed out"));
        assert!(msg.contains("60000"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "result_ttl".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("result_ttl"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_error_kinds() {
        let cases = [
            (
                UnibiError::from(KeyError::InvalidDatasetId {
                    value: "".to_string(),
                    reason: "empty".to_string(),
                }),
                ErrorKind::InvalidKey,
            ),
            (
                UnibiError::from(CacheError::Timeout {
                    backend: "memory".to_string(),
                    timeout_ms: 50,
                }),
                ErrorKind::CacheUnavailable,
            ),
            (
                UnibiError::from(ProviderError::Generation {
                    reason: "boom".to_string(),
                }),
                ErrorKind::Generation,
            ),
            (
                UnibiError::from(ProviderError::GenerationTimeout { timeout_ms: 1 }),
                ErrorKind::GenerationTimeout,
            ),
            (
                UnibiError::from(ProviderError::Query {
                    reason: "syntax".to_string(),
                }),
                ErrorKind::Query,
            ),
            (
                UnibiError::from(ProviderError::Ingestion {
                    unit: "ddl".to_string(),
                    reason: "down".to_string(),
                }),
                ErrorKind::Ingestion,
            ),
            (
                UnibiError::from(JobError::NotFound { job_id: Uuid::nil() }),
                ErrorKind::JobNotFound,
            ),
            (
                UnibiError::from(StorageError::LockPoisoned),
                ErrorKind::Storage,
            ),
        ];

        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "unexpected kind for {err}");
        }
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorKind::JobConflict.http_status(), 409);
        assert_eq!(ErrorKind::JobNotFound.http_status(), 404);
        assert_eq!(ErrorKind::GenerationTimeout.http_status(), 504);
        assert_eq!(ErrorKind::InvalidKey.http_status(), 400);
    }

    #[test]
    fn test_unibi_error_from_variants() {
        let storage = UnibiError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, UnibiError::Storage(_)));

        let config = UnibiError::from(ConfigError::MissingRequired {
            field: "api_key".to_string(),
        });
        assert!(matches!(config, UnibiError::Config(_)));

        let job = UnibiError::from(JobError::NotFound { job_id: Uuid::nil() });
        assert!(matches!(job, UnibiError::Job(_)));
    }
}
