//! Universal BI Core - Shared Types
//!
//! Identifiers, cache keys, the training job model and the error hierarchy.
//! Every other crate in the workspace depends on this one; it carries no IO.

mod clock;
mod error;
mod fingerprint;
mod identity;
mod query;
mod training;

pub use clock::{Clock, MockClock, SystemClock};
pub use error::{
    CacheError, ConfigError, ErrorKind, JobError, KeyError, ProviderError, StorageError,
    UnibiError, UnibiResult,
};
pub use fingerprint::{CacheKey, FingerprintKeyer, KeyPattern, Namespace, NormalizationMode};
pub use identity::{new_job_id, DatasetId, JobId, Timestamp, MAX_DATASET_ID_LEN};
pub use query::{QueryResult, SchemaContext};
pub use training::{
    CorpusSpec, CorpusUnit, JobStatus, LogEvent, LogLevel, TrainingJob, TrainingLogEntry,
};
