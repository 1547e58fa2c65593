//! Query cache for the text-to-SQL path.
//!
//! # Design
//!
//! - **Two tiers, two policies**: translations (question to SQL) are expensive
//!   and stable, so they live for days; results go stale as data changes, so
//!   they live for minutes. Each tier owns its backend.
//! - **Fail open**: an unreachable cache slows requests down but never fails
//!   them.
//! - **One producer per key**: [`SingleFlight`] collapses concurrent misses so
//!   the inference provider sees one call per fingerprint.
//! - **Epoch fencing**: invalidation bumps a per-dataset epoch so work started
//!   before a retrain cannot repopulate the cache afterwards.

mod epoch;
mod invalidation;
mod lmdb_backend;
mod memory_backend;
mod read;
#[cfg(feature = "redis")]
mod redis_backend;
mod single_flight;
mod tiered;
mod traits;

pub use epoch::{DatasetEpochs, Epoch};
pub use invalidation::{InvalidationManager, InvalidationReport};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory_backend::MemoryCacheBackend;
pub use read::CacheRead;
#[cfg(feature = "redis")]
pub use redis_backend::RedisCacheBackend;
pub use single_flight::SingleFlight;
pub use tiered::{
    TierConfig, TieredCache, TieredStats, DEFAULT_BACKEND_TIMEOUT, DEFAULT_PURGE_TIMEOUT,
    DEFAULT_RESULT_TTL,
    DEFAULT_TRANSLATION_TTL,
};
pub use traits::{CacheBackend, CacheStats, StoredEntry};
