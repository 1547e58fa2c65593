//! Universal BI Storage
//!
//! The query cache (tiers, backends, single-flight, invalidation) and the
//! training progress store.

pub mod cache;
mod lmdb_progress;
mod progress;

pub use cache::{
    CacheBackend, CacheRead, CacheStats, Epoch, InvalidationManager, InvalidationReport,
    LmdbCacheBackend, MemoryCacheBackend, SingleFlight, StoredEntry, TierConfig, TieredCache,
    TieredStats,
};
pub use lmdb_progress::LmdbProgressStore;
pub use progress::{InMemoryProgressStore, ProgressStore};
