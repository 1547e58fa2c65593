//! Constants for the Universal BI engine
//!
//! Default values for every configuration knob. The `from_env` constructors
//! in [`crate::config`] fall back to these.

// ============================================================================
// CACHE TIERS
// ============================================================================

/// Translation tier TTL in seconds (7 days)
pub const DEFAULT_TRANSLATION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Result tier TTL in seconds (5 minutes)
pub const DEFAULT_RESULT_TTL_SECS: u64 = 300;

/// Timeout for a single cache backend call in milliseconds
pub const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 250;

/// How long a single-flight waiter waits for the in-flight producer
pub const DEFAULT_WAITER_TIMEOUT_SECS: u64 = 90;

/// Timeout for purging one dataset from a tier
pub const DEFAULT_PURGE_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// TRAINING
// ============================================================================

/// Training jobs running concurrently across all datasets
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

/// Timeout for ingesting one corpus unit
pub const DEFAULT_UNIT_TIMEOUT_SECS: u64 = 120;

/// Log entries returned when the caller gives no limit
pub const DEFAULT_LOG_LIMIT: usize = 200;

/// Upper bound on log entries returned by one call
pub const MAX_LOG_LIMIT: usize = 1000;

/// Error recorded on jobs reconciled by the startup sweep
pub const RESTART_FAILURE_REASON: &str = "process restarted";

/// Tables that get generated example queries
pub const EXAMPLE_QUERY_TABLES: usize = 3;

// ============================================================================
// PROVIDER
// ============================================================================

/// Timeout for one generation call
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 60;

/// Default chat model
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default provider request budget per minute
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

// ============================================================================
// STORAGE
// ============================================================================

/// Default LMDB directory
pub const DEFAULT_LMDB_PATH: &str = "./data/unibi";

/// Default LMDB map size in megabytes
pub const DEFAULT_LMDB_MAP_SIZE_MB: usize = 1024;

// ============================================================================
// TELEMETRY
// ============================================================================

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "unibi_engine=debug,unibi_storage=info,info";
