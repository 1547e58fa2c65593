//! Cache backend trait and the stored entry format.
//!
//! Backends are plain key-value stores over rendered cache keys
//! (`{namespace}:{dataset_id}:{fingerprint}`). TTL policy, freshness checks
//! and degradation live in [`TieredCache`](super::TieredCache); a backend only
//! has to store bytes and support a prefix-scoped bulk delete.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use unibi_core::{CacheError, KeyPattern, Timestamp};

/// Header size of the byte encoding: created_at millis + ttl millis + epoch.
const HEADER_LEN: usize = 24;

/// A cached payload together with its freshness policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Serialized value (JSON).
    pub payload: Vec<u8>,
    pub created_at: Timestamp,
    pub ttl: Duration,
    /// Dataset epoch the entry was written under.
    #[serde(default)]
    pub epoch: u64,
}

impl StoredEntry {
    pub fn new(payload: Vec<u8>, created_at: Timestamp, ttl: Duration) -> Self {
        Self {
            payload,
            created_at,
            ttl,
            epoch: 0,
        }
    }

    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn expires_at(&self) -> Timestamp {
        let ttl = ChronoDuration::from_std(self.ttl).unwrap_or(ChronoDuration::MAX);
        self.created_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<chrono::Utc>::MAX_UTC)
    }

    /// `created_at + ttl` is the first instant the entry is no longer valid.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at()
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining(&self, now: Timestamp) -> Duration {
        (self.expires_at() - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Encode as `[created_at millis: 8][ttl millis: 8][epoch: 8][payload]`
    /// for byte stores.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(&self.created_at.timestamp_millis().to_le_bytes());
        bytes.extend_from_slice(&(self.ttl.as_millis() as u64).to_le_bytes());
        bytes.extend_from_slice(&self.epoch.to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        if bytes.len() < HEADER_LEN {
            return Err(CacheError::Deserialization {
                reason: format!("entry too short: {} bytes", bytes.len()),
            });
        }
        let mut created = [0u8; 8];
        created.copy_from_slice(&bytes[0..8]);
        let mut ttl = [0u8; 8];
        ttl.copy_from_slice(&bytes[8..16]);
        let mut epoch = [0u8; 8];
        epoch.copy_from_slice(&bytes[16..24]);

        let created_at = DateTime::from_timestamp_millis(i64::from_le_bytes(created)).ok_or_else(
            || CacheError::Deserialization {
                reason: "invalid created_at timestamp".to_string(),
            },
        )?;

        Ok(Self {
            payload: bytes[HEADER_LEN..].to_vec(),
            created_at,
            ttl: Duration::from_millis(u64::from_le_bytes(ttl)),
            epoch: u64::from_le_bytes(epoch),
        })
    }
}

/// Cache backend trait for pluggable key-value stores.
///
/// Implementations must be thread-safe. Errors are reported, not hidden:
/// deciding to degrade is the caller's job.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Get an entry. Expired entries may still be returned.
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError>;

    /// Store an entry, replacing any previous value.
    async fn set(&self, key: &str, entry: StoredEntry) -> Result<(), CacheError>;

    /// Delete an entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete every entry whose key matches the pattern. Returns the count.
    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, CacheError>;

    /// Number of stored entries, if the backend can tell cheaply.
    async fn len(&self) -> Result<Option<u64>, CacheError> {
        Ok(None)
    }
}

/// Cache statistics for one tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries found past their TTL and evicted on read.
    pub expired: u64,
    /// Entries found older than their dataset's latest invalidation.
    pub fenced: u64,
    pub writes: u64,
    /// Writes skipped because the dataset was invalidated while producing.
    pub stale_writes_skipped: u64,
    /// Backend calls that failed or timed out and were degraded.
    pub fallbacks: u64,
    pub entry_count: Option<u64>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_expiry_boundary() {
        let created = Utc::now();
        let entry = StoredEntry::new(vec![], created, Duration::from_secs(300));
        assert!(!entry.is_expired_at(created + ChronoDuration::seconds(299)));
        assert!(entry.is_expired_at(created + ChronoDuration::seconds(300)));
        assert_eq!(
            entry.remaining(created + ChronoDuration::seconds(100)),
            Duration::from_secs(200)
        );
        assert_eq!(
            entry.remaining(created + ChronoDuration::seconds(400)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_encode_decode() {
        let created = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let entry = StoredEntry::new(b"\"SELECT 1\"".to_vec(), created, Duration::from_secs(60))
            .with_epoch(3);
        let decoded = StoredEntry::decode(&entry.encode()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_decode_rejects_short_input() {
        assert!(matches!(
            StoredEntry::decode(&[1, 2, 3]),
            Err(CacheError::Deserialization { .. })
        ));
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
