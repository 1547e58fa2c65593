//! Cache read results carrying freshness metadata.

use std::time::Duration;
use unibi_core::Timestamp;

/// Result of a cached computation, recording where the value came from.
///
/// Values served from the cache carry the time they were cached and when
/// they stop being valid; freshly produced values carry the time they were
/// produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    cached_at: Timestamp,
    expires_at: Option<Timestamp>,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// A value served from the cache.
    pub fn from_cache(value: T, cached_at: Timestamp, expires_at: Timestamp) -> Self {
        Self {
            value,
            cached_at,
            expires_at: Some(expires_at),
            was_cache_hit: true,
        }
    }

    /// A value that was just produced (cache miss or bypass).
    pub fn fresh(value: T, produced_at: Timestamp) -> Self {
        Self {
            value,
            cached_at: produced_at,
            expires_at: None,
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    /// Age of the value as of `now`.
    pub fn staleness(&self, now: Timestamp) -> Duration {
        (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// Transform the value, keeping the metadata.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> CacheRead<U> {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            expires_at: self.expires_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
