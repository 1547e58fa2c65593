//! In-process cache backend.
//!
//! The default backend for single-node deployments and tests. Entries live
//! in a sharded `DashMap`; expiry is left to the tiered cache's lazy checks.

use async_trait::async_trait;
use dashmap::DashMap;
use unibi_core::{CacheError, KeyPattern};

use super::traits::{CacheBackend, StoredEntry};

#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: DashMap<String, StoredEntry>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a key is present, expired or not.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.matches(key));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn len(&self) -> Result<Option<u64>, CacheError> {
        Ok(Some(self.entries.len() as u64))
    }
}
