//! Redis cache backend (feature `redis`).
//!
//! Shares cache entries between processes. Entries are written with a native
//! expiry (`SET .. EX`) rounded up to whole seconds so Redis reclaims them on
//! its own; the tiered cache still checks `created_at + ttl` on every read.
//! Bulk deletes use `SCAN MATCH` over the pattern's glob.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use unibi_core::{CacheError, KeyPattern};

use super::traits::{CacheBackend, StoredEntry};

const SCAN_COUNT: usize = 500;

pub struct RedisCacheBackend {
    conn: ConnectionManager,
    /// Prepended to every key, e.g. `unibi:`.
    key_prefix: String,
}

impl std::fmt::Debug for RedisCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheBackend")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisCacheBackend {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        Ok(Self {
            conn,
            key_prefix: key_prefix.into(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

fn unavailable(e: redis::RedisError) -> CacheError {
    CacheError::Unavailable {
        backend: "redis".to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = conn.get(self.full_key(key)).await.map_err(unavailable)?;
        bytes.map(|b| StoredEntry::decode(&b)).transpose()
    }

    async fn set(&self, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let ttl_secs = entry.ttl.as_millis().div_ceil(1000).max(1) as u64;
        let _: () = conn
            .set_ex(self.full_key(key), entry.encode(), ttl_secs)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(self.full_key(key)).await.map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let glob = self.full_key(&pattern.as_glob());
        let mut cursor = 0u64;
        let mut deleted = 0u64;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&glob)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;

            if !keys.is_empty() {
                let removed: u64 = conn.del(&keys).await.map_err(unavailable)?;
                deleted += removed;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(deleted)
    }
}
