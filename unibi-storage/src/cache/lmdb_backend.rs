//! LMDB-backed cache backend.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cache entries in a
//! memory-mapped file, so warm translations survive a process restart on a
//! single node.
//!
//! # Layout
//!
//! One unnamed database. Keys are rendered cache keys as UTF-8, values are
//! [`StoredEntry::encode`] bytes. Bulk deletes range-scan the pattern prefix
//! and drop the keys inside one write transaction.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use unibi_core::{CacheError, KeyPattern};

use super::traits::{CacheBackend, StoredEntry};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Unavailable {
            backend: "lmdb".to_string(),
            reason: e.to_string(),
        }
    }
}

/// LMDB-backed cache backend.
///
/// Translation and result tiers should use separate directories so that
/// their storage never mixes.
pub struct LmdbCacheBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl std::fmt::Debug for LmdbCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbCacheBackend")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbCacheBackend {
    /// Open (or create) a cache at `path` with a map size of `max_size_mb`.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per directory by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    fn txn_err(e: heed::Error) -> CacheError {
        LmdbCacheError::Transaction(e.to_string()).into()
    }

    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, CacheError> {
        let rtxn = self.env.read_txn().map_err(Self::txn_err)?;
        let mut keys = Vec::new();
        for result in self.db.prefix_iter(&rtxn, prefix).map_err(Self::txn_err)? {
            let (key, _) = result.map_err(Self::txn_err)?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        let rtxn = self.env.read_txn().map_err(Self::txn_err)?;
        match self.db.get(&rtxn, key.as_bytes()).map_err(Self::txn_err)? {
            Some(bytes) => StoredEntry::decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        let bytes = entry.encode();
        let mut wtxn = self.env.write_txn().map_err(Self::txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(Self::txn_err)?;
        wtxn.commit().map_err(Self::txn_err)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut wtxn = self.env.write_txn().map_err(Self::txn_err)?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(Self::txn_err)?;
        wtxn.commit().map_err(Self::txn_err)?;
        Ok(deleted)
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, CacheError> {
        let keys = self.collect_keys_with_prefix(pattern.prefix().as_bytes())?;

        let mut wtxn = self.env.write_txn().map_err(Self::txn_err)?;
        let mut deleted = 0u64;
        for key in &keys {
            if self.db.delete(&mut wtxn, key).map_err(Self::txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(Self::txn_err)?;

        Ok(deleted)
    }

    async fn len(&self) -> Result<Option<u64>, CacheError> {
        let rtxn = self.env.read_txn().map_err(Self::txn_err)?;
        Ok(Some(self.db.len(&rtxn).map_err(Self::txn_err)?))
    }
}
