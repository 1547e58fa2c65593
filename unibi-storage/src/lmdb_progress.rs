//! LMDB-backed progress store.
//!
//! Two named databases in one environment:
//!
//! - `jobs`: `job_id (16 bytes)` -> JSON `TrainingJob`
//! - `logs`: `job_id (16 bytes) ++ sequence (8 bytes, big endian)` -> JSON
//!   `TrainingLogEntry`
//!
//! Big-endian sequence numbers keep a job's log entries in append order under
//! LMDB's lexicographic key ordering, and the job id prefix keeps every log
//! operation a range scan over that one job.

use std::path::Path;

use ::async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use unibi_core::{DatasetId, JobId, JobStatus, StorageError, TrainingJob, TrainingLogEntry};

use crate::progress::{check_revision, sort_newest_first, tail, ProgressStore};

const JOBS_DB: &str = "jobs";
const LOGS_DB: &str = "logs";

fn txn_err(e: heed::Error) -> StorageError {
    StorageError::TransactionFailed {
        reason: e.to_string(),
    }
}

fn ser_err(e: serde_json::Error) -> StorageError {
    StorageError::Serialization {
        reason: e.to_string(),
    }
}

fn log_key(job_id: JobId, sequence: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(job_id.as_bytes());
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Durable progress store on LMDB.
pub struct LmdbProgressStore {
    env: Env,
    jobs: Database<Bytes, Bytes>,
    logs: Database<Bytes, Bytes>,
}

impl std::fmt::Debug for LmdbProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbProgressStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbProgressStore {
    /// Open (or create) the store at `path` with a map size of `max_size_mb`.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&path).map_err(|e| StorageError::TransactionFailed {
            reason: format!("cannot create {}: {}", path.as_ref().display(), e),
        })?;

        // SAFETY: the environment is opened once per directory by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(txn_err)?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let jobs: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(JOBS_DB))
            .map_err(txn_err)?;
        let logs: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(LOGS_DB))
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self { env, jobs, logs })
    }

    fn read_job(&self, txn: &RoTxn, job_id: JobId) -> Result<Option<TrainingJob>, StorageError> {
        match self.jobs.get(txn, job_id.as_bytes()).map_err(txn_err)? {
            Some(bytes) => serde_json::from_slice(bytes).map(Some).map_err(ser_err),
            None => Ok(None),
        }
    }

    fn scan_jobs<F>(&self, mut keep: F) -> Result<Vec<TrainingJob>, StorageError>
    where
        F: FnMut(&TrainingJob) -> bool,
    {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut found = Vec::new();
        for result in self.jobs.iter(&rtxn).map_err(txn_err)? {
            let (_, bytes) = result.map_err(txn_err)?;
            let job: TrainingJob = serde_json::from_slice(bytes).map_err(ser_err)?;
            if keep(&job) {
                found.push(job);
            }
        }
        sort_newest_first(&mut found);
        Ok(found)
    }

    fn log_keys(&self, txn: &RoTxn, job_id: JobId) -> Result<Vec<Vec<u8>>, StorageError> {
        let mut keys = Vec::new();
        for result in self
            .logs
            .prefix_iter(txn, job_id.as_bytes())
            .map_err(txn_err)?
        {
            let (key, _) = result.map_err(txn_err)?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    /// Sequence number after the job's last log entry.
    fn next_sequence(&self, txn: &RoTxn, job_id: JobId) -> Result<u64, StorageError> {
        let mut newest = self
            .logs
            .rev_prefix_iter(txn, job_id.as_bytes())
            .map_err(txn_err)?;
        let Some(result) = newest.next() else {
            return Ok(0);
        };
        let (key, _) = result.map_err(txn_err)?;
        let sequence: [u8; 8] = key
            .get(16..24)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| StorageError::Serialization {
                reason: format!("malformed log key of {} bytes", key.len()),
            })?;
        Ok(u64::from_be_bytes(sequence) + 1)
    }
}

#[async_trait]
impl ProgressStore for LmdbProgressStore {
    async fn save(&self, job: &TrainingJob) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(job).map_err(ser_err)?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let stored = self.read_job(&wtxn, job.id)?;
        check_revision(stored.as_ref(), job)?;
        self.jobs
            .put(&mut wtxn, job.id.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    async fn load(&self, job_id: JobId) -> Result<Option<TrainingJob>, StorageError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.read_job(&rtxn, job_id)
    }

    async fn delete(&self, job_id: JobId) -> Result<bool, StorageError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let log_keys = self.log_keys(&wtxn, job_id)?;
        for key in &log_keys {
            self.logs.delete(&mut wtxn, key).map_err(txn_err)?;
        }
        let existed = self
            .jobs
            .delete(&mut wtxn, job_id.as_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(existed)
    }

    async fn list_for_dataset(
        &self,
        dataset_id: &DatasetId,
    ) -> Result<Vec<TrainingJob>, StorageError> {
        self.scan_jobs(|job| &job.dataset_id == dataset_id)
    }

    async fn list_by_status(
        &self,
        statuses: &[JobStatus],
    ) -> Result<Vec<TrainingJob>, StorageError> {
        self.scan_jobs(|job| statuses.contains(&job.status))
    }

    async fn append_log(
        &self,
        job_id: JobId,
        mut entry: TrainingLogEntry,
    ) -> Result<TrainingLogEntry, StorageError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        entry.job_id = job_id;
        entry.sequence = self.next_sequence(&wtxn, job_id)?;
        let bytes = serde_json::to_vec(&entry).map_err(ser_err)?;
        self.logs
            .put(&mut wtxn, &log_key(job_id, entry.sequence), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(entry)
    }

    async fn list_logs(
        &self,
        job_id: JobId,
        limit: usize,
    ) -> Result<Vec<TrainingLogEntry>, StorageError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut entries = Vec::new();
        for result in self
            .logs
            .prefix_iter(&rtxn, job_id.as_bytes())
            .map_err(txn_err)?
        {
            let (_, bytes) = result.map_err(txn_err)?;
            entries.push(serde_json::from_slice(bytes).map_err(ser_err)?);
        }
        Ok(tail(entries, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;
    use unibi_core::{CorpusSpec, LogEvent, LogLevel};

    fn create_test_store() -> (LmdbProgressStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbProgressStore::open(temp_dir.path(), 10).expect("store should open");
        (store, temp_dir)
    }

    fn job(dataset: u64) -> TrainingJob {
        TrainingJob::new(DatasetId::from(dataset), CorpusSpec::default(), Utc::now())
    }

    fn entry(message: &str) -> TrainingLogEntry {
        TrainingLogEntry::new(
            JobId::nil(),
            Utc::now(),
            LogLevel::Info,
            LogEvent::UnitIngested,
            20,
            message,
        )
    }

    #[tokio::test]
    async fn test_save_load_and_revision_check() {
        let (store, _dir) = create_test_store();
        let mut job = job(7);
        store.save(&job).await.unwrap();

        job.revision = 1;
        job.status = JobStatus::Running;
        store.save(&job).await.unwrap();

        let mut stale = job.clone();
        stale.revision = 1;
        assert!(matches!(
            store.save(&stale).await,
            Err(StorageError::StaleRevision { .. })
        ));
        assert_eq!(store.load(job.id).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn test_logs_are_ordered_per_job() {
        let (store, _dir) = create_test_store();
        let a = job(1);
        let b = job(2);
        for i in 0..12 {
            store.append_log(a.id, entry(&format!("a{i}"))).await.unwrap();
            store.append_log(b.id, entry(&format!("b{i}"))).await.unwrap();
        }

        let logs = store.list_logs(a.id, 3).await.unwrap();
        let messages: Vec<&str> = logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["a9", "a10", "a11"]);
        assert!(logs.iter().all(|e| e.job_id == a.id));
        assert_eq!(logs[2].sequence, 11);
    }

    #[tokio::test]
    async fn test_sequence_continues_after_reopen() {
        let dir = TempDir::new().unwrap();
        let job = job(7);
        {
            let store = LmdbProgressStore::open(dir.path(), 10).unwrap();
            for i in 0..3 {
                store.append_log(job.id, entry(&format!("m{i}"))).await.unwrap();
            }
        }

        let store = LmdbProgressStore::open(dir.path(), 10).unwrap();
        let appended = store.append_log(job.id, entry("m3")).await.unwrap();
        assert_eq!(appended.sequence, 3);
        // A job without entries starts at zero even when others have logs.
        let fresh = store.append_log(unibi_core::new_job_id(), entry("first")).await.unwrap();
        assert_eq!(fresh.sequence, 0);
    }

    #[tokio::test]
    async fn test_delete_job_and_logs() {
        let (store, _dir) = create_test_store();
        let job = job(7);
        store.save(&job).await.unwrap();
        store.append_log(job.id, entry("x")).await.unwrap();

        assert!(store.delete(job.id).await.unwrap());
        assert!(store.load(job.id).await.unwrap().is_none());
        assert!(store.list_logs(job.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let mut job = job(7);
        {
            let store = LmdbProgressStore::open(dir.path(), 10).unwrap();
            store.save(&job).await.unwrap();
            job.revision = 1;
            job.status = JobStatus::Running;
            store.save(&job).await.unwrap();
            store.append_log(job.id, entry("started")).await.unwrap();
        }

        let store = LmdbProgressStore::open(dir.path(), 10).unwrap();
        let running = store.list_by_status(&[JobStatus::Running]).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, job.id);
        assert_eq!(store.list_logs(job.id, 10).await.unwrap().len(), 1);
        assert_eq!(
            store.list_for_dataset(&DatasetId::from(7)).await.unwrap().len(),
            1
        );
    }
}
