//! Durable training progress storage.
//!
//! Holds job records and their append-only logs. The orchestrator is the only
//! writer of job records; every save carries a strictly increasing
//! `revision`, and stores reject saves that do not advance it so that a late
//! write from a superseded task cannot roll a job back.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ::async_trait::async_trait;
use unibi_core::{DatasetId, JobId, JobStatus, StorageError, TrainingJob, TrainingLogEntry};

/// Async storage for training jobs and logs.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    // ========================================================================
    // JOB OPERATIONS
    // ========================================================================

    /// Insert or replace a job record.
    ///
    /// Fails with `StaleRevision` if a stored record has a revision greater
    /// than or equal to `job.revision`.
    async fn save(&self, job: &TrainingJob) -> Result<(), StorageError>;

    /// Get a job by ID.
    async fn load(&self, job_id: JobId) -> Result<Option<TrainingJob>, StorageError>;

    /// Delete a job and its logs. Returns whether the job existed.
    async fn delete(&self, job_id: JobId) -> Result<bool, StorageError>;

    /// All jobs of a dataset, newest first.
    async fn list_for_dataset(&self, dataset_id: &DatasetId)
        -> Result<Vec<TrainingJob>, StorageError>;

    /// All jobs in any of the given states.
    async fn list_by_status(&self, statuses: &[JobStatus])
        -> Result<Vec<TrainingJob>, StorageError>;

    // ========================================================================
    // LOG OPERATIONS
    // ========================================================================

    /// Append a log entry to a job. The store assigns the entry's sequence
    /// number and returns the stored entry.
    async fn append_log(
        &self,
        job_id: JobId,
        entry: TrainingLogEntry,
    ) -> Result<TrainingLogEntry, StorageError>;

    /// The most recent `limit` entries of a job, oldest first (most recent
    /// last).
    async fn list_logs(
        &self,
        job_id: JobId,
        limit: usize,
    ) -> Result<Vec<TrainingLogEntry>, StorageError>;
}

/// Check that `job` may replace `stored`.
pub(crate) fn check_revision(
    stored: Option<&TrainingJob>,
    job: &TrainingJob,
) -> Result<(), StorageError> {
    match stored {
        Some(stored) if stored.revision >= job.revision => Err(StorageError::StaleRevision {
            job_id: job.id,
            stored: stored.revision,
            attempted: job.revision,
        }),
        _ => Ok(()),
    }
}

/// Newest first by creation time, ties broken by the (time-ordered) id.
pub(crate) fn sort_newest_first(jobs: &mut [TrainingJob]) {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

/// Take the last `limit` entries of an ordered log.
pub(crate) fn tail(mut entries: Vec<TrainingLogEntry>, limit: usize) -> Vec<TrainingLogEntry> {
    if entries.len() > limit {
        entries.drain(..entries.len() - limit);
    }
    entries
}

/// In-memory progress store for tests and single-process deployments
/// without durability requirements.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProgressStore {
    jobs: Arc<RwLock<HashMap<JobId, TrainingJob>>>,
    logs: Arc<RwLock<HashMap<JobId, Vec<TrainingLogEntry>>>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get count of stored jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn save(&self, job: &TrainingJob) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        check_revision(jobs.get(&job.id), job)?;
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn load(&self, job_id: JobId) -> Result<Option<TrainingJob>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs.get(&job_id).cloned())
    }

    async fn delete(&self, job_id: JobId) -> Result<bool, StorageError> {
        let existed = self
            .jobs
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(&job_id)
            .is_some();
        self.logs
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(&job_id);
        Ok(existed)
    }

    async fn list_for_dataset(
        &self,
        dataset_id: &DatasetId,
    ) -> Result<Vec<TrainingJob>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut found: Vec<TrainingJob> = jobs
            .values()
            .filter(|job| &job.dataset_id == dataset_id)
            .cloned()
            .collect();
        sort_newest_first(&mut found);
        Ok(found)
    }

    async fn list_by_status(
        &self,
        statuses: &[JobStatus],
    ) -> Result<Vec<TrainingJob>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut found: Vec<TrainingJob> = jobs
            .values()
            .filter(|job| statuses.contains(&job.status))
            .cloned()
            .collect();
        sort_newest_first(&mut found);
        Ok(found)
    }

    async fn append_log(
        &self,
        job_id: JobId,
        mut entry: TrainingLogEntry,
    ) -> Result<TrainingLogEntry, StorageError> {
        let mut logs = self.logs.write().map_err(|_| StorageError::LockPoisoned)?;
        let log = logs.entry(job_id).or_default();
        entry.job_id = job_id;
        entry.sequence = log.last().map(|last| last.sequence + 1).unwrap_or(0);
        log.push(entry.clone());
        Ok(entry)
    }

    async fn list_logs(
        &self,
        job_id: JobId,
        limit: usize,
    ) -> Result<Vec<TrainingLogEntry>, StorageError> {
        let logs = self.logs.read().map_err(|_| StorageError::LockPoisoned)?;
        let entries = logs.get(&job_id).cloned().unwrap_or_default();
        Ok(tail(entries, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use unibi_core::{CorpusSpec, LogEvent, LogLevel};

    fn job(dataset: u64) -> TrainingJob {
        TrainingJob::new(DatasetId::from(dataset), CorpusSpec::default(), Utc::now())
    }

    fn log(job_id: JobId, message: &str) -> TrainingLogEntry {
        TrainingLogEntry::new(job_id, Utc::now(), LogLevel::Info, LogEvent::UnitIngested, 0, message)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryProgressStore::new();
        let job = job(7);
        store.save(&job).await.unwrap();
        assert_eq!(store.load(job.id).await.unwrap(), Some(job));
        assert_eq!(store.job_count(), 1);
    }

    #[tokio::test]
    async fn test_save_rejects_stale_revision() {
        let store = InMemoryProgressStore::new();
        let mut job = job(7);
        store.save(&job).await.unwrap();

        job.revision = 2;
        job.status = JobStatus::Running;
        store.save(&job).await.unwrap();

        let mut stale = job.clone();
        stale.revision = 1;
        stale.status = JobStatus::Queued;
        let err = store.save(&stale).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::StaleRevision {
                stored: 2,
                attempted: 1,
                ..
            }
        ));
        assert!(store.save(&job).await.is_err(), "equal revision must be rejected");
        assert_eq!(store.load(job.id).await.unwrap().unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_list_for_dataset_newest_first() {
        let store = InMemoryProgressStore::new();
        let mut older = job(7);
        older.created_at = Utc::now() - Duration::hours(1);
        let newer = job(7);
        let other = job(8);
        for j in [&older, &newer, &other] {
            store.save(j).await.unwrap();
        }

        let listed = store.list_for_dataset(&DatasetId::from(7)).await.unwrap();
        let ids: Vec<JobId> = listed.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let store = InMemoryProgressStore::new();
        let queued = job(1);
        let mut running = job(2);
        running.status = JobStatus::Running;
        let mut done = job(3);
        done.status = JobStatus::Completed;
        for j in [&queued, &running, &done] {
            store.save(j).await.unwrap();
        }

        let active = store
            .list_by_status(&[JobStatus::Queued, JobStatus::Running])
            .await
            .unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|j| j.status != JobStatus::Completed));
    }

    #[tokio::test]
    async fn test_logs_keep_order_and_limit() {
        let store = InMemoryProgressStore::new();
        let job = job(7);
        for i in 0..5 {
            store.append_log(job.id, log(job.id, &format!("unit {i}"))).await.unwrap();
        }

        let last_two = store.list_logs(job.id, 2).await.unwrap();
        let messages: Vec<&str> = last_two.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["unit 3", "unit 4"]);
        assert_eq!(last_two[1].sequence, 4);

        assert_eq!(store.list_logs(job.id, 100).await.unwrap().len(), 5);
        assert!(store.list_logs(JobId::nil(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_logs() {
        let store = InMemoryProgressStore::new();
        let job = job(7);
        store.save(&job).await.unwrap();
        store.append_log(job.id, log(job.id, "hello")).await.unwrap();

        assert!(store.delete(job.id).await.unwrap());
        assert!(store.load(job.id).await.unwrap().is_none());
        assert!(store.list_logs(job.id, 10).await.unwrap().is_empty());
        assert!(!store.delete(job.id).await.unwrap());
    }
}
