//! Startup sweep.
//!
//! Jobs a previous process left queued or running are failed with "process
//! restarted"; paused jobs can be resumed from their checkpoint.

#[path = "support/engine.rs"]
mod support;

use std::sync::Arc;

use chrono::Utc;
use support::{harness_with, wait_for_status, NO_GATE};
use tempfile::TempDir;
use unibi_core::{
    Clock, DatasetId, ErrorKind, JobStatus, LogEvent, LogLevel, SystemClock, TrainingJob,
};
use unibi_engine::{Engine, EngineConfig, EngineParts};
use unibi_llm::{MockExecutor, MockGenerator, MockIngestor, ProviderRegistry};
use unibi_storage::{InMemoryProgressStore, LmdbProgressStore, ProgressStore};
use unibi_test_utils::fixtures::ddl_corpus;

fn job_in(status: JobStatus, dataset: u64, units: usize, completed: usize) -> TrainingJob {
    let mut job = TrainingJob::new(DatasetId::from(dataset), ddl_corpus(units), Utc::now());
    job.status = status;
    if status != JobStatus::Queued {
        job.started_at = Some(Utc::now());
    }
    job.record_checkpoint(completed);
    job.revision = completed as u64 + 1;
    job
}

#[tokio::test]
async fn test_orphaned_jobs_fail_and_paused_jobs_resume() {
    let store = Arc::new(InMemoryProgressStore::new());
    let running = job_in(JobStatus::Running, 1, 5, 3);
    let queued = job_in(JobStatus::Queued, 2, 5, 0);
    let paused = job_in(JobStatus::Paused, 3, 5, 2);
    let completed = job_in(JobStatus::Completed, 4, 5, 5);
    for job in [&running, &queued, &paused, &completed] {
        store.save(job).await.unwrap();
    }

    let progress: Arc<dyn ProgressStore> = store.clone();
    let h = harness_with(NO_GATE, EngineConfig::default(), MockGenerator::new(), Some(progress));
    let report = h.engine.training().recover().await.unwrap();

    let mut failed = report.failed.clone();
    failed.sort();
    let mut expected = vec![running.id, queued.id];
    expected.sort();
    assert_eq!(failed, expected);
    assert_eq!(report.paused, vec![paused.id]);

    for id in [running.id, queued.id] {
        let job = h.engine.training().status(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("process restarted"));

        let logs = h.engine.get_training_logs(id, None).await.unwrap();
        assert_eq!(logs.entries.len(), 1);
        assert_eq!(logs.entries[0].event, LogEvent::Reconciled);
        assert_eq!(logs.entries[0].level, LogLevel::Warn);
    }
    // Progress of the failed job is kept for inspection.
    assert_eq!(h.engine.training().status(running.id).await.unwrap().progress_pct, 60);

    // Finished jobs are left alone.
    assert_eq!(store.load(completed.id).await.unwrap(), Some(completed));

    // The paused job blocks its dataset and resumes from 2/5.
    let err = h.engine.start_training(DatasetId::from(3), ddl_corpus(1)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::JobConflict);

    h.engine.resume_training(paused.id).await.unwrap();
    let done = wait_for_status(&h.engine, paused.id, JobStatus::Completed).await;
    assert_eq!(done.units_completed, 5);
    assert_eq!(h.ingestor.calls(), 3);
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let store = Arc::new(InMemoryProgressStore::new());
    store.save(&job_in(JobStatus::Running, 1, 2, 1)).await.unwrap();

    let progress: Arc<dyn ProgressStore> = store;
    let h = harness_with(NO_GATE, EngineConfig::default(), MockGenerator::new(), Some(progress));
    assert_eq!(h.engine.training().recover().await.unwrap().failed.len(), 1);
    assert!(h.engine.training().recover().await.unwrap().failed.is_empty());
}

fn providers() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register_generator(Arc::new(MockGenerator::new()));
    registry.register_ingestor(Arc::new(MockIngestor::new()));
    registry.register_executor(Arc::new(MockExecutor::default()));
    registry
}

#[tokio::test]
async fn test_lmdb_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let running = job_in(JobStatus::Running, 9, 4, 1);
    {
        let store = LmdbProgressStore::open(dir.path().join("progress"), 16).unwrap();
        store.save(&running).await.unwrap();
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let parts = EngineParts::lmdb(dir.path(), 16, clock).unwrap();
    let (engine, report) = Engine::start(EngineConfig::default(), &providers(), parts)
        .await
        .unwrap();
    assert_eq!(report.failed, vec![running.id]);

    let job = engine.get_training_status(running.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress_pct, 25);

    // New work on the dataset is accepted and persisted.
    let next = engine.start_training(DatasetId::from(9), ddl_corpus(2)).await.unwrap();
    let done = wait_for_status(&engine, next.job_id, JobStatus::Completed).await;
    assert_eq!(done.progress_pct, 100);
    assert_eq!(engine.list_training_jobs(&DatasetId::from(9)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_recovery_uses_engine_clock() {
    let store = Arc::new(InMemoryProgressStore::new());
    let running = job_in(JobStatus::Running, 1, 2, 1);
    store.save(&running).await.unwrap();

    let progress: Arc<dyn ProgressStore> = store;
    let h = harness_with(NO_GATE, EngineConfig::default(), MockGenerator::new(), Some(progress));
    h.clock.advance(chrono::Duration::minutes(30));
    h.engine.training().recover().await.unwrap();

    let job = h.engine.training().status(running.id).await.unwrap();
    assert_eq!(job.finished_at, Some(h.clock.now()));
}
