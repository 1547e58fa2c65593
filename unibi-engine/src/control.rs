//! Training control surface.
//!
//! What an API layer calls. Each operation maps to one orchestrator or
//! progress store operation and returns its error unchanged, so
//! [`unibi_core::UnibiError::kind`] picks the HTTP status.

use serde::{Deserialize, Serialize};
use unibi_core::{
    CorpusSpec, DatasetId, JobId, JobStatus, LogEvent, LogLevel, Timestamp, TrainingJob,
    TrainingLogEntry, UnibiResult,
};

use crate::state::Engine;

/// Job record as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingStatusResponse {
    pub job_id: JobId,
    pub dataset_id: DatasetId,
    pub status: JobStatus,
    pub progress_pct: u8,
    pub units_completed: usize,
    pub units_total: usize,
    pub label: Option<String>,
    pub error: Option<String>,
    pub pause_requested: bool,
    pub cancel_requested: bool,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl From<&TrainingJob> for TrainingStatusResponse {
    fn from(job: &TrainingJob) -> Self {
        Self {
            job_id: job.id,
            dataset_id: job.dataset_id.clone(),
            status: job.status,
            progress_pct: job.progress_pct,
            units_completed: job.units_completed,
            units_total: job.units_total(),
            label: job.corpus.label.clone(),
            error: job.error.clone(),
            pause_requested: job.pause_requested,
            cancel_requested: job.cancel_requested,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

impl From<TrainingJob> for TrainingStatusResponse {
    fn from(job: TrainingJob) -> Self {
        Self::from(&job)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingLogLine {
    pub sequence: u64,
    pub timestamp: Timestamp,
    pub level: LogLevel,
    pub event: LogEvent,
    pub progress_pct: u8,
    /// Rendered line, e.g. `[40%] Ingested table DDL: orders (2/5)`.
    pub line: String,
}

impl From<TrainingLogEntry> for TrainingLogLine {
    fn from(entry: TrainingLogEntry) -> Self {
        Self {
            line: entry.line(),
            sequence: entry.sequence,
            timestamp: entry.timestamp,
            level: entry.level,
            event: entry.event,
            progress_pct: entry.progress_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingLogsResponse {
    pub job_id: JobId,
    pub entries: Vec<TrainingLogLine>,
}

impl Engine {
    pub async fn start_training(
        &self,
        dataset_id: DatasetId,
        corpus: CorpusSpec,
    ) -> UnibiResult<TrainingStatusResponse> {
        self.training().start(dataset_id, corpus).await.map(Into::into)
    }

    pub async fn pause_training(&self, job_id: JobId) -> UnibiResult<TrainingStatusResponse> {
        self.training().pause(job_id).await.map(Into::into)
    }

    pub async fn resume_training(&self, job_id: JobId) -> UnibiResult<TrainingStatusResponse> {
        self.training().resume(job_id).await.map(Into::into)
    }

    pub async fn cancel_training(&self, job_id: JobId) -> UnibiResult<TrainingStatusResponse> {
        self.training().cancel(job_id).await.map(Into::into)
    }

    pub async fn get_training_status(&self, job_id: JobId) -> UnibiResult<TrainingStatusResponse> {
        self.training().status(job_id).await.map(Into::into)
    }

    /// Most recent log lines, oldest first. `limit` is capped by
    /// configuration.
    pub async fn get_training_logs(
        &self,
        job_id: JobId,
        limit: Option<usize>,
    ) -> UnibiResult<TrainingLogsResponse> {
        let entries = self.training().logs(job_id, limit).await?;
        Ok(TrainingLogsResponse {
            job_id,
            entries: entries.into_iter().map(Into::into).collect(),
        })
    }

    /// Jobs of a dataset, newest first.
    pub async fn list_training_jobs(
        &self,
        dataset_id: &DatasetId,
    ) -> UnibiResult<Vec<TrainingStatusResponse>> {
        let jobs = self.training().list_jobs(dataset_id).await?;
        Ok(jobs.iter().map(TrainingStatusResponse::from).collect())
    }

    pub async fn delete_training_job(&self, job_id: JobId) -> UnibiResult<()> {
        self.training().delete(job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use unibi_core::{CorpusUnit, ErrorKind, MockClock};
    use unibi_llm::{MockExecutor, MockGenerator, MockIngestor, ProviderRegistry};

    use crate::config::EngineConfig;
    use crate::state::EngineParts;

    fn engine() -> Engine {
        let mut registry = ProviderRegistry::new();
        registry.register_generator(Arc::new(MockGenerator::new()));
        registry.register_ingestor(Arc::new(MockIngestor::new()));
        registry.register_executor(Arc::new(MockExecutor::default()));
        let clock = Arc::new(MockClock::new(Utc::now()));
        Engine::new(EngineConfig::default(), &registry, EngineParts::in_memory(clock)).unwrap()
    }

    fn corpus() -> CorpusSpec {
        CorpusSpec::new(vec![
            CorpusUnit::Ddl {
                table: "orders".to_string(),
                statement: "CREATE TABLE orders (id INT)".to_string(),
            },
            CorpusUnit::Ddl {
                table: "customers".to_string(),
                statement: "CREATE TABLE customers (id INT)".to_string(),
            },
        ])
        .with_label("full training")
    }

    async fn finished(engine: &Engine, job_id: JobId) -> TrainingStatusResponse {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = engine.get_training_status(job_id).await.unwrap();
                if status.status.is_terminal() {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job should finish")
    }

    #[tokio::test]
    async fn test_control_surface_round_trip() {
        let engine = engine();
        let started = engine.start_training(DatasetId::from(7), corpus()).await.unwrap();
        assert_eq!(started.status, JobStatus::Queued);
        assert_eq!(started.units_total, 2);
        assert_eq!(started.label.as_deref(), Some("full training"));

        let done = finished(&engine, started.job_id).await;
        assert_eq!(done.status, JobStatus::Completed);

        let logs = engine.get_training_logs(started.job_id, None).await.unwrap();
        let lines: Vec<&str> = logs.entries.iter().map(|l| l.line.as_str()).collect();
        assert!(lines.contains(&"[50%] Ingested table DDL: orders (1/2)"));
        assert!(lines.contains(&"[100%] Ingested table DDL: customers (2/2)"));

        let jobs = engine.list_training_jobs(&DatasetId::from(7)).await.unwrap();
        assert_eq!(jobs, vec![done]);

        engine.delete_training_job(started.job_id).await.unwrap();
        let err = engine.get_training_status(started.job_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::JobNotFound);
        assert_eq!(err.kind().http_status(), 404);
    }

    #[tokio::test]
    async fn test_log_limit_is_applied() {
        let engine = engine();
        let started = engine.start_training(DatasetId::from(7), corpus()).await.unwrap();
        finished(&engine, started.job_id).await;

        let logs = engine.get_training_logs(started.job_id, Some(2)).await.unwrap();
        assert_eq!(logs.entries.len(), 2);
        assert_eq!(logs.entries[1].event, LogEvent::Completed);
    }
}
