//! Training job state machine.
//!
//! Each non-terminal job owns a [`JobCell`]: the current record behind a
//! watch channel, a write lock that serializes mutations, and a control
//! channel the runner checks between units. Every mutation goes through
//! [`JobCell::update`], which bumps the revision, persists the record,
//! appends the matching log entry and only then publishes the new state.
//!
//! A runner task exists while a job is `Queued` or `Running`. Acknowledging
//! a pause ends the task; resume starts a new one from the last checkpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Semaphore};
use tracing::{info, warn};
use unibi_core::{
    Clock, CorpusSpec, CorpusUnit, DatasetId, JobError, JobId, JobStatus, LogEvent, LogLevel,
    Timestamp, TrainingJob, TrainingLogEntry, UnibiResult,
};
use unibi_llm::{clean_sql, CorpusIngestor};
use unibi_storage::{InvalidationManager, ProgressStore};

use super::corpus::{relationships_unit, BusinessTerm};
use super::runner;
use crate::config::TrainingConfig;
use crate::constants::RESTART_FAILURE_REASON;

// ============================================================================
// JOB CELL
// ============================================================================

/// Signal from the control surface to a job's runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Run,
    Pause,
    Cancel,
}

/// Log entry written together with a state change.
pub(crate) struct Note {
    level: LogLevel,
    event: LogEvent,
    message: String,
}

impl Note {
    pub(crate) fn new(level: LogLevel, event: LogEvent, message: impl Into<String>) -> Self {
        Self {
            level,
            event,
            message: message.into(),
        }
    }

    pub(crate) fn info(event: LogEvent, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, event, message)
    }
}

pub(crate) struct JobCell {
    write: tokio::sync::Mutex<()>,
    state: watch::Sender<TrainingJob>,
    control: watch::Sender<Control>,
}

impl JobCell {
    fn new(job: TrainingJob) -> Self {
        Self {
            write: tokio::sync::Mutex::new(()),
            state: watch::channel(job).0,
            control: watch::channel(Control::Run).0,
        }
    }

    pub(crate) fn snapshot(&self) -> TrainingJob {
        self.state.borrow().clone()
    }

    pub(crate) fn id(&self) -> JobId {
        self.state.borrow().id
    }

    pub(crate) fn control(&self) -> watch::Receiver<Control> {
        self.control.subscribe()
    }

    fn signal(&self, control: Control) {
        self.control.send_replace(control);
    }

    /// Apply `change` and persist the result under the next revision.
    ///
    /// If `change` or the save fails, nothing is published and no log entry
    /// is written.
    pub(crate) async fn update<F>(
        &self,
        inner: &OrchestratorInner,
        change: F,
    ) -> UnibiResult<TrainingJob>
    where
        F: FnOnce(&mut TrainingJob) -> Result<Option<Note>, JobError> + Send,
    {
        let _guard = self.write.lock().await;
        let mut job = self.snapshot();
        let note = change(&mut job)?;
        job.revision += 1;
        inner.store.save(&job).await?;
        if let Some(note) = note {
            inner.append_log(&job, note).await;
        }
        self.state.send_replace(job.clone());
        Ok(job)
    }
}

pub(crate) fn invalid(job: &TrainingJob, operation: &str) -> JobError {
    JobError::InvalidTransition {
        job_id: job.id,
        status: job.status,
        operation: operation.to_string(),
    }
}

pub(crate) fn transition(
    job: &mut TrainingJob,
    next: JobStatus,
    operation: &str,
) -> Result<(), JobError> {
    if !job.status.can_transition_to(next) {
        return Err(invalid(job, operation));
    }
    job.status = next;
    Ok(())
}

/// Move a job to `Cancelled`.
pub(crate) fn cancel_now(job: &mut TrainingJob, now: Timestamp) -> Result<Option<Note>, JobError> {
    transition(job, JobStatus::Cancelled, "cancel")?;
    job.cancel_requested = true;
    job.pause_requested = false;
    job.finished_at = Some(now);
    Ok(Some(Note::info(
        LogEvent::Cancelled,
        format!(
            "Cancelled after {}/{} units",
            job.units_completed,
            job.units_total()
        ),
    )))
}

// ============================================================================
// SHARED STATE
// ============================================================================

pub(crate) struct OrchestratorInner {
    pub(crate) store: Arc<dyn ProgressStore>,
    pub(crate) ingestor: Arc<dyn CorpusIngestor>,
    pub(crate) invalidation: InvalidationManager,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: TrainingConfig,
    pub(crate) workers: Arc<Semaphore>,
    active: Mutex<HashMap<DatasetId, Arc<JobCell>>>,
}

impl OrchestratorInner {
    pub(crate) async fn append_log(&self, job: &TrainingJob, note: Note) {
        let entry = TrainingLogEntry::new(
            job.id,
            self.clock.now(),
            note.level,
            note.event,
            job.progress_pct,
            note.message,
        );
        if let Err(e) = self.store.append_log(job.id, entry).await {
            warn!(job_id = %job.id, error = %e, "Failed to append training log");
        }
    }

    /// Free the job's dataset if the job still holds it.
    pub(crate) fn release(&self, dataset_id: &DatasetId, job_id: JobId) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if active.get(dataset_id).map(|cell| cell.id()) == Some(job_id) {
            active.remove(dataset_id);
        }
    }

    fn find(&self, job_id: JobId) -> Option<Arc<JobCell>> {
        let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.values().find(|cell| cell.id() == job_id).cloned()
    }

    /// Claim the dataset for `cell`, unless another job is still active.
    fn reserve(&self, cell: &Arc<JobCell>) -> Result<(), JobError> {
        let job = cell.snapshot();
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = active.get(&job.dataset_id) {
            let current = existing.snapshot();
            if current.status.is_active() {
                return Err(JobError::Conflict {
                    dataset_id: job.dataset_id.to_string(),
                    existing: current.id,
                    status: current.status,
                });
            }
        }
        active.insert(job.dataset_id.clone(), Arc::clone(cell));
        Ok(())
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Outcome of the startup sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs left queued or running by a previous process, now failed.
    pub failed: Vec<JobId>,
    /// Paused jobs that can be resumed or cancelled again.
    pub paused: Vec<JobId>,
}

/// Runs at most one training job per dataset in the background.
#[derive(Clone)]
pub struct TrainingOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl std::fmt::Debug for TrainingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingOrchestrator")
            .field("active_jobs", &self.active_count())
            .field("free_workers", &self.inner.workers.available_permits())
            .finish()
    }
}

impl TrainingOrchestrator {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        ingestor: Arc<dyn CorpusIngestor>,
        invalidation: InvalidationManager,
        clock: Arc<dyn Clock>,
        config: TrainingConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(OrchestratorInner {
                store,
                ingestor,
                invalidation,
                clock,
                config,
                workers,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of datasets with a non-terminal job.
    pub fn active_count(&self) -> usize {
        let active = self.inner.active.lock().unwrap_or_else(|p| p.into_inner());
        active
            .values()
            .filter(|cell| cell.snapshot().status.is_active())
            .count()
    }

    /// Queue a job ingesting `corpus` into the dataset.
    ///
    /// # Errors
    /// * `JobError::Conflict` - The dataset already has a queued, running or
    ///   paused job; that job is left untouched.
    pub async fn start(&self, dataset_id: DatasetId, corpus: CorpusSpec) -> UnibiResult<TrainingJob> {
        let job = TrainingJob::new(dataset_id.clone(), corpus, self.inner.clock.now());
        let cell = Arc::new(JobCell::new(job.clone()));

        // Held until the first record is stored so that no control request
        // can persist a later revision ahead of it.
        let guard = cell.write.lock().await;
        self.inner.reserve(&cell)?;
        if let Err(e) = self.inner.store.save(&job).await {
            self.inner.release(&dataset_id, job.id);
            return Err(e.into());
        }
        self.inner
            .append_log(
                &job,
                Note::info(
                    LogEvent::Queued,
                    format!("Training queued: {} units", job.units_total()),
                ),
            )
            .await;
        drop(guard);

        info!(
            job_id = %job.id,
            dataset_id = %dataset_id,
            units = job.units_total(),
            label = ?job.corpus.label,
            "Training job queued"
        );
        self.spawn(cell);
        Ok(job)
    }

    /// Ask a running job to pause after the unit in progress.
    ///
    /// The returned record is still `Running` with `pause_requested` set; the
    /// job becomes `Paused` at its next checkpoint.
    pub async fn pause(&self, job_id: JobId) -> UnibiResult<TrainingJob> {
        let cell = self.active_cell(job_id, "pause").await?;
        let job = cell
            .update(&self.inner, |job| {
                if job.status != JobStatus::Running || job.cancel_requested {
                    return Err(invalid(job, "pause"));
                }
                job.pause_requested = true;
                Ok(None)
            })
            .await?;
        cell.signal(Control::Pause);

        info!(
            job_id = %job_id,
            dataset_id = %job.dataset_id,
            progress = job.progress_pct,
            "Training pause requested"
        );
        Ok(job)
    }

    /// Continue a paused job from its last checkpoint.
    pub async fn resume(&self, job_id: JobId) -> UnibiResult<TrainingJob> {
        let cell = self.active_cell(job_id, "resume").await?;
        let job = cell
            .update(&self.inner, |job| {
                transition(job, JobStatus::Running, "resume")?;
                job.pause_requested = false;
                Ok(Some(Note::info(
                    LogEvent::Resumed,
                    format!(
                        "Resumed at {}/{} units",
                        job.units_completed,
                        job.units_total()
                    ),
                )))
            })
            .await?;
        cell.signal(Control::Run);

        info!(
            job_id = %job_id,
            dataset_id = %job.dataset_id,
            progress = job.progress_pct,
            "Training resumed"
        );
        self.spawn(cell);
        Ok(job)
    }

    /// Cancel a job.
    ///
    /// Queued and paused jobs are cancelled immediately. A running job is
    /// flagged and becomes `Cancelled` at its next checkpoint; units already
    /// ingested stay in the provider's store.
    pub async fn cancel(&self, job_id: JobId) -> UnibiResult<TrainingJob> {
        let cell = self.active_cell(job_id, "cancel").await?;
        let now = self.inner.clock.now();
        let job = cell
            .update(&self.inner, |job| match job.status {
                JobStatus::Running => {
                    job.cancel_requested = true;
                    Ok(None)
                }
                JobStatus::Queued | JobStatus::Paused => cancel_now(job, now),
                _ => Err(invalid(job, "cancel")),
            })
            .await?;
        cell.signal(Control::Cancel);

        if job.status == JobStatus::Cancelled {
            self.inner.release(&job.dataset_id, job.id);
            info!(job_id = %job_id, dataset_id = %job.dataset_id, "Training cancelled");
        } else {
            info!(job_id = %job_id, dataset_id = %job.dataset_id, "Training cancel requested");
        }
        Ok(job)
    }

    /// Current record of a job.
    pub async fn status(&self, job_id: JobId) -> UnibiResult<TrainingJob> {
        if let Some(cell) = self.inner.find(job_id) {
            return Ok(cell.snapshot());
        }
        self.inner
            .store
            .load(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound { job_id }.into())
    }

    /// The most recent log entries of a job, oldest first.
    ///
    /// `limit` defaults to and is capped by the configured log limits.
    pub async fn logs(
        &self,
        job_id: JobId,
        limit: Option<usize>,
    ) -> UnibiResult<Vec<TrainingLogEntry>> {
        self.status(job_id).await?;
        let limit = self.inner.config.log_limit(limit);
        Ok(self.inner.store.list_logs(job_id, limit).await?)
    }

    /// Every job of a dataset, newest first.
    pub async fn list_jobs(&self, dataset_id: &DatasetId) -> UnibiResult<Vec<TrainingJob>> {
        Ok(self.inner.store.list_for_dataset(dataset_id).await?)
    }

    /// The dataset's queued, running or paused job, if any.
    pub fn active_job(&self, dataset_id: &DatasetId) -> Option<TrainingJob> {
        let active = self.inner.active.lock().unwrap_or_else(|p| p.into_inner());
        active
            .get(dataset_id)
            .map(|cell| cell.snapshot())
            .filter(|job| job.status.is_active())
    }

    /// Remove a finished job and its logs.
    ///
    /// # Errors
    /// * `JobError::InvalidTransition` - The job is still queued, running or
    ///   paused
    /// * `JobError::NotFound` - No such job
    pub async fn delete(&self, job_id: JobId) -> UnibiResult<()> {
        let job = self.status(job_id).await?;
        if !job.status.is_terminal() {
            return Err(invalid(&job, "delete").into());
        }
        self.inner.store.delete(job_id).await?;
        info!(job_id = %job_id, dataset_id = %job.dataset_id, "Training job deleted");
        Ok(())
    }

    /// Startup sweep.
    ///
    /// Jobs a previous process left `Queued` or `Running` have no live loop
    /// and are failed with "process restarted". `Paused` jobs are registered
    /// again so they can be resumed or cancelled.
    pub async fn recover(&self) -> UnibiResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let now = self.inner.clock.now();

        let orphaned = self
            .inner
            .store
            .list_by_status(&[JobStatus::Queued, JobStatus::Running])
            .await?;
        for mut job in orphaned {
            if self.inner.find(job.id).is_some() {
                continue;
            }
            transition(&mut job, JobStatus::Failed, "reconcile")?;
            job.error = Some(RESTART_FAILURE_REASON.to_string());
            job.finished_at = Some(now);
            job.pause_requested = false;
            job.revision += 1;
            self.inner.store.save(&job).await?;
            self.inner
                .append_log(
                    &job,
                    Note::new(
                        LogLevel::Warn,
                        LogEvent::Reconciled,
                        format!("Marked failed: {}", RESTART_FAILURE_REASON),
                    ),
                )
                .await;
            warn!(
                job_id = %job.id,
                dataset_id = %job.dataset_id,
                progress = job.progress_pct,
                "Reconciled orphaned training job"
            );
            report.failed.push(job.id);
        }

        let paused = self.inner.store.list_by_status(&[JobStatus::Paused]).await?;
        for job in paused {
            let cell = Arc::new(JobCell::new(job.clone()));
            if self.inner.reserve(&cell).is_ok() {
                report.paused.push(job.id);
            }
        }

        info!(
            failed = report.failed.len(),
            paused = report.paused.len(),
            "Training recovery sweep finished"
        );
        Ok(report)
    }

    // ========================================================================
    // INCREMENTAL TRAINING
    // ========================================================================

    /// Train one business term.
    pub async fn train_term(
        &self,
        dataset_id: DatasetId,
        term: &BusinessTerm,
    ) -> UnibiResult<TrainingJob> {
        let corpus = CorpusSpec::new(vec![term.to_unit()]).with_label(format!("term: {}", term.term));
        self.start(dataset_id, corpus).await
    }

    /// Train relationship notes. Returns `None` when there is nothing to
    /// train.
    pub async fn train_relationships(
        &self,
        dataset_id: DatasetId,
        relationships: &[String],
    ) -> UnibiResult<Option<TrainingJob>> {
        if relationships.is_empty() {
            return Ok(None);
        }
        let corpus = CorpusSpec::new(vec![relationships_unit(&[], relationships)])
            .with_label("relationships");
        self.start(dataset_id, corpus).await.map(Some)
    }

    /// Train one example question with its SQL.
    pub async fn train_question_sql(
        &self,
        dataset_id: DatasetId,
        question: &str,
        sql: &str,
    ) -> UnibiResult<TrainingJob> {
        let unit = CorpusUnit::QuestionSql {
            question: question.to_string(),
            sql: clean_sql(sql),
        };
        let corpus = CorpusSpec::new(vec![unit]).with_label("example query");
        self.start(dataset_id, corpus).await
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn spawn(&self, cell: Arc<JobCell>) {
        let control = cell.control();
        tokio::spawn(runner::run(Arc::clone(&self.inner), cell, control));
    }

    /// Cell of a non-terminal job, or the error the operation should fail
    /// with.
    async fn active_cell(&self, job_id: JobId, operation: &str) -> UnibiResult<Arc<JobCell>> {
        if let Some(cell) = self.inner.find(job_id) {
            return Ok(cell);
        }
        match self.inner.store.load(job_id).await? {
            Some(job) => Err(invalid(&job, operation).into()),
            None => Err(JobError::NotFound { job_id }.into()),
        }
    }
}
