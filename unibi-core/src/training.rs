//! Training job data model

use crate::{new_job_id, DatasetId, JobId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// JOB STATUS
// ============================================================================

/// Lifecycle state of a training job.
///
/// ```text
/// Queued -> Running -> {Paused, Completed, Failed, Cancelled}
/// Paused -> Running | Cancelled | Failed
/// ```
///
/// A dataset with no non-terminal job is idle; idle is not a stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Queued, running and paused jobs occupy their dataset.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (Paused, Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CORPUS
// ============================================================================

/// One ingestible training artifact. Each unit is a checkpoint boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorpusUnit {
    /// A table definition.
    Ddl { table: String, statement: String },
    /// Free-form documentation such as business terms or table relationships.
    Documentation { title: String, text: String },
    /// An example question paired with its SQL.
    QuestionSql { question: String, sql: String },
}

impl CorpusUnit {
    /// Short human-readable label used in logs and errors.
    pub fn describe(&self) -> String {
        match self {
            CorpusUnit::Ddl { table, .. } => format!("table DDL: {}", table),
            CorpusUnit::Documentation { title, .. } => format!("documentation: {}", title),
            CorpusUnit::QuestionSql { question, .. } => format!("example query: {}", question),
        }
    }
}

/// Ordered list of units a training job ingests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusSpec {
    /// Optional label shown in job listings (e.g. "full retrain", "term: GMV").
    pub label: Option<String>,
    pub units: Vec<CorpusUnit>,
}

impl CorpusSpec {
    pub fn new(units: Vec<CorpusUnit>) -> Self {
        Self { label: None, units }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

// ============================================================================
// TRAINING JOB
// ============================================================================

/// One ingestion run for one dataset.
///
/// Only the orchestrator mutates jobs. Every persisted mutation bumps
/// `revision`, and stores reject writes that would move it backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: JobId,
    pub dataset_id: DatasetId,
    pub status: JobStatus,
    pub progress_pct: u8,
    /// Number of corpus units ingested so far; resume continues from here.
    pub units_completed: usize,
    pub corpus: CorpusSpec,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub pause_requested: bool,
    pub revision: u64,
}

impl TrainingJob {
    /// Create a new queued job.
    pub fn new(dataset_id: DatasetId, corpus: CorpusSpec, now: Timestamp) -> Self {
        Self {
            id: new_job_id(),
            dataset_id,
            status: JobStatus::Queued,
            progress_pct: 0,
            units_completed: 0,
            corpus,
            created_at: now,
            started_at: None,
            finished_at: None,
            error: None,
            cancel_requested: false,
            pause_requested: false,
            revision: 0,
        }
    }

    pub fn units_total(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Percentage complete after `completed` of `total` units, rounded down.
    pub fn progress_for(completed: usize, total: usize) -> u8 {
        if total == 0 {
            return 100;
        }
        let pct = completed.min(total) * 100 / total;
        pct as u8
    }

    /// Record that the first `units_completed` units are ingested.
    pub fn record_checkpoint(&mut self, units_completed: usize) {
        self.units_completed = units_completed;
        self.progress_pct = Self::progress_for(units_completed, self.units_total());
    }
}

// ============================================================================
// LOGS
// ============================================================================

/// Severity of a training log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// What happened, independent of the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    Queued,
    Started,
    UnitIngested,
    Paused,
    Resumed,
    Cancelled,
    Completed,
    Failed,
    CacheInvalidated,
    Reconciled,
}

/// One timestamped event within a job. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingLogEntry {
    pub job_id: JobId,
    /// Position in the job's log, assigned by the store on append.
    pub sequence: u64,
    pub timestamp: Timestamp,
    pub level: LogLevel,
    pub event: LogEvent,
    pub progress_pct: u8,
    pub message: String,
}

impl TrainingLogEntry {
    pub fn new(
        job_id: JobId,
        timestamp: Timestamp,
        level: LogLevel,
        event: LogEvent,
        progress_pct: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            sequence: 0,
            timestamp,
            level,
            event,
            progress_pct,
            message: message.into(),
        }
    }

    /// `[40%] Ingested table DDL: orders (2/5)`
    pub fn line(&self) -> String {
        format!("[{}%] {}", self.progress_pct, self.message)
    }
}
