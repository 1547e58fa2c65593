//! Background loop of one training job.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use unibi_core::{JobStatus, LogEvent, LogLevel, UnibiError};

use super::orchestrator::{
    cancel_now, invalid, transition, Control, JobCell, Note, OrchestratorInner,
};

/// Drive a queued or resumed job until it pauses, ends, or is cancelled.
pub(crate) async fn run(
    inner: Arc<OrchestratorInner>,
    cell: Arc<JobCell>,
    mut control: watch::Receiver<Control>,
) {
    let job_id = cell.id();

    let _permit = tokio::select! {
        permit = Arc::clone(&inner.workers).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return fail(&inner, &cell, "worker pool closed".to_string()).await,
        },
        Ok(()) = async { control.wait_for(|c| *c == Control::Cancel).await.map(|_| ()) } => {
            debug!(job_id = %job_id, "Cancelled while waiting for a worker");
            return acknowledge_cancel(&inner, &cell).await;
        }
    };

    let mut job = cell.snapshot();
    if job.status == JobStatus::Queued {
        let now = inner.clock.now();
        let total = job.units_total();
        let started = cell
            .update(&inner, |job| {
                transition(job, JobStatus::Running, "start")?;
                job.started_at = Some(now);
                Ok(Some(Note::info(
                    LogEvent::Started,
                    format!("Training started: {} units", total),
                )))
            })
            .await;
        job = match started {
            Ok(job) => job,
            Err(UnibiError::Job(e)) => {
                debug!(job_id = %job_id, error = %e, "Job no longer runnable");
                return;
            }
            Err(e) => return fail(&inner, &cell, e.to_string()).await,
        };
        info!(
            job_id = %job_id,
            dataset_id = %job.dataset_id,
            units = total,
            "Training started"
        );
    } else if job.status != JobStatus::Running {
        debug!(job_id = %job_id, status = %job.status, "Job no longer runnable");
        return;
    }

    let total = job.units_total();
    let mut completed = job.units_completed;
    loop {
        let signal = *control.borrow_and_update();
        match signal {
            Control::Cancel => return acknowledge_cancel(&inner, &cell).await,
            Control::Pause if completed < total => {
                return acknowledge_pause(&inner, &cell).await;
            }
            _ => {}
        }
        if completed >= total {
            break;
        }

        let unit = &job.corpus.units[completed];
        let ingested = tokio::time::timeout(
            inner.config.unit_timeout,
            inner.ingestor.ingest(&job.dataset_id, unit),
        )
        .await;
        match ingested {
            Ok(Ok(_ack)) => {}
            Ok(Err(e)) => return fail(&inner, &cell, e.to_string()).await,
            Err(_) => {
                let reason = format!(
                    "Ingestion of {} timed out after {}s",
                    unit.describe(),
                    inner.config.unit_timeout.as_secs()
                );
                return fail(&inner, &cell, reason).await;
            }
        }

        completed += 1;
        let described = unit.describe();
        let checkpoint = cell
            .update(&inner, move |job| {
                job.record_checkpoint(completed);
                Ok(Some(Note::info(
                    LogEvent::UnitIngested,
                    format!("Ingested {} ({}/{})", described, completed, total),
                )))
            })
            .await;
        match checkpoint {
            Ok(saved) => debug!(
                job_id = %job_id,
                units_completed = completed,
                progress = saved.progress_pct,
                "Training checkpoint"
            ),
            Err(e) => return fail(&inner, &cell, e.to_string()).await,
        }
    }

    complete(&inner, &cell).await;
}

async fn acknowledge_pause(inner: &OrchestratorInner, cell: &JobCell) {
    let now = inner.clock.now();
    let paused = cell
        .update(inner, |job| {
            if job.cancel_requested {
                return cancel_now(job, now);
            }
            transition(job, JobStatus::Paused, "pause")?;
            job.pause_requested = false;
            Ok(Some(Note::info(
                LogEvent::Paused,
                format!(
                    "Paused after {}/{} units",
                    job.units_completed,
                    job.units_total()
                ),
            )))
        })
        .await;

    match paused {
        Ok(job) if job.status == JobStatus::Cancelled => {
            inner.release(&job.dataset_id, job.id);
            info!(job_id = %job.id, dataset_id = %job.dataset_id, "Training cancelled");
        }
        Ok(job) => info!(
            job_id = %job.id,
            dataset_id = %job.dataset_id,
            progress = job.progress_pct,
            "Training paused"
        ),
        Err(e) => fail(inner, cell, e.to_string()).await,
    }
}

async fn acknowledge_cancel(inner: &OrchestratorInner, cell: &JobCell) {
    let now = inner.clock.now();
    match cell.update(inner, |job| cancel_now(job, now)).await {
        Ok(job) => {
            inner.release(&job.dataset_id, job.id);
            info!(
                job_id = %job.id,
                dataset_id = %job.dataset_id,
                progress = job.progress_pct,
                "Training cancelled"
            );
        }
        // Already cancelled by the control surface.
        Err(UnibiError::Job(_)) => {}
        Err(e) => fail(inner, cell, e.to_string()).await,
    }
}

async fn complete(inner: &OrchestratorInner, cell: &JobCell) {
    let snapshot = cell.snapshot();

    // Purge before the job is reported complete.
    let report = inner.invalidation.invalidate_dataset(&snapshot.dataset_id).await;
    let (level, message) = if report.is_complete() {
        (
            LogLevel::Info,
            format!(
                "Purged {} cached entries ({} translations, {} results)",
                report.total_purged(),
                report.translation_purged,
                report.result_purged
            ),
        )
    } else {
        (
            LogLevel::Warn,
            format!(
                "Purged {} cached entries, {} tier(s) unavailable: {}",
                report.total_purged(),
                report.failures.len(),
                report
                    .failures
                    .iter()
                    .map(|(namespace, reason)| format!("{}: {}", namespace.as_str(), reason))
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
        )
    };
    inner
        .append_log(&snapshot, Note::new(level, LogEvent::CacheInvalidated, message))
        .await;

    let now = inner.clock.now();
    let completed = cell
        .update(inner, |job| {
            transition(job, JobStatus::Completed, "complete")?;
            job.record_checkpoint(job.units_total());
            job.pause_requested = false;
            job.finished_at = Some(now);
            Ok(Some(Note::info(
                LogEvent::Completed,
                format!("Training completed: {} units", job.units_total()),
            )))
        })
        .await;

    match completed {
        Ok(job) => {
            inner.release(&job.dataset_id, job.id);
            info!(
                job_id = %job.id,
                dataset_id = %job.dataset_id,
                units = job.units_total(),
                purged = report.total_purged(),
                epoch = report.epoch.sequence(),
                "Training completed"
            );
        }
        Err(e) => fail(inner, cell, e.to_string()).await,
    }
}

async fn fail(inner: &OrchestratorInner, cell: &JobCell, reason: String) {
    let now = inner.clock.now();
    let recorded = reason.clone();
    let failed = cell
        .update(inner, move |job| {
            if !job.status.can_transition_to(JobStatus::Failed) {
                return Err(invalid(job, "fail"));
            }
            job.status = JobStatus::Failed;
            job.error = Some(recorded.clone());
            job.pause_requested = false;
            job.finished_at = Some(now);
            Ok(Some(Note::new(
                LogLevel::Error,
                LogEvent::Failed,
                format!("Training failed: {}", recorded),
            )))
        })
        .await;

    let snapshot = cell.snapshot();
    match failed {
        Ok(job) => error!(
            job_id = %job.id,
            dataset_id = %job.dataset_id,
            units_completed = job.units_completed,
            error = %reason,
            "Training failed"
        ),
        Err(e) => warn!(
            job_id = %snapshot.id,
            error = %e,
            reason = %reason,
            "Failed to record training failure"
        ),
    }
    inner.release(&snapshot.dataset_id, snapshot.id);
}
