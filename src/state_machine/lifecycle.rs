use chrono::{DateTime, Utc};

use super::job::{Job, JobStatus};
use crate::error::ServiceError;
use crate::fault::FaultKind;

/// The result of applying one lifecycle step to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed (terminal job, or no new progress).
    Unchanged,
    /// Still pending, progress moved forward.
    Progressed { progress: u8 },
    /// Reached 100% (lazily or via dispatch).
    Completed,
    /// A worker reported a transient failure.
    Failed(FaultKind),
    /// A failed job went back to pending; `attempt` is the new retry count.
    Retried { attempt: u32 },
    /// Retries exhausted.
    PermanentlyFailed,
    Cancelled,
}

/// Percent of processing done at `now`, measured from the job's anchor.
///
/// Pure: reads the job, never mutates it. A `now` before the anchor counts
/// as zero elapsed; a zero duration is immediately done.
pub fn progress_at(job: &Job, now: DateTime<Utc>) -> u8 {
    if job.processing_duration_ms == 0 {
        return 100;
    }
    let elapsed_ms = (now - job.anchor()).num_milliseconds().max(0) as u128;
    let percent = elapsed_ms * 100 / job.processing_duration_ms as u128;
    percent.min(100) as u8
}

/// Drives a `Job` through its lifecycle:
///
/// ```text
/// pending -> completed | failed | cancelled
/// failed  -> pending (retry) | permanently_failed | cancelled
/// ```
///
/// Terminal states (`completed`, `permanently_failed`, `cancelled`) have no
/// outgoing edges.
pub struct StateMachine;

impl StateMachine {
    /// Lazily advance the job to `now`.
    ///
    /// - `Pending`: progress follows elapsed time and never decreases; at
    ///   100% the job completes.
    /// - `Failed`: retries (progress reset, anchor moved to `now`) while
    ///   `retry_count < max_retries`, otherwise fails permanently.
    /// - Terminal jobs are returned unchanged.
    pub fn advance(job: &mut Job, now: DateTime<Utc>) -> Transition {
        let transition = match job.status {
            JobStatus::Pending => {
                let progress = progress_at(job, now);
                if progress >= 100 {
                    Transition::Completed
                } else if progress > job.progress {
                    Transition::Progressed { progress }
                } else {
                    Transition::Unchanged
                }
            }
            JobStatus::Failed => {
                if job.retry_count < job.max_retries {
                    Transition::Retried {
                        attempt: job.retry_count + 1,
                    }
                } else {
                    Transition::PermanentlyFailed
                }
            }
            JobStatus::Completed | JobStatus::PermanentlyFailed | JobStatus::Cancelled => {
                Transition::Unchanged
            }
        };

        Self::apply(job, &transition, now);
        transition
    }

    /// Record a worker-reported transient failure. Only pending jobs can fail.
    pub fn fail(job: &mut Job, kind: FaultKind, now: DateTime<Utc>) -> Result<Transition, ServiceError> {
        Self::guard(job, &[JobStatus::Pending], "fail")?;
        let transition = Transition::Failed(kind);
        Self::apply(job, &transition, now);
        Ok(transition)
    }

    /// Complete a pending job directly, bypassing lazy advancement.
    pub fn complete(job: &mut Job, now: DateTime<Utc>) -> Result<Transition, ServiceError> {
        Self::guard(job, &[JobStatus::Pending], "complete")?;
        Self::apply(job, &Transition::Completed, now);
        Ok(Transition::Completed)
    }

    /// Cancel a pending or failed job, storing the reason.
    pub fn cancel(job: &mut Job, reason: String, now: DateTime<Utc>) -> Result<Transition, ServiceError> {
        Self::guard(job, &[JobStatus::Pending, JobStatus::Failed], "cancel")?;
        job.cancellation_reason = Some(reason);
        Self::apply(job, &Transition::Cancelled, now);
        Ok(Transition::Cancelled)
    }

    fn guard(job: &Job, allowed: &[JobStatus], action: &'static str) -> Result<(), ServiceError> {
        if allowed.contains(&job.status) {
            Ok(())
        } else {
            Err(ServiceError::InvalidTransition {
                job_id: job.id.clone(),
                from: job.status,
                action,
            })
        }
    }

    fn apply(job: &mut Job, transition: &Transition, now: DateTime<Utc>) {
        match transition {
            Transition::Unchanged => return,
            Transition::Progressed { progress } => {
                job.progress = *progress;
            }
            Transition::Completed => {
                job.status = JobStatus::Completed;
                job.progress = 100;
            }
            Transition::Failed(kind) => {
                job.status = JobStatus::Failed;
                job.last_failure = Some(*kind);
            }
            Transition::Retried { attempt } => {
                job.status = JobStatus::Pending;
                job.retry_count = *attempt;
                job.progress = 0;
                job.last_retry_at = Some(now);
            }
            Transition::PermanentlyFailed => {
                job.status = JobStatus::PermanentlyFailed;
                job.progress = 100;
            }
            Transition::Cancelled => {
                job.status = JobStatus::Cancelled;
            }
        }
        job.updated_at = now;
    }
}
