//! Client-side polling loop.
//!
//! Repeatedly checks a job until it reaches a terminal status. Transient
//! check failures are retried with a linearly growing delay, up to
//! `max_retries`; everything else is returned to the caller.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::service::JobService;
use crate::state_machine::{Job, JobId, JobStatus};

/// Anything that can report the current state of a job.
pub trait StatusSource: Send + Sync {
    fn status(&self, id: &JobId) -> impl Future<Output = Result<Job, ServiceError>> + Send;
}

impl StatusSource for JobService {
    fn status(&self, id: &JobId) -> impl Future<Output = Result<Job, ServiceError>> + Send {
        std::future::ready(self.query(id, Utc::now()))
    }
}

/// How a polling session ended without a hard error.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(Job),
    Cancelled(Job),
    /// The transient-failure budget ran out.
    RetriesExhausted { failures: u32 },
}

#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    max_retries: u32,
}

impl Poller {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self { interval, max_retries }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            Duration::from_millis(config.polling_interval_ms),
            config.poll_max_retries,
        )
    }

    /// Delay after the `failures`-th transient failure: interval * failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        self.interval * failures
    }

    /// Poll `id` until it is terminal.
    ///
    /// A permanently failed job is reported as `PermanentFailure` so callers
    /// can tell it apart from an exhausted retry budget.
    pub async fn poll_until_done<S: StatusSource>(
        &self,
        source: &S,
        id: &JobId,
    ) -> Result<PollOutcome, ServiceError> {
        let mut failures = 0;
        loop {
            match source.status(id).await {
                Ok(job) => match job.status {
                    JobStatus::Completed => return Ok(PollOutcome::Completed(job)),
                    JobStatus::Cancelled => return Ok(PollOutcome::Cancelled(job)),
                    JobStatus::PermanentlyFailed => {
                        return Err(ServiceError::PermanentFailure(id.clone()));
                    }
                    JobStatus::Pending | JobStatus::Failed => {
                        debug!(job_id = %id, progress = job.progress, "still running");
                        sleep(self.interval).await;
                    }
                },
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    if failures >= self.max_retries {
                        warn!(job_id = %id, failures, "giving up after repeated check failures");
                        return Ok(PollOutcome::RetriesExhausted { failures });
                    }
                    let delay = self.backoff(failures);
                    warn!(job_id = %id, error = %e, delay_ms = delay.as_millis() as u64, "status check failed, backing off");
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::fault::{FaultKind, NoFaults};
    use crate::state_machine::Tier;

    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Job, ServiceError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Job, ServiceError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            }
        }
    }

    impl StatusSource for ScriptedSource {
        fn status(&self, id: &JobId) -> impl Future<Output = Result<Job, ServiceError>> + Send {
            *self.calls.lock() += 1;
            let next = self
                .responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ServiceError::NotFound(id.clone())));
            std::future::ready(next)
        }
    }

    fn job(status: JobStatus) -> Job {
        let mut job = Job::new(JobId::from("j"), Tier::Free, 0, Utc::now(), 1_000, 3);
        job.status = status;
        job
    }

    fn transient() -> Result<Job, ServiceError> {
        Err(ServiceError::TransientFailure {
            job_id: JobId::from("j"),
            kind: FaultKind::Timeout,
        })
    }

    fn poller() -> Poller {
        Poller::new(Duration::from_millis(1), 3)
    }

    #[test]
    fn backoff_grows_linearly() {
        let p = Poller::new(Duration::from_millis(5000), 3);
        assert_eq!(p.backoff(1), Duration::from_millis(5000));
        assert_eq!(p.backoff(2), Duration::from_millis(10000));
        assert_eq!(p.backoff(3), Duration::from_millis(15000));
    }

    #[tokio::test]
    async fn polls_until_completed() {
        let source = ScriptedSource::new(vec![
            Ok(job(JobStatus::Pending)),
            transient(),
            Ok(job(JobStatus::Pending)),
            Ok(job(JobStatus::Completed)),
        ]);
        let outcome = poller().poll_until_done(&source, &JobId::from("j")).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Completed(_)));
        assert_eq!(*source.calls.lock(), 4);
    }

    #[tokio::test]
    async fn gives_up_after_max_transient_failures() {
        let source = ScriptedSource::new(vec![transient(), Ok(job(JobStatus::Pending)), transient(), transient()]);
        let outcome = poller().poll_until_done(&source, &JobId::from("j")).await.unwrap();
        assert_eq!(outcome, PollOutcome::RetriesExhausted { failures: 3 });
    }

    #[tokio::test]
    async fn permanent_failure_is_a_hard_error() {
        let source = ScriptedSource::new(vec![Ok(job(JobStatus::PermanentlyFailed))]);
        let err = poller().poll_until_done(&source, &JobId::from("j")).await.unwrap_err();
        assert!(matches!(err, ServiceError::PermanentFailure(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn cancelled_job_stops_polling() {
        let source = ScriptedSource::new(vec![Ok(job(JobStatus::Cancelled))]);
        let outcome = poller().poll_until_done(&source, &JobId::from("j")).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Cancelled(_)));
    }

    #[tokio::test]
    async fn unknown_job_is_returned_immediately() {
        let source = ScriptedSource::new(vec![]);
        let err = poller().poll_until_done(&source, &JobId::from("j")).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(*source.calls.lock(), 1);
    }

    #[tokio::test]
    async fn polls_a_live_service_to_completion() {
        let config = ServiceConfig {
            processing_duration_base_ms: 30,
            ..Default::default()
        };
        let svc = Arc::new(JobService::new(config, Arc::new(NoFaults)));
        let id = svc.submit(Tier::Premium, "alice", Utc::now()).unwrap();

        let outcome = poller().poll_until_done(svc.as_ref(), &id).await.unwrap();
        match outcome {
            PollOutcome::Completed(job) => assert_eq!(job.progress, 100),
            other => panic!("expected completion, got {other:?}"),
        }
    }
}
