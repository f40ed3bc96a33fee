//! The job service: the operation set every caller goes through.
//!
//! Owns the job store, the rate limiter, the live configuration and the
//! fault-injection policy. All time-dependent operations take an explicit
//! `now` so callers (and tests) control the clock.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ConfigHandle, ConfigUpdate, ServiceConfig, VersionedConfig};
use crate::error::ServiceError;
use crate::fault::{FaultKind, FaultPolicy};
use crate::rate_limit::RateLimiter;
use crate::scheduler;
use crate::state_machine::{Job, JobId, JobStatus, StateMachine, Tier, Transition};
use crate::store::JobStore;

/// Jobs sharing one `(status, tier)` category.
#[derive(Debug, Clone, Serialize)]
pub struct JobGroup {
    pub status: JobStatus,
    pub tier: Tier,
    pub jobs: Vec<Job>,
}

pub struct JobService {
    store: JobStore,
    limiter: RateLimiter,
    config: ConfigHandle,
    faults: Arc<dyn FaultPolicy>,
}

impl JobService {
    pub fn new(config: ServiceConfig, faults: Arc<dyn FaultPolicy>) -> Self {
        Self {
            store: JobStore::new(),
            limiter: RateLimiter::new(),
            config: ConfigHandle::new(config),
            faults,
        }
    }

    /// Create a pending job for `identity`, subject to the free-tier limit.
    pub fn submit(&self, tier: Tier, identity: &str, now: DateTime<Utc>) -> Result<JobId, ServiceError> {
        let config = self.config.snapshot();
        let ceiling = config.config.rate_limit_ceiling;
        let policy = config.config.rate_limit_policy()?;
        if !self.limiter.allow(identity, tier, now, ceiling, policy) {
            let attempts = self.limiter.count(identity);
            warn!(identity, ceiling, attempts, "submission rejected by rate limiter");
            return Err(ServiceError::RateLimitExceeded {
                identity: identity.to_string(),
                ceiling,
            });
        }

        let id = self.store.create(
            tier,
            now,
            config.config.processing_duration_ms(tier),
            config.config.max_retries,
        );
        info!(job_id = %id, %tier, identity, "job submitted");
        Ok(id)
    }

    /// Advance the job to `now` and return a snapshot of it.
    ///
    /// Reads of pending or failed jobs may fail with `TransientFailure`. The
    /// fault is drawn before advancing, so a failed read leaves the stored
    /// job exactly as it was.
    pub fn query(&self, id: &JobId, now: DateTime<Utc>) -> Result<Job, ServiceError> {
        let config = self.config.snapshot();
        self.store.with_job(id, |job| {
            if !job.is_terminal()
                && let Some(kind) = self.faults.inject(job, now, &config.config)
            {
                warn!(job_id = %id, %kind, "status check failed");
                return Err(ServiceError::TransientFailure {
                    job_id: id.clone(),
                    kind,
                });
            }
            log_transition(id, &StateMachine::advance(job, now));
            Ok(())
        })??;
        self.store.get(id)
    }

    /// A worker reports that processing `id` failed transiently.
    pub fn record_failure(&self, id: &JobId, kind: FaultKind, now: DateTime<Utc>) -> Result<(), ServiceError> {
        self.store.with_job(id, |job| {
            log_transition(id, &StateMachine::advance(job, now));
            let transition = StateMachine::fail(job, kind, now)?;
            log_transition(id, &transition);
            Ok(())
        })?
    }

    /// Cancel a pending or failed job. Requires the admin credential.
    pub fn cancel(
        &self,
        id: &JobId,
        reason: &str,
        credential: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if credential != self.config.snapshot().config.admin_token {
            warn!(job_id = %id, "cancel rejected: bad credential");
            return Err(ServiceError::Unauthorized);
        }

        self.store.with_job(id, |job| {
            log_transition(id, &StateMachine::advance(job, now));
            StateMachine::cancel(job, reason.to_string(), now)?;
            info!(job_id = %id, reason, "job cancelled");
            Ok(())
        })?
    }

    /// Advance every non-terminal job, then group all jobs by `(status, tier)`.
    pub fn list_categorized(&self, now: DateTime<Utc>) -> Vec<JobGroup> {
        for id in self.store.ids() {
            // A concurrent cleanup may have removed the job already.
            if let Ok(transition) = self.store.with_job(&id, |job| StateMachine::advance(job, now)) {
                log_transition(&id, &transition);
            }
        }

        let mut groups: BTreeMap<(JobStatus, Tier), Vec<Job>> = BTreeMap::new();
        for job in self.store.list() {
            groups.entry((job.status, job.tier)).or_default().push(job);
        }
        groups
            .into_iter()
            .map(|((status, tier), mut jobs)| {
                jobs.sort_by_key(|job| job.seq);
                JobGroup { status, tier, jobs }
            })
            .collect()
    }

    /// Drop completed jobs. Failed and cancelled history is kept.
    pub fn cleanup(&self) -> usize {
        let removed = self.store.remove_if(|job| job.status == JobStatus::Completed);
        info!(removed, remaining = self.store.len(), "cleanup finished");
        removed
    }

    pub fn dispatch_tick(&self, now: DateTime<Utc>) -> Option<JobId> {
        scheduler::dispatch_next(&self.store, now)
    }

    pub fn get_config(&self) -> Arc<VersionedConfig> {
        self.config.snapshot()
    }

    pub fn set_config(&self, update: &ConfigUpdate) -> Result<Arc<VersionedConfig>, ServiceError> {
        let updated = self.config.update(update)?;
        info!(version = updated.version, ?update, "configuration updated");
        Ok(updated)
    }

    pub fn job_count(&self) -> usize {
        self.store.len()
    }
}

fn log_transition(id: &JobId, transition: &Transition) {
    match transition {
        Transition::Unchanged => {}
        Transition::Progressed { progress } => debug!(job_id = %id, progress, "job progressed"),
        Transition::Completed => info!(job_id = %id, "job completed"),
        Transition::Failed(kind) => warn!(job_id = %id, %kind, "job failed"),
        Transition::Retried { attempt } => info!(job_id = %id, attempt, "job retried"),
        Transition::PermanentlyFailed => info!(job_id = %id, "job permanently failed"),
        Transition::Cancelled => info!(job_id = %id, "job cancelled"),
    }
}
