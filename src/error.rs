use thiserror::Error;

use crate::fault::FaultKind;
use crate::state_machine::{JobId, JobStatus};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Unauthorized: missing or invalid admin credential")]
    Unauthorized,

    #[error("Rate limit exceeded for {identity} (ceiling {ceiling})")]
    RateLimitExceeded { identity: String, ceiling: u32 },

    #[error("Transient failure while checking job {job_id}: {kind}")]
    TransientFailure { job_id: JobId, kind: FaultKind },

    #[error("Invalid transition for job {job_id}: cannot {action} a {from} job")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        action: &'static str,
    },

    #[error("Job {0} permanently failed after exhausting its retries")]
    PermanentFailure(JobId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ServiceError {
    /// Only read-time transient failures are worth re-querying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::TransientFailure { .. })
    }
}
