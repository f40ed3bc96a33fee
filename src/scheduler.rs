//! Dispatcher: drains pending jobs in priority order.
//!
//! Candidates are ordered by `(-priority, created_at, seq)`, so premium jobs
//! always go first and each tier is served FIFO. The first candidate whose
//! processing time has fully elapsed is completed.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::state_machine::{JobId, JobStatus, StateMachine, progress_at};
use crate::store::JobStore;

/// Complete the next eligible pending job and return its id.
pub fn dispatch_next(store: &JobStore, now: DateTime<Utc>) -> Option<JobId> {
    let mut candidates: Vec<_> = store
        .list()
        .into_iter()
        .filter(|job| job.status == JobStatus::Pending)
        .collect();
    candidates.sort_by_key(|job| (Reverse(job.priority), job.created_at, job.seq));
    debug!(candidates = candidates.len(), "dispatch scan");

    for candidate in candidates {
        if progress_at(&candidate, now) < 100 {
            continue;
        }
        // The snapshot may be stale: re-check under the job's lock.
        let dispatched = store
            .with_job(&candidate.id, |job| {
                if job.status == JobStatus::Pending && progress_at(job, now) >= 100 {
                    StateMachine::complete(job, now).is_ok()
                } else {
                    false
                }
            })
            .unwrap_or(false);

        if dispatched {
            info!(job_id = %candidate.id, tier = %candidate.tier, "job dispatched");
            return Some(candidate.id);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;
    use crate::state_machine::Tier;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn premium_first_regardless_of_submission_order() {
        let store = JobStore::new();
        let free = store.create(Tier::Free, t0(), 1_000, 3);
        let premium = store.create(Tier::Premium, t0(), 1_000, 3);

        let later = t0() + Duration::seconds(5);
        assert_eq!(dispatch_next(&store, later), Some(premium));
        assert_eq!(dispatch_next(&store, later), Some(free));
        assert_eq!(dispatch_next(&store, later), None);
    }

    #[test]
    fn fifo_within_a_tier() {
        let store = JobStore::new();
        let first = store.create(Tier::Free, t0(), 1_000, 3);
        let second = store.create(Tier::Free, t0() + Duration::milliseconds(1), 1_000, 3);
        let third = store.create(Tier::Free, t0() + Duration::milliseconds(1), 1_000, 3);

        let later = t0() + Duration::seconds(5);
        assert_eq!(dispatch_next(&store, later), Some(first));
        assert_eq!(dispatch_next(&store, later), Some(second));
        assert_eq!(dispatch_next(&store, later), Some(third));
    }

    #[test]
    fn nothing_eligible_before_duration_elapses() {
        let store = JobStore::new();
        let id = store.create(Tier::Free, t0(), 10_000, 3);

        assert_eq!(dispatch_next(&store, t0() + Duration::seconds(9)), None);
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Pending);
        assert_eq!(dispatch_next(&store, t0() + Duration::seconds(10)), Some(id.clone()));

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn eligible_free_job_is_served_while_premium_is_still_running() {
        let store = JobStore::new();
        let free = store.create(Tier::Free, t0(), 1_000, 3);
        let _premium = store.create(Tier::Premium, t0(), 60_000, 3);

        assert_eq!(dispatch_next(&store, t0() + Duration::seconds(2)), Some(free));
    }

    #[test]
    fn failed_and_terminal_jobs_are_skipped() {
        let store = JobStore::new();
        let failed = store.create(Tier::Premium, t0(), 1_000, 3);
        store
            .with_job(&failed, |job| StateMachine::fail(job, FaultKind::Timeout, t0()))
            .unwrap()
            .unwrap();
        let cancelled = store.create(Tier::Premium, t0(), 1_000, 3);
        store
            .with_job(&cancelled, |job| StateMachine::cancel(job, "stop".into(), t0()))
            .unwrap()
            .unwrap();

        assert_eq!(dispatch_next(&store, t0() + Duration::seconds(5)), None);
    }

    #[test]
    fn retried_job_waits_a_full_duration_from_the_retry() {
        let store = JobStore::new();
        let id = store.create(Tier::Free, t0(), 10_000, 3);
        let retry_at = t0() + Duration::seconds(9);
        store
            .with_job(&id, |job| {
                StateMachine::fail(job, FaultKind::Timeout, retry_at).unwrap();
                StateMachine::advance(job, retry_at);
            })
            .unwrap();

        assert_eq!(dispatch_next(&store, t0() + Duration::seconds(12)), None);
        assert_eq!(dispatch_next(&store, retry_at + Duration::seconds(10)), Some(id));
    }
}
