//! In-memory job store, the single source of truth for job state.
//!
//! Each job lives behind its own mutex so operations on the same id are
//! serialized while operations on different ids never wait on each other.
//! The `DashMap` shard lock is only held long enough to clone the job handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::ServiceError;
use crate::state_machine::{Job, JobId, Tier};

#[derive(Default)]
pub struct JobStore {
    jobs: DashMap<JobId, Arc<Mutex<Job>>>,
    next_seq: AtomicU64,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending job and return its id.
    pub fn create(
        &self,
        tier: Tier,
        now: DateTime<Utc>,
        processing_duration_ms: u64,
        max_retries: u32,
    ) -> JobId {
        let id = JobId::generate();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let job = Job::new(id.clone(), tier, seq, now, processing_duration_ms, max_retries);
        self.jobs.insert(id.clone(), Arc::new(Mutex::new(job)));
        id
    }

    /// Snapshot of a single job.
    pub fn get(&self, id: &JobId) -> Result<Job, ServiceError> {
        self.with_job(id, |job| job.clone())
    }

    /// Run `f` with exclusive access to one job.
    pub fn with_job<R>(&self, id: &JobId, f: impl FnOnce(&mut Job) -> R) -> Result<R, ServiceError> {
        let handle = self
            .jobs
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ServiceError::NotFound(id.clone()))?;
        let mut job = handle.lock();
        Ok(f(&mut job))
    }

    /// Snapshot of every job. Each job is copied under its own lock, so no
    /// snapshot ever holds a half-applied transition.
    pub fn list(&self) -> Vec<Job> {
        self.handles().iter().map(|handle| handle.lock().clone()).collect()
    }

    /// Ids currently present in the store.
    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Remove every job matching `predicate`, returning how many were removed.
    pub fn remove_if(&self, predicate: impl Fn(&Job) -> bool) -> usize {
        let mut removed = 0;
        self.jobs.retain(|_, handle| {
            let keep = !predicate(&handle.lock());
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    fn handles(&self) -> Vec<Arc<Mutex<Job>>> {
        self.jobs.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::JobStatus;

    #[test]
    fn create_then_get() {
        let store = JobStore::new();
        let id = store.create(Tier::Premium, Utc::now(), 5_000, 3);
        let job = store.get(&id).unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.tier, Tier::Premium);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.processing_duration_ms, 5_000);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let store = JobStore::new();
        let err = store.get(&JobId::from("missing")).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(id) if id == JobId::from("missing")));
    }

    #[test]
    fn sequence_numbers_follow_insertion_order() {
        let store = JobStore::new();
        let now = Utc::now();
        let a = store.create(Tier::Free, now, 1_000, 3);
        let b = store.create(Tier::Free, now, 1_000, 3);
        assert!(store.get(&a).unwrap().seq < store.get(&b).unwrap().seq);
    }

    #[test]
    fn with_job_mutations_are_visible() {
        let store = JobStore::new();
        let id = store.create(Tier::Free, Utc::now(), 1_000, 3);
        store.with_job(&id, |job| job.progress = 42).unwrap();
        assert_eq!(store.get(&id).unwrap().progress, 42);
    }

    #[test]
    fn remove_if_counts_removed() {
        let store = JobStore::new();
        let now = Utc::now();
        let keep = store.create(Tier::Free, now, 1_000, 3);
        for _ in 0..3 {
            let id = store.create(Tier::Free, now, 1_000, 3);
            store.with_job(&id, |job| job.status = JobStatus::Completed).unwrap();
        }

        assert_eq!(store.remove_if(|job| job.status == JobStatus::Completed), 3);
        assert_eq!(store.len(), 1);
        assert!(store.get(&keep).is_ok());
    }

    #[test]
    fn concurrent_updates_to_one_job_are_not_lost() {
        let store = Arc::new(JobStore::new());
        let id = store.create(Tier::Free, Utc::now(), 1_000, 1_000);

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.with_job(&id, |job| job.retry_count += 1).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(store.get(&id).unwrap().retry_count, 800);
    }
}
