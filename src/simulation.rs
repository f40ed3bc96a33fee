use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::ServiceError;
use crate::fault::FaultKind;
use crate::poller::{PollOutcome, Poller};
use crate::service::{JobGroup, JobService};
use crate::state_machine::{JobId, JobStatus, Tier};
use crate::ui::SessionProgress;

/// What a simulated session submits and how the worker behaves.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub free_jobs: usize,
    pub premium_jobs: usize,
    pub identity: String,
    /// Dispatcher tick period.
    pub tick: Duration,
    /// Chance per tick that the worker reports a failure on a running job.
    pub worker_failure_rate: f64,
    /// Cancel the first accepted free job right after submission.
    pub cancel_first_free: bool,
    pub seed: u64,
}

impl Default for SessionPlan {
    fn default() -> Self {
        Self {
            free_jobs: 6,
            premium_jobs: 2,
            identity: "demo-user".into(),
            tick: Duration::from_millis(250),
            worker_failure_rate: 0.02,
            cancel_first_free: true,
            seed: 0,
        }
    }
}

/// How one job's polling session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    Completed,
    Cancelled,
    PermanentlyFailed,
    GaveUp,
    Error(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub id: JobId,
    pub tier: Tier,
    pub state: FinalState,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub rejected: usize,
    pub dispatched: usize,
    pub worker_failures: usize,
    pub jobs: Vec<JobReport>,
    pub groups: Vec<JobGroup>,
    pub cleaned_up: usize,
}

/// Drives one end-to-end session against `svc`: submits the planned jobs,
/// runs a dispatcher/worker loop, polls every accepted job until it settles,
/// then lists and cleans up.
pub async fn run_session(svc: Arc<JobService>, plan: &SessionPlan, progress: &SessionProgress) -> Result<SessionReport> {
    if !(0.0..=1.0).contains(&plan.worker_failure_rate) {
        bail!("worker failure rate must be within [0, 1]");
    }

    let mut rejected = 0;
    let mut accepted = Vec::new();
    let tiers = std::iter::repeat_n(Tier::Premium, plan.premium_jobs)
        .chain(std::iter::repeat_n(Tier::Free, plan.free_jobs));
    for tier in tiers {
        match svc.submit(tier, &plan.identity, Utc::now()) {
            Ok(id) => accepted.push((id, tier)),
            Err(ServiceError::RateLimitExceeded { .. }) => rejected += 1,
            Err(e) => return Err(e.into()),
        }
    }
    info!(accepted = accepted.len(), rejected, "submissions done");

    if plan.cancel_first_free
        && let Some((id, _)) = accepted.iter().find(|(_, tier)| *tier == Tier::Free)
    {
        let token = svc.get_config().config.admin_token.clone();
        svc.cancel(id, "cancelled by simulation", &token, Utc::now())?;
    }

    progress.start(accepted.len());

    let (stop_tx, stop_rx) = oneshot::channel();
    let worker = tokio::spawn(worker_loop(Arc::clone(&svc), plan.clone(), stop_rx));

    let poller = Poller::from_config(&svc.get_config().config);
    let mut polls = JoinSet::new();
    for (id, tier) in accepted {
        let svc = Arc::clone(&svc);
        let poller = poller.clone();
        polls.spawn(async move {
            let result = poller.poll_until_done(svc.as_ref(), &id).await;
            (id, tier, result)
        });
    }

    let mut jobs = Vec::new();
    while let Some(joined) = polls.join_next().await {
        let (id, tier, result) = joined?;
        let state = match result {
            Ok(PollOutcome::Completed(_)) => FinalState::Completed,
            Ok(PollOutcome::Cancelled(_)) => FinalState::Cancelled,
            Ok(PollOutcome::RetriesExhausted { .. }) => FinalState::GaveUp,
            Err(ServiceError::PermanentFailure(_)) => FinalState::PermanentlyFailed,
            Err(e) => FinalState::Error(e.to_string()),
        };
        progress.job_settled(&id, &state);
        jobs.push(JobReport { id, tier, state });
    }

    // The receiver may already be gone if the worker stopped on its own.
    let _ = stop_tx.send(());
    let (dispatched, worker_failures) = worker.await?;

    let groups = svc.list_categorized(Utc::now());
    let cleaned_up = svc.cleanup();
    progress.finish();

    Ok(SessionReport {
        rejected,
        dispatched,
        worker_failures,
        jobs,
        groups,
        cleaned_up,
    })
}

async fn worker_loop(svc: Arc<JobService>, plan: SessionPlan, mut stop: oneshot::Receiver<()>) -> (usize, usize) {
    let mut rng = StdRng::seed_from_u64(plan.seed);
    let mut ticker = tokio::time::interval(plan.tick);
    let mut dispatched = 0;
    let mut failures = 0;

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }
        let now = Utc::now();

        while svc.dispatch_tick(now).is_some() {
            dispatched += 1;
        }

        if plan.worker_failure_rate > 0.0 && rng.random_bool(plan.worker_failure_rate) {
            let running: Vec<JobId> = svc
                .list_categorized(now)
                .into_iter()
                .filter(|group| group.status == JobStatus::Pending)
                .flat_map(|group| group.jobs.into_iter().map(|job| job.id))
                .collect();
            if running.is_empty() {
                continue;
            }
            let victim = &running[rng.random_range(0..running.len())];
            let kind = FaultKind::ALL[rng.random_range(0..FaultKind::ALL.len())];
            match svc.record_failure(victim, kind, now) {
                Ok(()) => failures += 1,
                Err(e) => warn!(job_id = %victim, error = %e, "worker could not record failure"),
            }
        }
    }

    (dispatched, failures)
}
