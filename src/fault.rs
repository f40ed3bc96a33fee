//! Fault injection: simulated unreliability of the upstream that reports job status.
//!
//! The policy is a trait so the service can be driven by a seeded random
//! source in production and by a scripted fake in tests.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::state_machine::Job;

/// The kind of simulated upstream fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Timeout,
    InternalError,
    Unknown,
}

impl FaultKind {
    pub const ALL: [FaultKind; 3] = [FaultKind::Timeout, FaultKind::InternalError, FaultKind::Unknown];
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Timeout => write!(f, "request timed out"),
            FaultKind::InternalError => write!(f, "internal server error"),
            FaultKind::Unknown => write!(f, "an unknown error occurred"),
        }
    }
}

/// Decides whether an operation on `job` at `now` suffers a transient fault.
pub trait FaultPolicy: Send + Sync {
    fn inject(&self, job: &Job, now: DateTime<Utc>, config: &ServiceConfig) -> Option<FaultKind>;
}

/// Never injects a fault.
pub struct NoFaults;

impl FaultPolicy for NoFaults {
    fn inject(&self, _job: &Job, _now: DateTime<Utc>, _config: &ServiceConfig) -> Option<FaultKind> {
        None
    }
}

/// Injects a fault with probability `config.error_rate`, picking the kind uniformly.
pub struct RandomFaults {
    rng: Mutex<StdRng>,
}

impl RandomFaults {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }
}

impl FaultPolicy for RandomFaults {
    fn inject(&self, _job: &Job, _now: DateTime<Utc>, config: &ServiceConfig) -> Option<FaultKind> {
        let mut rng = self.rng.lock();
        if rng.random_bool(config.error_rate) {
            Some(FaultKind::ALL[rng.random_range(0..FaultKind::ALL.len())])
        } else {
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use super::*;

    /// Replays a fixed script of outcomes, then reports no faults.
    pub struct ScriptedFaults {
        script: Mutex<VecDeque<Option<FaultKind>>>,
    }

    impl ScriptedFaults {
        pub fn new(script: impl IntoIterator<Item = Option<FaultKind>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
            }
        }
    }

    impl FaultPolicy for ScriptedFaults {
        fn inject(&self, _job: &Job, _now: DateTime<Utc>, _config: &ServiceConfig) -> Option<FaultKind> {
            self.script.lock().pop_front().flatten()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{JobId, Tier};

    fn job() -> Job {
        Job::new(JobId::from("j"), Tier::Free, 0, Utc::now(), 1_000, 3)
    }

    fn config(error_rate: f64) -> ServiceConfig {
        ServiceConfig {
            error_rate,
            ..Default::default()
        }
    }

    #[test]
    fn zero_rate_never_faults() {
        let policy = RandomFaults::from_seed(7);
        let job = job();
        assert!((0..500).all(|_| policy.inject(&job, Utc::now(), &config(0.0)).is_none()));
    }

    #[test]
    fn full_rate_always_faults() {
        let policy = RandomFaults::from_seed(7);
        let job = job();
        assert!((0..500).all(|_| policy.inject(&job, Utc::now(), &config(1.0)).is_some()));
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = RandomFaults::from_seed(42);
        let b = RandomFaults::from_seed(42);
        let job = job();
        let now = Utc::now();
        let cfg = config(0.5);
        let run_a: Vec<_> = (0..50).map(|_| a.inject(&job, now, &cfg)).collect();
        let run_b: Vec<_> = (0..50).map(|_| b.inject(&job, now, &cfg)).collect();
        assert_eq!(run_a, run_b);
    }

    #[test]
    fn fault_kind_display() {
        assert_eq!(FaultKind::Timeout.to_string(), "request timed out");
        assert_eq!(FaultKind::InternalError.to_string(), "internal server error");
    }
}
