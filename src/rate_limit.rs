//! Per-identity submission limiter for the free tier.
//!
//! Every call counts, including rejected ones, so hammering the limit does
//! not let an identity recover. Premium submissions bypass the check and are
//! not counted.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::ServiceError;
use crate::state_machine::Tier;

/// How long a counter lives before it resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPolicy {
    /// Never resets.
    Lifetime,
    /// Resets once `window` has elapsed since the window opened.
    FixedWindow(Duration),
}

impl RateLimitPolicy {
    /// Fails when the window does not fit in a `chrono::Duration`.
    pub fn from_window_secs(window_secs: Option<u64>) -> Result<Self, ServiceError> {
        let Some(secs) = window_secs else {
            return Ok(RateLimitPolicy::Lifetime);
        };
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .map(RateLimitPolicy::FixedWindow)
            .ok_or_else(|| {
                ServiceError::InvalidConfig(format!("rate_limit_window_secs {secs} is out of range"))
            })
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u32,
    window_start: DateTime<Utc>,
}

#[derive(Default)]
pub struct RateLimiter {
    counters: DashMap<String, Counter>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count this call and report whether it is within `ceiling`.
    ///
    /// The counter update is atomic per identity (the entry lock is held for
    /// the whole read-modify-write).
    pub fn allow(
        &self,
        identity: &str,
        tier: Tier,
        now: DateTime<Utc>,
        ceiling: u32,
        policy: RateLimitPolicy,
    ) -> bool {
        if tier == Tier::Premium {
            return true;
        }

        let mut counter = self.counters.entry(identity.to_string()).or_insert(Counter {
            count: 0,
            window_start: now,
        });
        if let RateLimitPolicy::FixedWindow(window) = policy
            && now - counter.window_start >= window
        {
            counter.count = 0;
            counter.window_start = now;
        }
        counter.count = counter.count.saturating_add(1);
        counter.count <= ceiling
    }

    /// Submissions counted for `identity` in its current window.
    pub fn count(&self, identity: &str) -> u32 {
        self.counters.get(identity).map(|c| c.count).unwrap_or(0)
    }
}
