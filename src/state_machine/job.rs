use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fault::FaultKind;

/// Opaque, immutable job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Submission class. Decides priority and processing speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Premium,
}

impl Tier {
    pub fn priority(self) -> Priority {
        match self {
            Tier::Free => Priority::FREE,
            Tier::Premium => Priority::PREMIUM,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Premium => write!(f, "premium"),
        }
    }
}

/// Dispatch priority. Higher values are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(pub u8);

impl Priority {
    pub const FREE: Priority = Priority(0);
    pub const PREMIUM: Priority = Priority(10);
}

/// Lifecycle status of a job. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Failed,
    Completed,
    PermanentlyFailed,
    Cancelled,
}

impl JobStatus {
    /// Terminal jobs never change status again (cleanup only removes them).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::PermanentlyFailed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::PermanentlyFailed => write!(f, "permanently_failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single job tracked by the store.
///
/// `processing_duration_ms` and `max_retries` are captured from the live
/// configuration at creation, so later configuration edits only affect new
/// jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub tier: Tier,
    pub priority: Priority,
    pub status: JobStatus,
    /// Store insertion order, used to keep FIFO order stable for equal timestamps.
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub processing_duration_ms: u64,
    pub progress: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_failure: Option<FaultKind>,
    pub cancellation_reason: Option<String>,
}

impl Job {
    pub fn new(
        id: JobId,
        tier: Tier,
        seq: u64,
        now: DateTime<Utc>,
        processing_duration_ms: u64,
        max_retries: u32,
    ) -> Self {
        Self {
            id,
            tier,
            priority: tier.priority(),
            status: JobStatus::Pending,
            seq,
            created_at: now,
            last_retry_at: None,
            updated_at: now,
            processing_duration_ms,
            progress: 0,
            retry_count: 0,
            max_retries,
            last_failure: None,
            cancellation_reason: None,
        }
    }

    /// The instant elapsed processing time is measured from.
    pub fn anchor(&self) -> DateTime<Utc> {
        self.last_retry_at.unwrap_or(self.created_at)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
