mod job;
mod lifecycle;

pub use job::{Job, JobId, JobStatus, Priority, Tier};
pub use lifecycle::{StateMachine, Transition, progress_at};
