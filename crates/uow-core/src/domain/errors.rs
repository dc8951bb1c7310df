//! Errors and their classification.
//!
//! - Validation: bad input, fix the call before retrying
//! - Lease: expected races between workers, recoverable
//! - Invariant: corrupted store data, surfaced and never repaired
//! - Schedule: `yield` on a task without a recurrence expression, or a
//!   lease requested before the task is due

use thiserror::Error;

use super::ids::TaskId;
use super::task::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("RequesterIdMissing: a requester id is required")]
    RequesterIdMissing,

    #[error("TaskNotFound: {0}")]
    TaskNotFound(TaskId),

    #[error("TaskIdNotProvided: the task has not been assigned an id")]
    TaskIdNotProvided,

    #[error("InvalidTaskObject: {0}")]
    InvalidTaskObject(&'static str),

    #[error("TaskNotPersisted: the task must be stored before it can be announced")]
    TaskNotPersisted,

    #[error("TaskTypeMissing: the task has no name")]
    TaskTypeMissing,

    #[error("InvalidId: {0}")]
    InvalidId(String),

    #[error("InvalidSchedule: {0}")]
    InvalidSchedule(String),

    #[error("InvalidPriority: {0}")]
    InvalidPriority(String),

    #[error("InvalidBackoffAlgorithm: {0}")]
    InvalidBackoff(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LeaseError {
    #[error("AlreadyLocked: the task is leased by another requester")]
    AlreadyLocked,

    #[error("NotLocked: the task holds no lease")]
    NotLocked,

    #[error("KeyInvalid: the requester does not hold the lease")]
    KeyInvalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("lease on {0} has no ttl")]
    LeaseWithoutTtl(String),

    #[error("stored record for {0} does not match its key")]
    RecordMismatch(TaskId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("TaskNotScheduled: {0} has no recurrence expression")]
    TaskNotScheduled(TaskId),

    #[error("NotDue: {task_id} may not run before {after}")]
    NotDue { task_id: TaskId, after: i64 },
}

#[derive(Debug, Error)]
pub enum UowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("cannot {operation} task {task_id} in status {from}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        operation: &'static str,
    },

    #[error("task {0} was modified concurrently")]
    Conflict(TaskId),

    #[error("task codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),
}

impl UowError {
    /// True for the outcome of losing a lease race. Workers treat this as
    /// "someone else got it", not as a failure.
    pub fn is_lease_contention(&self) -> bool {
        matches!(self, UowError::Lease(LeaseError::AlreadyLocked))
    }

    pub fn lease_error(&self) -> Option<LeaseError> {
        match self {
            UowError::Lease(e) => Some(*e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, UowError>;
