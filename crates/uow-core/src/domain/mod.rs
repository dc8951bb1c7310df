//! Domain model: task entity, lease protocol, schedules, events, errors.

pub mod errors;
pub mod events;
pub mod ids;
pub mod lease;
pub mod lease_manager;
pub mod policy;
pub mod schedule;
pub mod task;

pub use self::errors::{
    InvariantError, LeaseError, Result, ScheduleError, UowError, ValidationError,
};
pub use self::events::TaskEvent;
pub use self::ids::{TaskId, WorkerId};
pub use self::lease::{Lease, LeaseKey};
pub use self::lease_manager::{Acquisition, DEFAULT_TTL_MS};
pub use self::policy::{Backoff, Priority};
pub use self::schedule::Schedule;
pub use self::task::{Attempts, DEFAULT_MAX_ATTEMPTS, Task, TaskStatus, TaskType};
