//! Lifecycle notifications published by the orchestrator.

use super::ids::TaskId;
use super::task::{Task, TaskType};

/// A lifecycle event. Every variant except `Ready` carries the task as it
/// was persisted by the write that triggered it.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// The task is eligible for processing. Intentionally payload-light:
    /// consumers re-fetch current state instead of trusting a snapshot.
    Ready { task_type: TaskType, task_id: TaskId },
    Locked(Task),
    Unlocked(Task),
    Finished(Task),
    Failed(Task),
    Cancelled(Task),
    Progress(Task),
}

impl TaskEvent {
    /// Event name, e.g. for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Ready { .. } => "ready",
            TaskEvent::Locked(_) => "locked",
            TaskEvent::Unlocked(_) => "unlocked",
            TaskEvent::Finished(_) => "finished",
            TaskEvent::Failed(_) => "failed",
            TaskEvent::Cancelled(_) => "cancelled",
            TaskEvent::Progress(_) => "progress",
        }
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            TaskEvent::Ready { task_id, .. } => Some(*task_id),
            TaskEvent::Locked(t)
            | TaskEvent::Unlocked(t)
            | TaskEvent::Finished(t)
            | TaskEvent::Failed(t)
            | TaskEvent::Cancelled(t)
            | TaskEvent::Progress(t) => t.id(),
        }
    }
}
