//! Task entity and its lifecycle state machine.
//!
//! State transitions:
//! - New -> Ready (store, once `after` has elapsed)
//! - New/Ready/Locked(expired) -> Locked (lease acquired, once `after` is due)
//! - Locked -> Success | Failed | Cancelled
//! - Locked -> Ready (recurring completion, yield, explicit unlock)
//!
//! Every transition out of `Locked` re-validates lease ownership first and
//! leaves the task untouched when the caller is not the holder.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::{Result, ScheduleError, UowError, ValidationError};
use super::ids::TaskId;
use super::lease::Lease;
use super::lease_manager::{self, Acquisition};
use super::policy::{Backoff, Priority};
use super::schedule::Schedule;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;

/// Routing key workers filter on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, not yet eligible (or not yet noticed by the store).
    New,

    /// Eligible to be leased.
    Ready,

    /// A worker holds (or held, if expired) the lease.
    Locked,

    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::New => "NEW",
            TaskStatus::Ready => "READY",
            TaskStatus::Locked => "LOCKED",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempts {
    pub failed: u32,
    pub cancelled: u32,
    pub timed_out: u32,
    pub total: u32,
    pub max: u32,

    /// Lease acquisitions since the task last became due. Reset whenever a
    /// recurring task is rescheduled.
    #[serde(default)]
    pub run: u32,
}

impl Default for Attempts {
    fn default() -> Self {
        Self {
            failed: 0,
            cancelled: 0,
            timed_out: 0,
            total: 0,
            max: DEFAULT_MAX_ATTEMPTS,
            run: 0,
        }
    }
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: Option<TaskId>,
    pub name: TaskType,
    status: TaskStatus,
    pub data: serde_json::Value,

    /// Epoch milliseconds before which the task must not run.
    after: i64,

    /// Milliseconds added to scheduling and backoff calculations.
    pub delay: u64,
    pub priority: Priority,
    attempts: Attempts,
    pub backoff: Backoff,
    schedule: Option<Schedule>,
    lease: Option<Lease>,
    progress: Option<serde_json::Value>,
    response: Vec<serde_json::Value>,

    /// Store-managed version, bumped on every write.
    #[serde(default)]
    revision: u64,

    /// Whether `after` was set explicitly before submission.
    #[serde(skip)]
    after_pinned: bool,
}

impl Task {
    pub fn new(name: impl Into<TaskType>) -> Self {
        Self {
            id: None,
            name: name.into(),
            status: TaskStatus::New,
            data: serde_json::Value::Object(Default::default()),
            after: 0,
            delay: 0,
            priority: Priority::NORMAL,
            attempts: Attempts::default(),
            backoff: Backoff::default(),
            schedule: None,
            lease: None,
            progress: None,
            response: Vec::new(),
            revision: 0,
            after_pinned: false,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Pin the earliest run time instead of deriving it at submission.
    pub fn with_after(mut self, after_ms: i64) -> Self {
        self.after = after_ms;
        self.after_pinned = true;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = delay_ms;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.attempts.max = max;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn id(&self) -> Option<TaskId> {
        self.id
    }

    /// The id, or `TaskIdNotProvided` for a task that was never stored.
    pub fn require_id(&self) -> Result<TaskId> {
        self.id.ok_or_else(|| ValidationError::TaskIdNotProvided.into())
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn after(&self) -> i64 {
        self.after
    }

    pub fn attempts(&self) -> &Attempts {
        &self.attempts
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn progress(&self) -> Option<&serde_json::Value> {
        self.progress.as_ref()
    }

    pub fn response(&self) -> &[serde_json::Value] {
        &self.response
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// More lease acquisitions in the current run than `attempts.max`
    /// allows. Detection only: enforcement belongs to whoever drives retries.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts.run > self.attempts.max
    }

    // ------------------------------------------------------------------
    // Store hooks
    // ------------------------------------------------------------------

    /// Assign the store id. An id can be assigned exactly once.
    pub fn assign_id(&mut self, id: TaskId) -> Result<()> {
        if self.id.is_some() {
            return Err(ValidationError::InvalidTaskObject("task already has an id").into());
        }
        self.id = Some(id);
        Ok(())
    }

    /// Bump the optimistic-concurrency revision after a successful write.
    pub fn bump_revision(&mut self) {
        self.revision += 1;
    }

    /// Resolve `after` at submission time: a pinned value, else the next
    /// recurrence when a schedule is set, else `now`. `delay` is added on top.
    pub fn resolve_after(&mut self, now_ms: i64) {
        let base = match &self.schedule {
            _ if self.after_pinned => self.after,
            Some(schedule) => schedule.next_after(now_ms),
            None => now_ms,
        };
        self.after = self.delayed(base);
    }

    /// Eligible for a ready notification: not terminal, `after` elapsed,
    /// and no live lease.
    pub fn is_ready_at(&self, now_ms: i64) -> Result<bool> {
        if self.status.is_terminal() || self.after > now_ms {
            return Ok(false);
        }
        Ok(!lease_manager::is_locked(self, now_ms)?)
    }

    /// New -> Ready. Other statuses are left alone.
    pub fn promote(&mut self) -> bool {
        if self.status == TaskStatus::New {
            self.status = TaskStatus::Ready;
            return true;
        }
        false
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// New/Ready/expired-Locked -> Locked once `after` has elapsed. A holder
    /// calling this again renews its lease.
    pub fn lock(&mut self, requester_id: &str, ttl_ms: u64, now_ms: i64) -> Result<Acquisition> {
        let task_id = self.require_id()?;
        if self.status.is_terminal() {
            return Err(UowError::InvalidTransition {
                task_id,
                from: self.status,
                operation: "lock",
            });
        }
        if self.after > now_ms && !self.holds_live_lease(requester_id, now_ms)? {
            return Err(ScheduleError::NotDue {
                task_id,
                after: self.after,
            }
            .into());
        }

        let acquisition = lease_manager::acquire(ttl_ms, requester_id, self, now_ms)?;
        match acquisition {
            Acquisition::Fresh => {
                self.attempts.total += 1;
                self.attempts.run += 1;
            }
            Acquisition::Reclaimed => {
                self.attempts.total += 1;
                self.attempts.run += 1;
                self.attempts.timed_out += 1;
            }
            Acquisition::Renewed => {}
        }
        self.status = TaskStatus::Locked;
        Ok(acquisition)
    }

    /// Locked -> Ready without recording an outcome. Returns `false`, and
    /// changes nothing, when the task is not locked at all.
    pub fn unlock(&mut self, requester_id: &str) -> Result<bool> {
        if self.lease.is_none() && self.status != TaskStatus::Locked {
            return Ok(false);
        }
        self.ensure_held(requester_id, "unlock")?;
        lease_manager::release(requester_id, self)?;
        self.status = TaskStatus::Ready;
        Ok(true)
    }

    /// Locked -> Success, or Locked -> Ready at the next recurrence.
    pub(crate) fn complete(
        &mut self,
        requester_id: &str,
        response: serde_json::Value,
        now_ms: i64,
    ) -> Result<()> {
        self.ensure_held(requester_id, "complete")?;
        let next = self
            .schedule
            .as_ref()
            .map(|s| self.delayed(s.next_after(now_ms)));
        lease_manager::release(requester_id, self)?;
        self.response.push(response);
        match next {
            Some(after) => {
                self.after = after;
                self.attempts.run = 0;
                self.status = TaskStatus::Ready;
            }
            None => self.status = TaskStatus::Success,
        }
        Ok(())
    }

    pub(crate) fn fail(&mut self, requester_id: &str, response: serde_json::Value) -> Result<()> {
        self.ensure_held(requester_id, "fail")?;
        lease_manager::release(requester_id, self)?;
        self.attempts.failed += 1;
        self.attempts.total += 1;
        self.response.push(response);
        self.status = TaskStatus::Failed;
        Ok(())
    }

    pub(crate) fn cancel(&mut self, requester_id: &str, response: serde_json::Value) -> Result<()> {
        self.ensure_held(requester_id, "cancel")?;
        lease_manager::release(requester_id, self)?;
        self.attempts.cancelled += 1;
        self.response.push(response);
        self.status = TaskStatus::Cancelled;
        Ok(())
    }

    /// Heartbeat: records progress and renews the lease.
    pub(crate) fn report_progress(
        &mut self,
        requester_id: &str,
        progress: serde_json::Value,
        now_ms: i64,
    ) -> Result<()> {
        self.ensure_held(requester_id, "progress")?;
        lease_manager::renew(requester_id, self, now_ms)?;
        self.progress = Some(progress);
        Ok(())
    }

    /// Locked -> Ready at the next recurrence. Only valid for scheduled tasks.
    pub(crate) fn yield_to_schedule(
        &mut self,
        requester_id: &str,
        response: Option<serde_json::Value>,
        now_ms: i64,
    ) -> Result<()> {
        self.ensure_held(requester_id, "yield")?;
        let task_id = self.require_id()?;
        let Some(schedule) = &self.schedule else {
            return Err(ScheduleError::TaskNotScheduled(task_id).into());
        };
        let next = self.delayed(schedule.next_after(now_ms));
        lease_manager::release(requester_id, self)?;
        if let Some(response) = response {
            self.response.push(response);
        }
        self.after = next;
        self.attempts.run = 0;
        self.status = TaskStatus::Ready;
        Ok(())
    }

    /// Replace the payload. Only while nobody holds the task.
    pub(crate) fn replace_data(&mut self, data: serde_json::Value, now_ms: i64) -> Result<()> {
        let task_id = self.require_id()?;
        if self.status.is_terminal() || lease_manager::is_locked(self, now_ms)? {
            return Err(UowError::InvalidTransition {
                task_id,
                from: self.status,
                operation: "update",
            });
        }
        self.data = data;
        Ok(())
    }

    fn delayed(&self, at_ms: i64) -> i64 {
        at_ms.saturating_add(i64::try_from(self.delay).unwrap_or(i64::MAX))
    }

    fn holds_live_lease(&self, requester_id: &str, now_ms: i64) -> Result<bool> {
        if self.lease.is_none() {
            return Ok(false);
        }
        Ok(lease_manager::is_holder(self, requester_id)? && lease_manager::is_locked(self, now_ms)?)
    }

    fn ensure_held(&self, requester_id: &str, operation: &'static str) -> Result<()> {
        if !lease_manager::is_holder(self, requester_id)? {
            return Err(super::errors::LeaseError::KeyInvalid.into());
        }
        if self.status != TaskStatus::Locked {
            return Err(UowError::InvalidTransition {
                task_id: self.require_id()?,
                from: self.status,
                operation,
            });
        }
        Ok(())
    }

    pub(crate) fn lease_mut(&mut self) -> &mut Option<Lease> {
        &mut self.lease
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::LeaseError;
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    const NOW: i64 = 1_700_000_000_000;

    fn stored(name: &str) -> Task {
        let mut task = Task::new(name);
        task.assign_id(TaskId::from_ulid(Ulid::new())).unwrap();
        task.resolve_after(NOW);
        task
    }

    fn locked_by(requester: &str) -> Task {
        let mut task = stored("email");
        task.lock(requester, 30_000, NOW).unwrap();
        task
    }

    #[test]
    fn new_task_has_defaults() {
        let task = Task::new("email");
        assert_eq!(task.status(), TaskStatus::New);
        assert_eq!(task.id(), None);
        assert_eq!(task.priority, Priority::NORMAL);
        assert_eq!(task.attempts().max, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(task.backoff, Backoff::Fixed);
        assert!(task.lease().is_none());
    }

    #[test]
    fn id_is_assigned_once() {
        let mut task = stored("email");
        let err = task.assign_id(TaskId::from_ulid(Ulid::new())).unwrap_err();
        assert!(matches!(
            err,
            UowError::Validation(ValidationError::InvalidTaskObject(_))
        ));
    }

    #[test]
    fn after_defaults_to_now() {
        let task = stored("email");
        assert_eq!(task.after(), NOW);
    }

    #[test]
    fn after_defaults_to_next_recurrence_when_scheduled() {
        let mut task = Task::new("report").with_schedule(Schedule::parse("every 1 day").unwrap());
        task.resolve_after(NOW);
        assert!(task.after() > NOW);
        assert_eq!(task.after() % 86_400_000, 0);
    }

    #[test]
    fn pinned_after_is_kept() {
        let mut task = Task::new("email").with_after(42);
        task.resolve_after(NOW);
        assert_eq!(task.after(), 42);
    }

    #[rstest]
    #[case::unscheduled(Task::new("email"), NOW)]
    #[case::pinned(Task::new("email").with_after(NOW + 60_000), NOW + 60_000)]
    fn delay_pushes_the_first_run(#[case] task: Task, #[case] base: i64) {
        let mut task = task.with_delay(5_000);
        task.resolve_after(NOW);
        assert_eq!(task.after(), base + 5_000);
    }

    #[test]
    fn delay_is_added_to_each_recurrence() {
        let schedule = Schedule::parse("every 5 minutes").unwrap();
        let mut task = stored("report").with_schedule(schedule.clone()).with_delay(2_000);
        task.lock("w1", 30_000, NOW).unwrap();
        task.complete("w1", json!("done"), NOW + 1).unwrap();
        assert_eq!(task.after(), schedule.next_after(NOW + 1) + 2_000);

        let due = task.after();
        task.lock("w1", 30_000, due).unwrap();
        task.yield_to_schedule("w1", None, due).unwrap();
        assert_eq!(task.after(), schedule.next_after(due) + 2_000);
    }

    #[test]
    fn lock_before_after_is_refused() {
        let mut task = stored("email").with_after(NOW + 1_000);
        let err = task.lock("w1", 30_000, NOW).unwrap_err();
        assert!(matches!(
            err,
            UowError::Schedule(ScheduleError::NotDue { after, .. }) if after == NOW + 1_000
        ));
        assert_eq!(task.status(), TaskStatus::New);
        assert!(task.lease().is_none());
        assert_eq!(task.attempts().total, 0);

        assert_eq!(task.lock("w1", 30_000, NOW + 1_000).unwrap(), Acquisition::Fresh);
    }

    #[test]
    fn rescheduled_task_waits_for_its_next_run() {
        let mut task = stored("report").with_schedule(Schedule::parse("every 5 minutes").unwrap());
        task.lock("w1", 30_000, NOW).unwrap();
        task.complete("w1", json!("done"), NOW + 1).unwrap();

        let err = task.lock("w1", 30_000, NOW + 2).unwrap_err();
        assert!(matches!(err, UowError::Schedule(ScheduleError::NotDue { .. })));
        task.lock("w1", 30_000, task.after()).unwrap();
    }

    #[test]
    fn attempt_limit_is_scoped_to_one_run() {
        let mut task = stored("report").with_schedule(Schedule::parse("every 5 minutes").unwrap());
        for _ in 0..3 {
            let due = task.after();
            task.lock("w1", 30_000, due).unwrap();
            assert!(!task.attempts_exhausted());
            task.complete("w1", json!("done"), due).unwrap();
        }
        assert_eq!(task.attempts().total, 3);
        assert_eq!(task.attempts().run, 0);
    }

    #[test]
    fn lock_counts_fresh_acquisitions_only() {
        let mut task = stored("email");
        assert_eq!(task.lock("w1", 30_000, NOW).unwrap(), Acquisition::Fresh);
        assert_eq!(task.lock("w1", 30_000, NOW + 10).unwrap(), Acquisition::Renewed);
        assert_eq!(task.attempts().total, 1);
        assert_eq!(task.status(), TaskStatus::Locked);
    }

    #[test]
    fn reclaiming_an_expired_lease_counts_a_timeout() {
        let mut task = locked_by("w1");
        let acquisition = task.lock("w2", 30_000, NOW + 30_000).unwrap();
        assert_eq!(acquisition, Acquisition::Reclaimed);
        assert_eq!(task.attempts().timed_out, 1);
        assert_eq!(task.attempts().total, 2);
    }

    #[test]
    fn exceeding_max_attempts_is_detected() {
        let mut task = locked_by("w1");
        assert!(!task.attempts_exhausted());
        task.lock("w2", 30_000, NOW + 30_000).unwrap();
        assert!(task.attempts_exhausted());
    }

    #[rstest]
    #[case::success(TaskStatus::Success)]
    #[case::failed(TaskStatus::Failed)]
    #[case::cancelled(TaskStatus::Cancelled)]
    fn terminal_tasks_cannot_be_locked(#[case] status: TaskStatus) {
        let mut task = stored("email");
        task.status = status;
        let err = task.lock("w1", 30_000, NOW).unwrap_err();
        assert!(matches!(err, UowError::InvalidTransition { operation: "lock", .. }));
    }

    #[test]
    fn complete_releases_and_records_response() {
        let mut task = locked_by("w1");
        task.complete("w1", json!({"sent": true}), NOW + 5).unwrap();
        assert_eq!(task.status(), TaskStatus::Success);
        assert_eq!(task.response(), &[json!({"sent": true})]);
        assert!(task.lease().is_none());
    }

    #[test]
    fn complete_on_scheduled_task_returns_to_ready() {
        let mut task = stored("report").with_schedule(Schedule::parse("every 5 minutes").unwrap());
        task.lock("w1", 30_000, NOW).unwrap();
        task.complete("w1", json!("done"), NOW + 1).unwrap();
        assert_eq!(task.status(), TaskStatus::Ready);
        assert!(task.after() > NOW + 1);
        assert!(task.lease().is_none());
    }

    #[test]
    fn non_holder_cannot_complete_and_task_is_untouched() {
        let mut task = locked_by("w1");
        let before = task.clone();
        let err = task.complete("w2", json!(null), NOW).unwrap_err();
        assert_eq!(err.lease_error(), Some(LeaseError::KeyInvalid));
        assert_eq!(task, before);
    }

    #[test]
    fn completing_an_unleased_task_reports_not_locked() {
        let mut task = stored("email");
        let err = task.complete("w1", json!(null), NOW).unwrap_err();
        assert_eq!(err.lease_error(), Some(LeaseError::NotLocked));
    }

    #[test]
    fn fail_increments_failed_and_total() {
        let mut task = locked_by("w1");
        task.fail("w1", json!({"error": "smtp"})).unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.attempts().failed, 1);
        assert_eq!(task.attempts().total, 2);
        assert!(task.lease().is_none());
    }

    #[test]
    fn cancel_is_distinct_from_success() {
        let mut task = locked_by("w1");
        task.cancel("w1", json!("stop")).unwrap();
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert_ne!(TaskStatus::Cancelled, TaskStatus::Success);
        assert_eq!(task.attempts().cancelled, 1);
    }

    #[test]
    fn progress_overwrites_and_renews() {
        let mut task = locked_by("w1");
        task.report_progress("w1", json!({"pct": 10}), NOW + 100).unwrap();
        task.report_progress("w1", json!({"pct": 50}), NOW + 200).unwrap();
        assert_eq!(task.progress(), Some(&json!({"pct": 50})));
        assert_eq!(task.lease().unwrap().time, NOW + 200);
        assert_eq!(task.status(), TaskStatus::Locked);
    }

    #[test]
    fn yield_requires_a_schedule() {
        let mut task = locked_by("w1");
        let err = task.yield_to_schedule("w1", None, NOW).unwrap_err();
        assert!(matches!(err, UowError::Schedule(ScheduleError::TaskNotScheduled(_))));
        assert!(task.lease().is_some());
    }

    #[test]
    fn unlock_returns_to_ready() {
        let mut task = locked_by("w1");
        assert!(task.unlock("w1").unwrap());
        assert_eq!(task.status(), TaskStatus::Ready);
        assert!(task.lease().is_none());
        assert!(task.response().is_empty());
    }

    #[test]
    fn unlocking_an_unlocked_task_changes_nothing() {
        let mut task = locked_by("w1");
        task.unlock("w1").unwrap();
        let before = task.clone();
        assert!(!task.unlock("w1").unwrap());
        assert!(!task.unlock("someone-else").unwrap());
        assert_eq!(task, before);
    }

    #[test]
    fn ready_check_respects_after_and_lease() {
        let mut task = stored("email").with_after(NOW + 1_000);
        assert!(!task.is_ready_at(NOW).unwrap());
        assert!(task.is_ready_at(NOW + 1_000).unwrap());

        task.lock("w1", 500, NOW + 1_000).unwrap();
        assert!(!task.is_ready_at(NOW + 1_200).unwrap());
        assert!(task.is_ready_at(NOW + 1_500).unwrap());
    }

    #[test]
    fn data_cannot_be_replaced_while_locked() {
        let mut task = locked_by("w1");
        assert!(task.replace_data(json!({"to": "y"}), NOW).is_err());
        task.unlock("w1").unwrap();
        task.replace_data(json!({"to": "y"}), NOW).unwrap();
        assert_eq!(task.data, json!({"to": "y"}));
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let s = serde_json::to_string(&TaskStatus::Cancelled).unwrap();
        assert_eq!(s, "\"CANCELLED\"");
    }
}
