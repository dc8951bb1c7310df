use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rstest::rstest;
use serde_json::json;
use tokio::sync::broadcast;

use uow_core::app::EventBus;
use uow_core::domain::Acquisition;
use uow_core::impls::InMemoryTaskStore;
use uow_core::ports::{Clock, ManualClock, TaskStore};
use uow_core::{
    LeaseError, Orchestrator, QueueBuilder, Result, Schedule, Task, TaskEvent, TaskStatus,
    WorkerContext, WorkerHandler,
};

const DAY_MS: i64 = 86_400_000;

struct Harness {
    clock: Arc<ManualClock>,
    orchestrator: Orchestrator,
    events: broadcast::Receiver<TaskEvent>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 6, 9, 15, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryTaskStore::new(clock.clone()));
        let orchestrator = Orchestrator::new(store, clock.clone(), EventBus::new(128), 30_000);
        let events = orchestrator.subscribe();
        Self {
            clock,
            orchestrator,
            events,
        }
    }

    fn next_event(&mut self) -> TaskEvent {
        self.events.try_recv().expect("an event was published")
    }

    fn no_more_events(&mut self) {
        assert!(matches!(
            self.events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}

#[tokio::test]
async fn email_is_sent_exactly_once() {
    let mut h = Harness::new();
    let task = h
        .orchestrator
        .submit(Task::new("email").with_data(json!({"to": "a@example.com"})))
        .await
        .unwrap();
    let id = task.require_id().unwrap();

    match h.next_event() {
        TaskEvent::Ready { task_type, task_id } => {
            assert_eq!(task_type.as_str(), "email");
            assert_eq!(task_id, id);
        }
        other => panic!("expected ready, got {}", other.name()),
    }

    let locked = h.orchestrator.lock("worker-a", id).await.unwrap();
    assert_eq!(locked.status(), TaskStatus::Locked);
    assert_eq!(h.next_event().name(), "locked");

    let err = h.orchestrator.lock("worker-b", id).await.unwrap_err();
    assert_eq!(err.lease_error(), Some(LeaseError::AlreadyLocked));
    h.no_more_events();

    let done = h
        .orchestrator
        .complete("worker-a", id, json!({"sent": true}))
        .await
        .unwrap();
    assert_eq!(done.status(), TaskStatus::Success);
    assert_eq!(done.response(), &[json!({"sent": true})]);
    assert!(done.lease().is_none());

    match h.next_event() {
        TaskEvent::Finished(task) => assert_eq!(task.status(), TaskStatus::Success),
        other => panic!("expected finished, got {}", other.name()),
    }
}

#[tokio::test]
async fn daily_report_yields_until_tomorrow() {
    let mut h = Harness::new();
    let schedule = Schedule::parse("every 1 day").unwrap();
    let task = h
        .orchestrator
        .submit(Task::new("report").with_schedule(schedule))
        .await
        .unwrap();
    let id = task.require_id().unwrap();

    // 最初の実行は翌日 0 時
    let first_run = task.after();
    assert!(first_run > h.clock.now_ms());
    assert_eq!(first_run.rem_euclid(DAY_MS), 0);
    h.no_more_events();
    assert_eq!(h.orchestrator.notify_ready_tasks().await.unwrap(), 0);

    h.clock.advance_ms(first_run - h.clock.now_ms());
    assert_eq!(h.orchestrator.notify_ready_tasks().await.unwrap(), 1);
    assert_eq!(h.next_event().name(), "ready");

    h.orchestrator.lock("worker-a", id).await.unwrap();
    h.clock.advance_ms(5 * 60 * 1_000);
    let yielded_at = h.clock.now_ms();
    let task = h
        .orchestrator
        .yield_task("worker-a", id, Some(json!({"rows": 12})))
        .await
        .unwrap();

    assert_eq!(task.status(), TaskStatus::Ready);
    assert!(task.after() > yielded_at);
    assert_eq!(task.after(), first_run + DAY_MS);
    assert_eq!(task.response(), &[json!({"rows": 12})]);
    assert!(task.lease().is_none());

    assert_eq!(h.orchestrator.notify_ready_tasks().await.unwrap(), 0);
    h.clock.advance_ms(task.after() - h.clock.now_ms());
    assert_eq!(h.orchestrator.notify_ready_tasks().await.unwrap(), 1);
}

#[tokio::test]
async fn scheduled_completion_returns_to_ready() {
    let h = Harness::new();
    let task = Task::new("digest")
        .with_schedule(Schedule::parse("every 15 minutes").unwrap())
        .with_after(h.clock.now_ms());
    let id = h.orchestrator.submit(task).await.unwrap().require_id().unwrap();

    h.orchestrator.lock("worker-a", id).await.unwrap();
    let completed_at = h.clock.now_ms();
    let task = h
        .orchestrator
        .complete("worker-a", id, json!("ok"))
        .await
        .unwrap();

    assert_eq!(task.status(), TaskStatus::Ready);
    assert!(task.after() > completed_at);
    assert!(task.lease().is_none());
}

#[tokio::test]
async fn unscheduled_completion_is_never_offered_again() {
    let mut h = Harness::new();
    let id = h
        .orchestrator
        .submit(Task::new("email"))
        .await
        .unwrap()
        .require_id()
        .unwrap();
    h.orchestrator.lock("worker-a", id).await.unwrap();
    h.orchestrator
        .complete("worker-a", id, json!(null))
        .await
        .unwrap();
    while h.events.try_recv().is_ok() {}

    for _ in 0..3 {
        h.clock.advance_ms(DAY_MS);
        assert_eq!(h.orchestrator.notify_ready_tasks().await.unwrap(), 0);
    }
    h.no_more_events();

    let err = h.orchestrator.lock("worker-b", id).await.unwrap_err();
    assert!(matches!(err, uow_core::UowError::InvalidTransition { .. }));
}

#[rstest]
#[case::zero_ttl(0, 0, true)]
#[case::before_expiry(1_000, 999, false)]
#[case::at_expiry(1_000, 1_000, true)]
#[tokio::test]
async fn lease_is_exclusive_until_ttl(
    #[case] ttl_ms: u64,
    #[case] elapsed_ms: i64,
    #[case] other_wins: bool,
) {
    let h = Harness::new();
    let id = h
        .orchestrator
        .submit(Task::new("email"))
        .await
        .unwrap()
        .require_id()
        .unwrap();

    let task = h
        .orchestrator
        .lock_with_ttl("worker-a", id, ttl_ms)
        .await
        .unwrap();
    assert_eq!(task.lease().and_then(|l| l.ttl), Some(ttl_ms));

    h.clock.advance_ms(elapsed_ms);
    let result = h.orchestrator.lock("worker-b", id).await;
    assert_eq!(result.is_ok(), other_wins);

    if let Ok(task) = result {
        assert_eq!(task.attempts().timed_out, 1);
        assert_eq!(task.attempts().total, 2);

        // 元の保持者はもう完了できない
        let err = h
            .orchestrator
            .complete("worker-a", id, json!(null))
            .await
            .unwrap_err();
        assert_eq!(err.lease_error(), Some(LeaseError::KeyInvalid));
    }
}

#[tokio::test]
async fn holder_renews_and_non_holder_cannot_release() {
    let h = Harness::new();
    let id = h
        .orchestrator
        .submit(Task::new("email"))
        .await
        .unwrap()
        .require_id()
        .unwrap();

    h.orchestrator
        .lock_with_ttl("worker-a", id, 1_000)
        .await
        .unwrap();
    h.clock.advance_ms(800);
    let renewed = h
        .orchestrator
        .lock_with_ttl("worker-a", id, 1_000)
        .await
        .unwrap();
    assert_eq!(renewed.attempts().total, 1);
    assert_eq!(renewed.lease().unwrap().time, h.clock.now_ms());

    let err = h.orchestrator.unlock("worker-b", id).await.unwrap_err();
    assert_eq!(err.lease_error(), Some(LeaseError::KeyInvalid));
    let still = h.orchestrator.get_task(id).await.unwrap();
    assert_eq!(still.lease(), renewed.lease());

    let released = h.orchestrator.unlock("worker-a", id).await.unwrap();
    assert_eq!(released.status(), TaskStatus::Ready);
    assert!(released.lease().is_none());
}

#[tokio::test]
async fn failed_and_cancelled_are_distinct_outcomes() {
    let h = Harness::new();
    let a = h.orchestrator.submit(Task::new("a")).await.unwrap().require_id().unwrap();
    let b = h.orchestrator.submit(Task::new("b")).await.unwrap().require_id().unwrap();

    h.orchestrator.lock("w", a).await.unwrap();
    h.orchestrator.lock("w", b).await.unwrap();
    let failed = h.orchestrator.fail("w", a, json!({"error": "smtp"})).await.unwrap();
    let cancelled = h.orchestrator.cancel("w", b, json!("user")).await.unwrap();

    assert_eq!(failed.status(), TaskStatus::Failed);
    assert_eq!(failed.attempts().failed, 1);
    assert_eq!(cancelled.status(), TaskStatus::Cancelled);
    assert_eq!(cancelled.attempts().cancelled, 1);

    let counts = h.orchestrator.counts().await.unwrap();
    assert_eq!((counts.failed, counts.cancelled, counts.success), (1, 1, 0));
}

#[tokio::test]
async fn reclaim_is_reported_as_such() {
    let h = Harness::new();
    let store = InMemoryTaskStore::new(h.clock.clone());
    let id = store
        .create_task(Task::new("email"))
        .await
        .unwrap()
        .require_id()
        .unwrap();

    let (_, first) = store.lock_task("a", id, 10)
        .await
        .unwrap();
    h.clock.advance_ms(10);
    let (_, second) = store.lock_task("b", id, 10)
        .await
        .unwrap();
    assert_eq!((first, second), (Acquisition::Fresh, Acquisition::Reclaimed));
}

struct CountingHandler(Arc<AtomicUsize>);

#[async_trait]
impl WorkerHandler for CountingHandler {
    async fn handle(&self, ctx: WorkerContext, task: Task) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.complete(task.require_id()?, json!({"sent": true})).await?;
        Ok(())
    }
}

#[tokio::test]
async fn competing_workers_handle_each_task_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut queue = QueueBuilder::new().build().unwrap();
    for _ in 0..3 {
        queue
            .register(["email"], Arc::new(CountingHandler(Arc::clone(&calls))))
            .unwrap();
    }
    queue.start();

    let mut ids = Vec::new();
    for n in 0..5 {
        let task = queue
            .request_task("email")
            .data(json!({"to": format!("user{n}@example.com")}))
            .send()
            .await
            .unwrap();
        ids.push(task.require_id().unwrap());
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let counts = queue.counts().await.unwrap();
        if counts.success == ids.len() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "tasks did not finish: {counts:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(calls.load(Ordering::SeqCst), ids.len());
    for id in ids {
        let task = queue.get_task(id).await.unwrap();
        assert_eq!(task.attempts().total, 1);
    }
    queue.shutdown_and_join().await;
}
