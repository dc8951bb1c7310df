//! Handler trait - 型付き handler
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Type erasure パターン (TypedHandler<T, H> → dyn WorkerHandler)

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::json;

use super::payload::TaskPayload;
use crate::app::{WorkerContext, WorkerHandler};
use crate::domain::{Result, Task};

/// Handler は decode 済みの payload を受け取る
///
/// # 使用例
/// ```ignore
/// struct SendEmailHandler;
///
/// #[async_trait]
/// impl Handler<SendEmail> for SendEmailHandler {
///     async fn handle(&self, ctx: WorkerContext, task: Task, email: SendEmail) -> Result<()> {
///         ctx.complete(task.require_id()?, json!({"sent": true})).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: TaskPayload>: Send + Sync {
    async fn handle(&self, ctx: WorkerContext, task: Task, payload: T) -> Result<()>;
}

/// TypedHandler は `Handler<T>` を `dyn WorkerHandler` に変換する
///
/// data を T に decode できないタスクは、lease の期限切れを待たずに
/// その場で fail させる（何度配っても decode できないため）。
pub struct TypedHandler<T: TaskPayload, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TaskPayload, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskPayload, H: Handler<T>> WorkerHandler for TypedHandler<T, H> {
    async fn handle(&self, ctx: WorkerContext, task: Task) -> Result<()> {
        let payload = match T::from_task(&task) {
            Ok(payload) => payload,
            Err(err) => {
                let task_id = task.require_id()?;
                tracing::warn!(task_id = %task_id, task_type = T::TYPE, error = %err, "payload decode failed");
                ctx.fail(task_id, json!({ "error": format!("payload decode: {err}") }))
                    .await?;
                return Ok(());
            }
        };
        self.handler.handle(ctx, task, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{EventBus, Orchestrator};
    use crate::domain::{TaskStatus, WorkerId};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::SystemClock;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use ulid::Ulid;

    #[derive(Debug, Serialize, Deserialize)]
    struct SendEmail {
        to: String,
    }

    impl TaskPayload for SendEmail {
        const TYPE: &'static str = "email";
    }

    struct SendEmailHandler;

    #[async_trait]
    impl Handler<SendEmail> for SendEmailHandler {
        async fn handle(&self, ctx: WorkerContext, task: Task, email: SendEmail) -> Result<()> {
            ctx.complete(task.require_id()?, json!({ "sent": true, "to": email.to }))
                .await?;
            Ok(())
        }
    }

    async fn locked(orchestrator: &Orchestrator, ctx: &WorkerContext, task: Task) -> Task {
        let id = orchestrator.submit(task).await.unwrap().require_id().unwrap();
        orchestrator.lock(ctx.requester(), id).await.unwrap()
    }

    fn setup() -> (Arc<Orchestrator>, WorkerContext) {
        let clock = Arc::new(SystemClock);
        let store = Arc::new(InMemoryTaskStore::new(clock.clone()));
        let orchestrator = Arc::new(Orchestrator::new(store, clock, EventBus::new(8), 30_000));
        let ctx = WorkerContext::new(WorkerId::from_ulid(Ulid::new()), Arc::clone(&orchestrator));
        (orchestrator, ctx)
    }

    #[tokio::test]
    async fn decodes_payload_for_the_handler() {
        let (orchestrator, ctx) = setup();
        let task = SendEmail { to: "a@example.com".into() }.to_task().unwrap();
        let task = locked(&orchestrator, &ctx, task).await;
        let id = task.require_id().unwrap();

        TypedHandler::<SendEmail, _>::new(SendEmailHandler)
            .handle(ctx, task)
            .await
            .unwrap();

        let done = orchestrator.get_task(id).await.unwrap();
        assert_eq!(done.status(), TaskStatus::Success);
        assert_eq!(done.response(), &[json!({ "sent": true, "to": "a@example.com" })]);
    }

    #[tokio::test]
    async fn undecodable_payload_fails_the_task() {
        let (orchestrator, ctx) = setup();
        let task = Task::new("email").with_data(json!({ "recipient": 42 }));
        let task = locked(&orchestrator, &ctx, task).await;
        let id = task.require_id().unwrap();

        TypedHandler::<SendEmail, _>::new(SendEmailHandler)
            .handle(ctx, task)
            .await
            .unwrap();

        let failed = orchestrator.get_task(id).await.unwrap();
        assert_eq!(failed.status(), TaskStatus::Failed);
        assert!(failed.lease().is_none());
    }
}
