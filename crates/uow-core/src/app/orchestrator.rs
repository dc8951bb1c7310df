//! Orchestrator - タスク操作の唯一の書き込み経路
//!
//! # フロー
//! 1. TaskStore からタスクを取得
//! 2. domain の状態遷移（lease の所有確認を含む）を適用
//! 3. TaskStore に保存（revision による楽観ロック）
//! 4. 保存に成功した場合のみ EventBus に通知
//!
//! 失敗した操作は何も通知しない。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use super::event_bus::EventBus;
use super::status::QueueCounts;
use crate::domain::{
    Acquisition, Result, Task, TaskEvent, TaskId, UowError, ValidationError,
};
use crate::ports::{Clock, TaskStore};

/// Orchestrator は store・clock・event bus を 1 つずつ保持する
///
/// # 使用例
/// ```ignore
/// let task = orchestrator.submit(Task::new("email")).await?;
/// let task = orchestrator.lock("worker-1", task.require_id()?).await?;
/// orchestrator.complete("worker-1", task.require_id()?, json!({"sent": true})).await?;
/// ```
pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    default_ttl_ms: u64,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        default_ttl_ms: u64,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            default_ttl_ms,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn default_ttl_ms(&self) -> u64 {
        self.default_ttl_ms
    }

    /// 新規タスクを保存し、`after` を過ぎていれば即座に ready を通知
    ///
    /// # Errors
    /// - `InvalidTaskObject`: すでに id を持っている
    /// - `TaskTypeMissing`: name が空
    pub async fn submit(&self, task: Task) -> Result<Task> {
        if task.id().is_some() {
            return Err(
                ValidationError::InvalidTaskObject("submitted task already has an id").into(),
            );
        }
        if task.name.is_empty() {
            return Err(ValidationError::TaskTypeMissing.into());
        }

        let task = self.store.create_task(task).await?;
        let task_id = task.require_id()?;
        tracing::info!(
            task_id = %task_id,
            task_type = %task.name,
            after = task.after(),
            "task submitted"
        );

        if task.after() <= self.clock.now_ms() {
            self.notify_ready(&task)?;
        }
        Ok(task)
    }

    /// 既定の ttl で lease を取得
    pub async fn lock(&self, requester_id: &str, task_id: TaskId) -> Result<Task> {
        self.lock_with_ttl(requester_id, task_id, self.default_ttl_ms)
            .await
    }

    /// lease を取得（保持者なら更新）
    ///
    /// # Errors
    /// - `AlreadyLocked`: 他の requester が期限内の lease を保持
    /// - `InvalidTransition`: 終端ステータス
    /// - `NotDue`: `after` がまだ来ていない
    pub async fn lock_with_ttl(
        &self,
        requester_id: &str,
        task_id: TaskId,
        ttl_ms: u64,
    ) -> Result<Task> {
        let (task, acquisition) = self.store.lock_task(requester_id, task_id, ttl_ms).await?;
        tracing::info!(
            task_id = %task_id,
            requester = requester_id,
            ttl_ms,
            acquisition = ?acquisition,
            "task locked"
        );

        if acquisition != Acquisition::Renewed && task.attempts_exhausted() {
            let attempts = task.attempts();
            tracing::warn!(
                task_id = %task_id,
                run = attempts.run,
                total = attempts.total,
                max = attempts.max,
                "task exceeded its attempt limit"
            );
        }

        self.events.publish(TaskEvent::Locked(task.clone()));
        Ok(task)
    }

    /// LOCKED → SUCCESS（schedule があれば次回時刻で READY）
    pub async fn complete(&self, requester_id: &str, task_id: TaskId, response: Value) -> Result<Task> {
        let task = self
            .transition(task_id, |task, now| task.complete(requester_id, response, now))
            .await?;
        tracing::info!(task_id = %task_id, status = %task.status(), after = task.after(), "task completed");
        self.events.publish(TaskEvent::Finished(task.clone()));
        Ok(task)
    }

    pub async fn fail(&self, requester_id: &str, task_id: TaskId, response: Value) -> Result<Task> {
        let task = self
            .transition(task_id, |task, _| task.fail(requester_id, response))
            .await?;
        tracing::info!(task_id = %task_id, failed = task.attempts().failed, "task failed");
        self.events.publish(TaskEvent::Failed(task.clone()));
        Ok(task)
    }

    pub async fn cancel(&self, requester_id: &str, task_id: TaskId, response: Value) -> Result<Task> {
        let task = self
            .transition(task_id, |task, _| task.cancel(requester_id, response))
            .await?;
        tracing::info!(task_id = %task_id, "task cancelled");
        self.events.publish(TaskEvent::Cancelled(task.clone()));
        Ok(task)
    }

    /// progress を上書きし、lease を更新（heartbeat）
    pub async fn progress(&self, requester_id: &str, task_id: TaskId, progress: Value) -> Result<Task> {
        let task = self
            .transition(task_id, |task, now| {
                task.report_progress(requester_id, progress, now)
            })
            .await?;
        tracing::debug!(task_id = %task_id, "task progress");
        self.events.publish(TaskEvent::Progress(task.clone()));
        Ok(task)
    }

    /// 処理を次回の予定時刻まで譲る（schedule 付きのタスクのみ）
    pub async fn yield_task(
        &self,
        requester_id: &str,
        task_id: TaskId,
        response: Option<Value>,
    ) -> Result<Task> {
        let task = self
            .transition(task_id, |task, now| {
                task.yield_to_schedule(requester_id, response, now)
            })
            .await?;
        tracing::info!(task_id = %task_id, after = task.after(), "task yielded");
        self.events.publish(TaskEvent::Unlocked(task.clone()));
        Ok(task)
    }

    /// 結果を記録せずに lease を手放す
    ///
    /// lease の無いタスクなら何もせずに現在の状態を返す（イベントも出さない）
    pub async fn unlock(&self, requester_id: &str, task_id: TaskId) -> Result<Task> {
        let (task, released) = self.store.unlock_task(requester_id, task_id).await?;
        if !released {
            tracing::debug!(task_id = %task_id, requester = requester_id, "unlock of an unlocked task");
            return Ok(task);
        }
        tracing::info!(task_id = %task_id, requester = requester_id, "task unlocked");
        self.events.publish(TaskEvent::Unlocked(task.clone()));
        Ok(task)
    }

    /// ready 通知を発行
    ///
    /// # Errors
    /// - `TaskNotPersisted`: id が無い
    /// - `TaskTypeMissing`: name が空
    pub fn notify_ready(&self, task: &Task) -> Result<()> {
        let task_id = task.id().ok_or(ValidationError::TaskNotPersisted)?;
        if task.name.is_empty() {
            return Err(ValidationError::TaskTypeMissing.into());
        }
        tracing::debug!(task_id = %task_id, task_type = %task.name, "task ready");
        self.events.publish(TaskEvent::Ready {
            task_type: task.name.clone(),
            task_id,
        });
        Ok(())
    }

    /// 実行可能なタスクを store から集めて ready を通知し、件数を返す
    pub async fn notify_ready_tasks(&self) -> Result<usize> {
        let ready = self.store.ready_tasks(self.clock.now_ms()).await?;
        for task in &ready {
            self.notify_ready(task)?;
        }
        Ok(ready.len())
    }

    /// 現時点で lease を取りに行ってよいか（ready 通知の鮮度確認用）
    pub fn is_ready(&self, task: &Task) -> Result<bool> {
        task.is_ready_at(self.clock.now_ms())
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<Task> {
        self.store
            .get_task_by_id(task_id)
            .await?
            .ok_or_else(|| ValidationError::TaskNotFound(task_id).into())
    }

    /// data を置き換える（lease が無く、終端でない場合のみ）
    pub async fn update_data(&self, task_id: TaskId, data: Value) -> Result<Task> {
        let task = self
            .transition(task_id, |task, now| task.replace_data(data, now))
            .await?;
        tracing::info!(task_id = %task_id, "task data updated");
        Ok(task)
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        Ok(self.store.counts_by_status().await?.into())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    async fn transition<F>(&self, task_id: TaskId, apply: F) -> Result<Task>
    where
        F: FnOnce(&mut Task, i64) -> Result<()>,
    {
        let mut task = self.get_task(task_id).await?;
        apply(&mut task, self.clock.now_ms())?;
        match self.store.update_task(task).await {
            Err(UowError::Conflict(id)) => {
                tracing::warn!(task_id = %id, "task changed underneath the write");
                Err(UowError::Conflict(id))
            }
            other => other,
        }
    }
}
