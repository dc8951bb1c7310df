//! Dispatcher - ready 通知を受けてワーカーに配る
//!
//! # フロー（ワーカーごと）
//! 1. EventBus から `Ready { task_type, task_id }` を受信
//! 2. type filter に含まれない task_type は無視
//! 3. 最新状態を取り直し、まだ実行可能か確認（通知は古い可能性がある）
//! 4. Orchestrator::lock で lease を取得
//! 5. 成功した場合のみ handler を実行
//!
//! 他ワーカーに先を越された場合（AlreadyLocked）は debug ログだけ出して次へ。
//! handler に対するタイムアウトは無く、回復手段は lease の期限切れのみ。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::orchestrator::Orchestrator;
use crate::domain::{Result, Task, TaskEvent, TaskId, TaskType, ValidationError, WorkerId};
use crate::ports::IdGenerator;
use crate::typed::{Handler, TaskPayload, TypedHandler};

/// WorkerHandler は lease を取得済みのタスクを処理する
///
/// handler は `ctx` を通じて complete / fail / cancel / progress / yield を
/// 呼ぶ。何も呼ばずに戻った場合、タスクは lease が切れるまで LOCKED のまま。
#[async_trait]
pub trait WorkerHandler: Send + Sync {
    async fn handle(&self, ctx: WorkerContext, task: Task) -> Result<()>;
}

/// WorkerContext は handler に渡されるワーカー自身の情報
#[derive(Clone)]
pub struct WorkerContext {
    worker_id: WorkerId,
    requester: String,
    orchestrator: Arc<Orchestrator>,
}

impl WorkerContext {
    pub(crate) fn new(worker_id: WorkerId, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            worker_id,
            requester: worker_id.to_string(),
            orchestrator,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// lease の requester id として使う文字列
    pub fn requester(&self) -> &str {
        &self.requester
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub async fn complete(&self, task_id: TaskId, response: Value) -> Result<Task> {
        self.orchestrator
            .complete(&self.requester, task_id, response)
            .await
    }

    pub async fn fail(&self, task_id: TaskId, response: Value) -> Result<Task> {
        self.orchestrator.fail(&self.requester, task_id, response).await
    }

    pub async fn cancel(&self, task_id: TaskId, response: Value) -> Result<Task> {
        self.orchestrator
            .cancel(&self.requester, task_id, response)
            .await
    }

    pub async fn progress(&self, task_id: TaskId, progress: Value) -> Result<Task> {
        self.orchestrator
            .progress(&self.requester, task_id, progress)
            .await
    }

    pub async fn yield_task(&self, task_id: TaskId, response: Option<Value>) -> Result<Task> {
        self.orchestrator
            .yield_task(&self.requester, task_id, response)
            .await
    }

    pub async fn unlock(&self, task_id: TaskId) -> Result<Task> {
        self.orchestrator.unlock(&self.requester, task_id).await
    }
}

/// 登録済みワーカー
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRegistration {
    pub worker_id: WorkerId,
    pub type_filter: Vec<TaskType>,
}

/// Dispatcher はワーカー群を管理
///
/// # Shutdown
/// - `request_shutdown()` は新しい通知の受信を止めるだけで、実行中の handler は
///   中断しない
/// - `shutdown_and_join()` で全ワーカーの終了を待つ
pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    ids: Arc<dyn IdGenerator>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<WorkerRegistration>,
    joins: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>, ids: Arc<dyn IdGenerator>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            orchestrator,
            ids,
            shutdown_tx,
            workers: Vec::new(),
            joins: Vec::new(),
        }
    }

    /// ワーカーを登録してループを起動する（tokio runtime 内で呼ぶこと）
    ///
    /// # Errors
    /// - `TaskTypeMissing`: filter が空、または空の task_type を含む
    pub fn register<I, T>(&mut self, type_filter: I, handler: Arc<dyn WorkerHandler>) -> Result<WorkerId>
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskType>,
    {
        let type_filter: Vec<TaskType> = type_filter.into_iter().map(Into::into).collect();
        if type_filter.is_empty() || type_filter.iter().any(TaskType::is_empty) {
            return Err(ValidationError::TaskTypeMissing.into());
        }

        let worker_id = self.ids.generate_worker_id();
        let worker = Worker {
            ctx: WorkerContext::new(worker_id, Arc::clone(&self.orchestrator)),
            type_filter: type_filter.clone(),
            handler,
        };
        // subscribe は spawn 前に行う（登録直後の通知を取りこぼさないため）
        let events = self.orchestrator.subscribe();
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.joins
            .push(tokio::spawn(worker.run(events, shutdown_rx)));

        tracing::info!(worker_id = %worker_id, types = ?type_filter, "worker registered");
        self.workers.push(WorkerRegistration {
            worker_id,
            type_filter,
        });
        Ok(worker_id)
    }

    /// 型付き handler を `T::TYPE` のワーカーとして登録
    pub fn register_typed<T, H>(&mut self, handler: H) -> Result<WorkerId>
    where
        T: TaskPayload,
        H: Handler<T> + 'static,
    {
        let handler: Arc<dyn WorkerHandler> = Arc::new(TypedHandler::<T, H>::new(handler));
        self.register([T::TYPE], handler)
    }

    pub fn workers(&self) -> &[WorkerRegistration] {
        &self.workers
    }

    pub fn request_shutdown(&self) {
        // 受信側がすでに drop されていても問題ない
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "worker task panicked");
            }
        }
    }
}

struct Worker {
    ctx: WorkerContext,
    type_filter: Vec<TaskType>,
    handler: Arc<dyn WorkerHandler>,
}

impl Worker {
    async fn run(
        self,
        mut events: broadcast::Receiver<TaskEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let worker_id = self.ctx.worker_id;
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let event = tokio::select! {
                changed = shutdown_rx.changed() => {
                    // sender が drop された場合も終了
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                event = events.recv() => event,
            };

            match event {
                Ok(TaskEvent::Ready { task_type, task_id }) => {
                    if !self.type_filter.contains(&task_type) {
                        continue;
                    }
                    if let Err(err) = self.dispatch(task_id).await {
                        tracing::error!(
                            worker_id = %worker_id,
                            task_id = %task_id,
                            error = %err,
                            "dispatch failed"
                        );
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(worker_id = %worker_id, skipped, "worker lagged behind events");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!(worker_id = %worker_id, "worker stopped");
    }

    async fn dispatch(&self, task_id: TaskId) -> Result<()> {
        let orchestrator = self.ctx.orchestrator();

        let current = orchestrator.get_task(task_id).await?;
        if !orchestrator.is_ready(&current)? {
            tracing::debug!(task_id = %task_id, status = %current.status(), "stale ready notification");
            return Ok(());
        }

        let task = match orchestrator.lock(self.ctx.requester(), task_id).await {
            Ok(task) => task,
            Err(err) if err.is_lease_contention() => {
                tracing::debug!(
                    worker_id = %self.ctx.worker_id,
                    task_id = %task_id,
                    "task already locked by another worker"
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        self.handler.handle(self.ctx.clone(), task).await
    }
}
