//! QueueBuilder - キューの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - グローバルなレジストリを持たず、全ての部品を `Queue` が所有する

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use super::dispatcher::{Dispatcher, WorkerHandler, WorkerRegistration};
use super::event_bus::EventBus;
use super::orchestrator::Orchestrator;
use super::poller::ReadyPoller;
use super::request::TaskRequest;
use super::status::QueueCounts;
use crate::config::QueueConfig;
use crate::domain::{Result, Task, TaskEvent, TaskId, TaskType, WorkerId};
use crate::impls::InMemoryTaskStore;
use crate::ports::{Clock, IdGenerator, SystemClock, TaskStore, UlidGenerator};
use crate::typed::{Handler, TaskPayload};

/// QueueBuilder はキューを構築
///
/// # 使用例
/// ```ignore
/// let mut queue = QueueBuilder::new()
///     .config(QueueConfig::from_file("uow.toml")?)
///     .build()?;
/// queue.register_typed::<SendEmail, _>(SendEmailHandler)?;
/// queue.start();
/// ```
///
/// # 既定値
/// - clock: SystemClock
/// - store: InMemoryTaskStore
pub struct QueueBuilder {
    config: QueueConfig,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn TaskStore>>,
}

/// BuildError はキュー構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("event_capacity must be greater than zero")]
    ZeroEventCapacity,

    #[error("ready_scan_interval_ms must be greater than zero")]
    ZeroScanInterval,
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            clock: None,
            store: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// # 検証
    /// - `event_capacity` と `ready_scan_interval_ms` が 0 でないこと
    pub fn build(self) -> std::result::Result<Queue, BuildError> {
        if self.config.event_capacity == 0 {
            return Err(BuildError::ZeroEventCapacity);
        }
        if self.config.ready_scan_interval_ms == 0 {
            return Err(BuildError::ZeroScanInterval);
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new(Arc::clone(&clock))));
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));

        let orchestrator = Arc::new(Orchestrator::new(
            store,
            clock,
            EventBus::new(self.config.event_capacity),
            self.config.default_ttl_ms,
        ));
        let dispatcher = Dispatcher::new(Arc::clone(&orchestrator), ids);

        Ok(Queue {
            config: self.config,
            orchestrator,
            dispatcher,
            poller: None,
        })
    }
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue は 1 つのキューに属する部品一式
pub struct Queue {
    config: QueueConfig,
    orchestrator: Arc<Orchestrator>,
    dispatcher: Dispatcher,
    poller: Option<ReadyPoller>,
}

impl Queue {
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// 新しいタスクの組み立てを始める
    pub fn request_task(&self, name: impl Into<TaskType>) -> TaskRequest {
        TaskRequest::new(
            Arc::clone(&self.orchestrator),
            name,
            self.config.default_max_attempts,
        )
    }

    pub async fn submit(&self, task: Task) -> Result<Task> {
        self.orchestrator.submit(task).await
    }

    pub async fn submit_typed<T: TaskPayload>(&self, payload: &T) -> Result<Task> {
        let task = payload
            .to_task()?
            .with_max_attempts(self.config.default_max_attempts);
        self.orchestrator.submit(task).await
    }

    pub fn register<I, T>(&mut self, type_filter: I, handler: Arc<dyn WorkerHandler>) -> Result<WorkerId>
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskType>,
    {
        self.dispatcher.register(type_filter, handler)
    }

    pub fn register_typed<T, H>(&mut self, handler: H) -> Result<WorkerId>
    where
        T: TaskPayload,
        H: Handler<T> + 'static,
    {
        self.dispatcher.register_typed::<T, H>(handler)
    }

    pub fn workers(&self) -> &[WorkerRegistration] {
        self.dispatcher.workers()
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<Task> {
        self.orchestrator.get_task(task_id).await
    }

    pub async fn update_data(&self, task_id: TaskId, data: Value) -> Result<Task> {
        self.orchestrator.update_data(task_id, data).await
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        self.orchestrator.counts().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.orchestrator.subscribe()
    }

    /// ready poller を起動する（2 回目以降は何もしない）
    pub fn start(&mut self) {
        if self.poller.is_some() {
            return;
        }
        tracing::info!(
            interval_ms = self.config.ready_scan_interval_ms,
            "starting ready poller"
        );
        self.poller = Some(ReadyPoller::spawn(
            Arc::clone(&self.orchestrator),
            self.config.ready_scan_interval(),
        ));
    }

    /// poller とワーカーを止めて終了を待つ
    pub async fn shutdown_and_join(self) {
        if let Some(poller) = self.poller {
            poller.shutdown_and_join().await;
        }
        self.dispatcher.shutdown_and_join().await;
        tracing::info!("queue stopped");
    }
}
