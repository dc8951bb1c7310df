//! uow-core
//!
//! Core building blocks for the unit-of-work task queue: tasks are leased to
//! workers for a bounded time, finished, failed, cancelled or rescheduled, and
//! every change is announced on an event bus.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, lease, lease_manager, schedule, policy, events, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, TaskCodec, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（builder, orchestrator, dispatcher, poller, request, status）
//! - **typed**: 型付き Task API（TaskPayload trait, Handler trait）
//! - **impls**: 実装（InMemoryTaskStore）
//! - **config**: QueueConfig（TOML）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use self::app::{
    BuildError, Orchestrator, Queue, QueueBuilder, QueueCounts, TaskRequest, WorkerContext,
    WorkerHandler,
};
pub use self::config::QueueConfig;
pub use self::domain::{
    Backoff, LeaseError, Priority, Result, Schedule, Task, TaskEvent, TaskId, TaskStatus,
    TaskType, UowError, WorkerId,
};
pub use self::typed::{Handler, TaskPayload};
