//! TaskRequest - 投入前のタスクを組み立てるビルダー
//!
//! # 使用例
//! ```ignore
//! let task = queue
//!     .request_task("email")
//!     .data(json!({"to": "a@example.com"}))
//!     .priority("high")
//!     .attempts(3)
//!     .backoff("linear")
//!     .send()
//!     .await?;
//! ```
//!
//! 文字列を解釈するメソッド（later / schedule / priority / backoff）は
//! 最初のエラーを保持し、`build` / `send` でまとめて返す。

use std::sync::Arc;

use serde_json::Value;

use super::orchestrator::Orchestrator;
use crate::domain::{Backoff, Priority, Result, Schedule, Task, TaskType, UowError};

pub struct TaskRequest {
    orchestrator: Arc<Orchestrator>,
    task: Task,
    error: Option<UowError>,
}

impl TaskRequest {
    pub fn new(orchestrator: Arc<Orchestrator>, name: impl Into<TaskType>, max_attempts: u32) -> Self {
        Self {
            orchestrator,
            task: Task::new(name).with_max_attempts(max_attempts),
            error: None,
        }
    }

    pub fn data(mut self, data: Value) -> Self {
        self.task = self.task.with_data(data);
        self
    }

    /// 式の次回発生時刻に 1 回だけ実行する（繰り返しはしない）
    pub fn later(mut self, expression: &str) -> Self {
        match Schedule::parse(expression) {
            Ok(schedule) => {
                let now = self.orchestrator.clock().now_ms();
                self.task = self.task.with_after(schedule.next_after(now));
            }
            Err(err) => self.record(err.into()),
        }
        self
    }

    /// 指定した epoch ミリ秒以降に実行する
    pub fn after(mut self, after_ms: i64) -> Self {
        self.task = self.task.with_after(after_ms);
        self
    }

    /// 繰り返し実行する。complete / yield のたびに次回時刻で READY に戻る
    pub fn schedule(mut self, expression: &str) -> Self {
        match Schedule::parse(expression) {
            Ok(schedule) => self.task = self.task.with_schedule(schedule),
            Err(err) => self.record(err.into()),
        }
        self
    }

    /// 予定時刻（`later` / `after` / `schedule` で決まる時刻）から更に遅らせる
    pub fn delay(mut self, delay_ms: u64) -> Self {
        self.task = self.task.with_delay(delay_ms);
        self
    }

    pub fn attempts(mut self, max: u32) -> Self {
        self.task = self.task.with_max_attempts(max);
        self
    }

    /// `critical` / `high` / `medium` / `normal` / `low` または整数
    pub fn priority(mut self, level: &str) -> Self {
        match level.parse::<Priority>() {
            Ok(priority) => self.task = self.task.with_priority(priority),
            Err(err) => self.record(err.into()),
        }
        self
    }

    /// `fixed` / `linear`
    pub fn backoff(mut self, algorithm: &str) -> Self {
        match algorithm.parse::<Backoff>() {
            Ok(backoff) => self.task = self.task.with_backoff(backoff),
            Err(err) => self.record(err.into()),
        }
        self
    }

    /// 投入せずに Task を取り出す
    pub fn build(self) -> Result<Task> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.task),
        }
    }

    pub async fn send(self) -> Result<Task> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let task = self.build()?;
        orchestrator.submit(task).await
    }

    fn record(&mut self, err: UowError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}
