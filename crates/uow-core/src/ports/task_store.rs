//! TaskStore port - タスクの永続化
//!
//! # 契約
//! - `create_task`: id 未割り当てのタスクだけを受け付け、id を付与して返す
//! - `update_task`: revision が一致する場合のみ上書き（楽観ロック）
//! - `lock_task` / `unlock_task`: lease の取得・解放を read-modify-write で
//!   原子的に行う
//! - `ready_tasks`: NEW → READY の昇格と、実行可能なタスクの列挙
//!
//! lease の可否判定そのものは domain::lease_manager が行い、store は
//! 原子性だけを担う。

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{Acquisition, Result, Task, TaskId, TaskStatus};

/// TaskStore はタスクの正本
///
/// # Thread Safety
/// - `Send + Sync` を要求（orchestrator と poller で共有する）
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 新規タスクを保存して、id と revision を付与したものを返す
    ///
    /// # Errors
    /// - `InvalidTaskObject`: すでに id を持っている
    async fn create_task(&self, task: Task) -> Result<Task>;

    /// 既存タスクを上書き
    ///
    /// # Errors
    /// - `TaskIdNotProvided`: id が無い
    /// - `TaskNotFound`: 未登録
    /// - `Conflict`: 読み出し後に別の書き込みがあった
    async fn update_task(&self, task: Task) -> Result<Task>;

    async fn get_task_by_id(&self, id: TaskId) -> Result<Option<Task>>;

    /// lease を取得（保持者なら更新）して保存
    async fn lock_task(&self, requester_id: &str, id: TaskId, ttl_ms: u64)
        -> Result<(Task, Acquisition)>;

    /// lease を解放して READY に戻す
    ///
    /// lease の無いタスクに対しては何もせず `(task, false)` を返す（保存もしない）
    async fn unlock_task(&self, requester_id: &str, id: TaskId) -> Result<(Task, bool)>;

    /// `after` を過ぎた NEW を READY に昇格し、lease が無い（または期限切れの）
    /// 非終端タスクを priority → after の順で返す
    async fn ready_tasks(&self, now_ms: i64) -> Result<Vec<Task>>;

    async fn counts_by_status(&self) -> Result<HashMap<TaskStatus, usize>>;
}
