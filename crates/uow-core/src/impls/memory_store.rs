//! InMemoryTaskStore - 開発用・テスト用の TaskStore
//!
//! # 学習ポイント
//! - tokio::sync::Mutex で read-modify-write を直列化（lease の原子性）
//! - 生の `Task` ではなくエンコード済みのバイト列を保持する
//! - revision による楽観ロック

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    Acquisition, InvariantError, Result, Task, TaskId, TaskStatus, UowError, ValidationError,
};
use crate::ports::{Clock, IdGenerator, JsonTaskCodec, TaskCodec, TaskStore, UlidGenerator};

/// InMemoryTaskStore はプロセス内の TaskStore
///
/// # 実装詳細
/// - `HashMap<TaskId, Vec<u8>>` を 1 つの Mutex で保護
/// - 読み出しのたびに decode するので、呼び出し側が持つ `Task` と store の
///   中身が共有されることはない
///
/// # 使用例
/// ```ignore
/// let store = InMemoryTaskStore::new(Arc::new(SystemClock));
/// let task = store.create_task(Task::new("email")).await?;
/// let (task, _) = store.lock_task("worker-1", task.require_id()?, 30_000).await?;
/// ```
pub struct InMemoryTaskStore {
    records: Mutex<HashMap<TaskId, Vec<u8>>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    codec: Arc<dyn TaskCodec>,
}

impl InMemoryTaskStore {
    /// ULID の ID 生成器と JSON codec を使う store を作成
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::with_parts(clock, ids, Arc::new(JsonTaskCodec))
    }

    pub fn with_parts(
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        codec: Arc<dyn TaskCodec>,
    ) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
            ids,
            codec,
        }
    }

    fn load(&self, records: &HashMap<TaskId, Vec<u8>>, id: TaskId) -> Result<Task> {
        let bytes = records
            .get(&id)
            .ok_or(ValidationError::TaskNotFound(id))?;
        self.decode_checked(id, bytes)
    }

    fn decode_checked(&self, id: TaskId, bytes: &[u8]) -> Result<Task> {
        let task = self.codec.decode(bytes)?;
        if task.id() != Some(id) {
            return Err(InvariantError::RecordMismatch(id).into());
        }
        Ok(task)
    }

    fn save(&self, records: &mut HashMap<TaskId, Vec<u8>>, mut task: Task) -> Result<Task> {
        let id = task.require_id()?;
        task.bump_revision();
        records.insert(id, self.codec.encode(&task)?);
        Ok(task)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, mut task: Task) -> Result<Task> {
        if task.id().is_some() {
            return Err(ValidationError::InvalidTaskObject("a new task must not carry an id").into());
        }
        task.assign_id(self.ids.generate_task_id())?;
        task.resolve_after(self.clock.now_ms());

        let mut records = self.records.lock().await;
        self.save(&mut records, task)
    }

    async fn update_task(&self, task: Task) -> Result<Task> {
        let id = task.require_id()?;
        let mut records = self.records.lock().await;
        let current = self.load(&records, id)?;
        if current.revision() != task.revision() {
            return Err(UowError::Conflict(id));
        }
        self.save(&mut records, task)
    }

    async fn get_task_by_id(&self, id: TaskId) -> Result<Option<Task>> {
        let records = self.records.lock().await;
        records
            .get(&id)
            .map(|bytes| self.decode_checked(id, bytes))
            .transpose()
    }

    async fn lock_task(
        &self,
        requester_id: &str,
        id: TaskId,
        ttl_ms: u64,
    ) -> Result<(Task, Acquisition)> {
        let mut records = self.records.lock().await;
        let mut task = self.load(&records, id)?;
        let acquisition = task.lock(requester_id, ttl_ms, self.clock.now_ms())?;
        let task = self.save(&mut records, task)?;
        Ok((task, acquisition))
    }

    async fn unlock_task(&self, requester_id: &str, id: TaskId) -> Result<(Task, bool)> {
        let mut records = self.records.lock().await;
        let mut task = self.load(&records, id)?;
        if !task.unlock(requester_id)? {
            return Ok((task, false));
        }
        Ok((self.save(&mut records, task)?, true))
    }

    async fn ready_tasks(&self, now_ms: i64) -> Result<Vec<Task>> {
        let mut records = self.records.lock().await;
        let ids: Vec<TaskId> = records.keys().copied().collect();

        let mut ready = Vec::new();
        for id in ids {
            let mut task = match self.load(&records, id) {
                Ok(task) => task,
                Err(err) => {
                    // 壊れたレコードは修復せず報告だけして、他のタスクの走査を続ける
                    tracing::error!(task_id = %id, error = %err, "skipping unreadable task record");
                    continue;
                }
            };
            match task.is_ready_at(now_ms) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    tracing::error!(task_id = %id, error = %err, "skipping task with a broken lease");
                    continue;
                }
            }
            if task.promote() {
                task = self.save(&mut records, task)?;
            }
            ready.push(task);
        }

        ready.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.after().cmp(&b.after()))
        });
        Ok(ready)
    }

    async fn counts_by_status(&self) -> Result<HashMap<TaskStatus, usize>> {
        let records = self.records.lock().await;
        let mut counts = HashMap::new();
        for (id, bytes) in records.iter() {
            let task = self.decode_checked(*id, bytes)?;
            *counts.entry(task.status()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
