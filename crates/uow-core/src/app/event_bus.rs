//! EventBus - ライフサイクル通知の配信
//!
//! # 学習ポイント
//! - tokio::sync::broadcast による 1 対多の配信
//! - 送信はブロックせず、失敗しても呼び出し元の操作は失敗させない
//! - 遅れた購読者は古いイベントを取りこぼす（ready は poller が再送する）

use tokio::sync::broadcast;

use crate::domain::TaskEvent;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    /// `capacity` は購読者ごとのバッファ数（0 は不可、builder で検証済み）
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: TaskEvent) {
        let name = event.name();
        let task_id = event.task_id();
        // 購読者がいない場合の送信エラーは無視
        if self.tx.send(event).is_err() {
            tracing::trace!(event = name, task_id = ?task_id, "no subscribers for event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
