//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース。時刻部分は注入された Clock から取る

use ulid::Ulid;

use crate::domain::{TaskId, WorkerId};
use crate::ports::Clock;

/// IdGenerator は TaskId / WorkerId を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（store と dispatcher で共有する）
pub trait IdGenerator: Send + Sync {
    /// Task ID を生成（store が create 時に付与）
    fn generate_task_id(&self) -> TaskId;

    /// Worker ID を生成（dispatcher が register 時に付与）
    fn generate_worker_id(&self) -> WorkerId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// ManualClock と組み合わせると時刻部分が決定的になる。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = u64::try_from(self.clock.now_ms()).unwrap_or_default();
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn generate_worker_id(&self) -> WorkerId {
        WorkerId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ManualClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);
        let a = id_gen.generate_task_id();
        let b = id_gen.generate_task_id();
        assert_ne!(a, b);
    }

    #[test]
    fn timestamp_part_comes_from_clock() {
        let fixed = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(ManualClock::new(fixed));

        let id = id_gen.generate_worker_id();
        assert_eq!(id.as_ulid().timestamp_ms(), fixed.timestamp_millis() as u64);
        assert!(id.to_string().starts_with("worker-"));
    }
}
