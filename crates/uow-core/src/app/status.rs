//! Status - ステータス別のタスク数

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::TaskStatus;

/// QueueCounts はステータスごとのタスク数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub new: usize,
    pub ready: usize,
    pub locked: usize,
    pub success: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.new + self.ready + self.locked + self.success + self.failed + self.cancelled
    }

    /// 終端に達していないタスク数
    pub fn pending(&self) -> usize {
        self.new + self.ready + self.locked
    }
}

impl From<HashMap<TaskStatus, usize>> for QueueCounts {
    fn from(by_status: HashMap<TaskStatus, usize>) -> Self {
        let get = |status| by_status.get(&status).copied().unwrap_or(0);
        Self {
            new: get(TaskStatus::New),
            ready: get(TaskStatus::Ready),
            locked: get(TaskStatus::Locked),
            success: get(TaskStatus::Success),
            failed: get(TaskStatus::Failed),
            cancelled: get(TaskStatus::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_statuses_count_as_zero() {
        let counts = QueueCounts::from(HashMap::from([
            (TaskStatus::Ready, 2),
            (TaskStatus::Success, 1),
        ]));
        assert_eq!(counts.ready, 2);
        assert_eq!(counts.locked, 0);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.pending(), 2);
    }
}
