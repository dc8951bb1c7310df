//! TaskCodec port - Task と永続化表現の境界
//!
//! core は常に型付きの `Task` だけを扱い、バイト列への変換は store 側で
//! この trait を通して行う。

use crate::domain::{Result, Task};

pub trait TaskCodec: Send + Sync {
    fn encode(&self, task: &Task) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Task>;
}

/// JsonTaskCodec は serde_json による実装
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTaskCodec;

impl TaskCodec for JsonTaskCodec {
    fn encode(&self, task: &Task) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(task)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Task> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Schedule, UowError};
    use serde_json::json;

    #[test]
    fn keeps_schedule_as_expression() {
        let task = Task::new("report")
            .with_data(json!({"to": "x"}))
            .with_schedule(Schedule::parse("daily").unwrap());
        let bytes = JsonTaskCodec.encode(&task).unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(raw["schedule"], "daily");
        assert_eq!(raw["status"], "NEW");

        let back = JsonTaskCodec.decode(&bytes).unwrap();
        assert_eq!(back.schedule(), task.schedule());
        assert_eq!(back.data, json!({"to": "x"}));
    }

    #[test]
    fn corrupt_bytes_are_a_codec_error() {
        let err = JsonTaskCodec.decode(b"{not json").unwrap_err();
        assert!(matches!(err, UowError::Codec(_)));
    }
}
