//! TaskPayload trait - 型と task_type の対応付け
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{Result, Task};

/// TaskPayload は task_type と `data` の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
/// }
///
/// impl TaskPayload for SendEmail {
///     const TYPE: &'static str = "email";
/// }
/// ```
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// task_type（ワーカーの type filter に使われる）
    const TYPE: &'static str;

    /// `T::TYPE` を name に、自身を data にした未保存の Task を作る
    fn to_task(&self) -> Result<Task> {
        Ok(Task::new(Self::TYPE).with_data(serde_json::to_value(self)?))
    }

    /// Task の data を decode する
    fn from_task(task: &Task) -> Result<Self> {
        Ok(serde_json::from_value(task.data.clone())?)
    }
}
