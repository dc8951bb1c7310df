//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてキューの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **QueueBuilder / Queue**: 構築とワイヤリング、全部品の所有
//! - **Orchestrator**: 取得 → 検証 → 遷移 → 保存 → 通知
//! - **Dispatcher**: ready 通知をワーカーに配る
//! - **ReadyPoller**: 実行可能になったタスクの定期スキャン
//! - **TaskRequest**: 投入前のタスクのビルダー
//! - **EventBus**: ライフサイクル通知の配信

pub mod builder;
pub mod dispatcher;
pub mod event_bus;
pub mod orchestrator;
pub mod poller;
pub mod request;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, Queue, QueueBuilder};
pub use self::dispatcher::{Dispatcher, WorkerContext, WorkerHandler, WorkerRegistration};
pub use self::event_bus::EventBus;
pub use self::orchestrator::Orchestrator;
pub use self::poller::ReadyPoller;
pub use self::request::TaskRequest;
pub use self::status::QueueCounts;
