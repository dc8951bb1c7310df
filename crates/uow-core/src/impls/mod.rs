//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 開発用・テスト用の TaskStore
//!
//! 永続ストア（DB など）の実装は別クレートに置く想定です。

pub mod memory_store;

pub use self::memory_store::InMemoryTaskStore;
