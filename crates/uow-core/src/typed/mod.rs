//! Typed - 型付き Task API
//!
//! task_type の typo を型で排除し、Handler と payload 型の対応付けを
//! 静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `TaskPayload` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `WorkerHandler` trait - object-safe, dispatcher が保持

pub mod handler;
pub mod payload;

pub use self::handler::{Handler, TypedHandler};
pub use self::payload::TaskPayload;
