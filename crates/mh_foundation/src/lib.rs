// crates/mh_foundation/src/lib.rs

//! MariHydro Foundation Layer
//!
//! 基础层，提供整个输出子系统共享的错误类型。
//!
//! # 模块概览
//!
//! - [`error`]: 统一错误类型 `MhError` / `MhResult`
//!
//! # 设计原则
//!
//! 1. **最小依赖**: 仅依赖 thiserror
//! 2. **汇聚点**: 各层错误通过 `From` 转换为 `MhError`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

// 重导出常用类型
pub use error::{MhError, MhResult};
