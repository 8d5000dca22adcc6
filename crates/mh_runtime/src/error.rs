// crates/mh_runtime/src/error.rs

//! 运行时错误类型
//!
//! 定义集合通信层的错误，均表示各 rank 之间的调用约定被破坏，不可重试。

use mh_foundation::MhError;
use thiserror::Error;

/// 运行时错误
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// rank 数无效
    #[error("无效的进程数: {size}")]
    InvalidSize {
        /// 请求的进程数
        size: usize,
    },

    /// 集合操作中各 rank 提交的数据类型不一致
    #[error("集合操作 '{collective}' 在 rank {rank} 处类型不一致")]
    TypeMismatch {
        /// 集合操作名称
        collective: &'static str,
        /// 出错的 rank
        rank: usize,
    },

    /// 集合操作中缺少某 rank 的数据
    #[error("集合操作 '{collective}' 缺少 rank {rank} 的数据")]
    MissingContribution {
        /// 集合操作名称
        collective: &'static str,
        /// 缺少数据的 rank
        rank: usize,
    },

    /// 广播时根进程未提供值
    #[error("广播时根进程未提供值")]
    MissingRootValue,
}

/// 运行时结果类型
pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl From<RuntimeError> for MhError {
    fn from(err: RuntimeError) -> Self {
        MhError::contract(err.to_string())
    }
}
