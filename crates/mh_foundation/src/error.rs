// crates/mh_foundation/src/error.rs

//! 统一错误类型
//!
//! 各层（运行时、网格、配置、输出）保留自己的错误枚举，跨层时经
//! `From<XxxError> for MhError` 汇聚到这里。驱动程序只需要回答一个问题：
//! 这个错误会中止整个输出过程，还是只影响单个写出器？见 [`MhError::is_fatal`]。
//!
//! ```
//! use mh_foundation::error::{MhError, MhResult};
//!
//! fn place(required: u64) -> MhResult<()> {
//!     Err(MhError::capacity("global output buffer", required, 1024))
//! }
//! assert!(place(4096).unwrap_err().is_fatal());
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// 统一结果类型
pub type MhResult<T> = Result<T, MhError>;

/// MariHydro 错误类型
#[derive(Error, Debug)]
pub enum MhError {
    // ========================================================================
    // 隔离错误：只影响单个写出器或单个文件
    // ========================================================================

    /// 文件或流读写失败
    #[error("IO错误: {context}: {source}")]
    Io {
        /// 出错的文件或流
        context: String,
        /// 底层 IO 错误
        #[source]
        source: std::io::Error,
    },

    /// 输出格式在当前构建或运行配置中不可用
    #[error("输出格式不可用: {0}")]
    FormatUnavailable(String),

    /// 读回文件时内容不符合格式
    #[error("文件解析错误: {} 第{line}行: {message}", file.display())]
    Parse {
        /// 文件路径
        file: PathBuf,
        /// 行号（从 1 开始，未知时为 0）
        line: usize,
        /// 错误信息
        message: String,
    },

    /// 输入数据无效（缺少变量、未知标记、记录顺序等）
    #[error("无效的输入数据: {0}")]
    InvalidInput(String),

    /// 序列化或反序列化失败
    #[error("序列化错误: {0}")]
    Serialization(String),

    // ========================================================================
    // 致命错误：所有 rank 一致中止
    // ========================================================================

    /// 索引越界
    #[error("索引越界: {what} 索引 {index} 超出范围 0..{len}")]
    IndexOutOfBounds {
        /// 索引类别
        what: &'static str,
        /// 访问的索引
        index: usize,
        /// 上界
        len: usize,
    },

    /// 网格不满足分区约定
    #[error("无效的网格: {0}")]
    InvalidMesh(String),

    /// 配置值无效
    #[error("配置值无效: {key}={value}, 原因: {reason}")]
    InvalidConfig {
        /// 配置键名
        key: String,
        /// 配置值
        value: String,
        /// 原因
        reason: String,
    },

    /// 集合操作的调用约定被破坏，或其他 rank 已失败
    #[error("调用约定被破坏: {0}")]
    Contract(String),

    /// 聚合者上的缓冲区超过上限
    #[error("资源容量不足: {resource} 需要 {required} 字节, 上限 {limit} 字节")]
    Capacity {
        /// 资源名称
        resource: String,
        /// 需要的字节数
        required: u64,
        /// 上限
        limit: u64,
    },
}

impl MhError {
    /// 文件或流读写失败
    pub fn io_with_source(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// 格式不可用
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::FormatUnavailable(format.into())
    }

    /// 解析错误
    pub fn parse(file: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    /// 无效输入
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// 序列化错误
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// 索引越界
    pub fn index_out_of_bounds(what: &'static str, index: usize, len: usize) -> Self {
        Self::IndexOutOfBounds { what, index, len }
    }

    /// 无效网格
    pub fn invalid_mesh(message: impl Into<String>) -> Self {
        Self::InvalidMesh(message.into())
    }

    /// 配置值无效
    pub fn invalid_config(key: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// 调用约定被破坏
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    /// 容量不足
    pub fn capacity(resource: impl Into<String>, required: u64, limit: u64) -> Self {
        Self::Capacity {
            resource: resource.into(),
            required,
            limit,
        }
    }

    /// 是否必须中止整个输出过程
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IndexOutOfBounds { .. }
                | Self::InvalidMesh(_)
                | Self::InvalidConfig { .. }
                | Self::Contract(_)
                | Self::Capacity { .. }
        )
    }
}

impl From<std::io::Error> for MhError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            context: source.kind().to_string(),
            source,
        }
    }
}
