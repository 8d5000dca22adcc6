// crates/mh_io/src/error.rs
//! IO 错误类型定义
//!
//! 提供输出装配模块的统一错误枚举，支持通过 thiserror 自动转换底层错误。
//! 所有错误最终可转换为 MhError 以实现跨层错误传递。
//!
//! # 错误分级
//!
//! - 致命：合并层错误（调用约定、单元数不一致、容量不足、对端失败），中止本次输出
//! - 隔离：写出器错误（格式不可用、文件 IO），只影响对应写出器

use std::path::PathBuf;

use mh_config::ConfigError;
use mh_foundation::MhError;
use mh_mesh::{ElementType, MeshError};
use mh_runtime::RuntimeError;
use thiserror::Error;

use crate::history::HistoryError;

/// IO 模块结果类型别名
pub type IoResult<T> = Result<T, IoError>;

/// IO 错误枚举
#[derive(Error, Debug)]
pub enum IoError {
    /// 格式不可用（构建时未启用或运行时禁用）
    #[error("输出格式不可用: {format}")]
    CapabilityUnavailable {
        /// 格式名称
        format: String,
    },

    /// 文件读写失败
    #[error("文件读写失败: {}: {source}", path.display())]
    Io {
        /// 目标文件
        path: PathBuf,
        /// 底层错误
        #[source]
        source: std::io::Error,
    },

    /// 调用约定被破坏
    #[error("调用约定被破坏: {message}")]
    ContractViolation {
        /// 具体描述
        message: String,
    },

    /// 同一次合并中声明的单元数与实际连接体不一致
    #[error("rank {rank} 的 {etype} 单元数不一致: 声明 {declared}, 实际 {actual}")]
    InconsistentElementCount {
        /// 出错的 rank
        rank: usize,
        /// 单元类型
        etype: ElementType,
        /// 声明数量
        declared: usize,
        /// 连接体中的实际数量
        actual: usize,
    },

    /// 全局缓冲区超过上限
    #[error("全局缓冲区容量不足: 需要 {required} 字节, 上限 {limit} 字节")]
    CapacityExceeded {
        /// 估算需要的字节数
        required: u64,
        /// 配置上限
        limit: u64,
    },

    /// 其他 rank 在集合操作中报告失败
    #[error("rank {rank} 失败: {message}")]
    PeerFailed {
        /// 失败的 rank
        rank: usize,
        /// 该 rank 报告的错误
        message: String,
    },

    /// 缺少变量
    #[error("缺少变量: {name}")]
    MissingVariable {
        /// 变量名
        name: String,
    },

    /// 未知边界标记
    #[error("未知边界标记: {name}")]
    UnknownMarker {
        /// 标记名
        name: String,
    },

    /// 数据无效
    #[error("数据无效: {message}")]
    InvalidData {
        /// 具体描述
        message: String,
    },

    /// 解析错误
    #[error("文件解析错误: {file}:{line} - {message}")]
    ParseError {
        /// 文件
        file: String,
        /// 行号
        line: usize,
        /// 描述
        message: String,
    },

    /// 校验和错误
    #[error("校验和错误: 期望 {expected:08x}, 实际 {found:08x}")]
    Checksum {
        /// 文件记录的校验和
        expected: u32,
        /// 计算得到的校验和
        found: u32,
    },

    /// 运行时（集合通信）错误
    #[error("运行时错误: {0}")]
    Runtime(#[from] RuntimeError),

    /// 网格错误
    #[error("网格错误: {0}")]
    Mesh(#[from] MeshError),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 收敛历史错误
    #[error("收敛历史错误: {0}")]
    History(#[from] HistoryError),
}

impl IoError {
    /// 文件读写失败
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// 调用约定被破坏
    pub fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation {
            message: message.into(),
        }
    }

    /// 数据无效
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// 格式不可用
    pub fn unavailable(format: impl ToString) -> Self {
        Self::CapabilityUnavailable {
            format: format.to_string(),
        }
    }

    /// 是否为致命错误（中止整个输出过程）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ContractViolation { .. }
                | Self::InconsistentElementCount { .. }
                | Self::CapacityExceeded { .. }
                | Self::PeerFailed { .. }
                | Self::Runtime(_)
                | Self::Mesh(_)
                | Self::Config(_)
        )
    }
}

impl From<IoError> for MhError {
    fn from(err: IoError) -> Self {
        match err {
            IoError::CapabilityUnavailable { format } => MhError::unsupported_format(format),
            IoError::Io { path, source } => MhError::io_with_source(path.display().to_string(), source),
            IoError::ContractViolation { message } => MhError::contract(message),
            e @ IoError::InconsistentElementCount { .. } => MhError::contract(e.to_string()),
            IoError::CapacityExceeded { required, limit } => {
                MhError::capacity("global output buffer", required, limit)
            }
            e @ IoError::PeerFailed { .. } => MhError::contract(e.to_string()),
            IoError::MissingVariable { name } => MhError::invalid_input(format!("缺少变量: {name}")),
            IoError::UnknownMarker { name } => MhError::invalid_input(format!("未知边界标记: {name}")),
            IoError::InvalidData { message } => MhError::invalid_input(message),
            IoError::ParseError { file, line, message } => MhError::parse(file, line, message),
            e @ IoError::Checksum { .. } => MhError::invalid_input(e.to_string()),
            IoError::Runtime(e) => e.into(),
            IoError::Mesh(e) => e.into(),
            IoError::Config(e) => e.into(),
            IoError::History(e) => e.into(),
        }
    }
}
