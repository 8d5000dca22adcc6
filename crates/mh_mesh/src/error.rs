// crates/mh_mesh/src/error.rs
//! 网格数据错误类型
//!
//! 包含分区网格结构、尺寸与索引范围的错误定义。
//! 所有错误可转换为 `mh_foundation::MhError` 向上传播

use mh_foundation::MhError;
use thiserror::Error;

/// 网格模块结果类型
pub type MeshResult<T> = Result<T, MeshError>;

/// 网格错误枚举
#[derive(Error, Debug)]
pub enum MeshError {
    /// 空间维数无效
    #[error("空间维数无效: {dim} (仅支持 2 或 3)")]
    InvalidDimension {
        /// 给定维数
        dim: usize,
    },

    /// 数组长度不一致
    #[error("数组长度不一致: {name} 期望 {expected}, 实际 {actual}")]
    SizeMismatch {
        /// 数组名称
        name: String,
        /// 期望长度
        expected: usize,
        /// 实际长度
        actual: usize,
    },

    /// 索引越界
    #[error("索引越界: {what} 索引 {index} 超出范围 0..{len}")]
    IndexOutOfRange {
        /// 索引所属对象
        what: &'static str,
        /// 越界索引
        index: usize,
        /// 合法上界
        len: usize,
    },

    /// 分区结构无效
    #[error("分区结构无效 (rank {rank}): {message}")]
    InvalidPartition {
        /// 出错的 rank
        rank: usize,
        /// 具体原因
        message: String,
    },

    /// 未知单元类型编码
    #[error("未知单元类型编码: {code}")]
    UnknownElementType {
        /// 编码
        code: u8,
    },
}

/// 便捷构造函数
impl MeshError {
    /// 数组长度不一致
    pub fn size_mismatch(name: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::SizeMismatch {
            name: name.into(),
            expected,
            actual,
        }
    }

    /// 分区结构无效
    pub fn invalid_partition(rank: usize, message: impl Into<String>) -> Self {
        Self::InvalidPartition {
            rank,
            message: message.into(),
        }
    }
}

/// 转换到 Foundation 层错误（Layer 1）
impl From<MeshError> for MhError {
    fn from(err: MeshError) -> Self {
        match err {
            MeshError::IndexOutOfRange { what, index, len } => {
                MhError::index_out_of_bounds(what, index, len)
            }
            other => MhError::invalid_mesh(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeshError::size_mismatch("coords", 12, 10);
        let msg = err.to_string();
        assert!(msg.contains("coords"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn test_into_mh_error() {
        let err: MhError = MeshError::InvalidDimension { dim: 4 }.into();
        assert!(matches!(err, MhError::InvalidMesh(_)));

        let err: MhError = MeshError::IndexOutOfRange { what: "node", index: 9, len: 3 }.into();
        assert!(matches!(err, MhError::IndexOutOfBounds { .. }));
    }
}
