// crates/mh_runtime/src/indices.rs

//! 节点索引 - 进程本地编号与全局编号
//!
//! 分区网格同时存在两套节点编号：进程本地索引（仅在本进程内有意义）
//! 和全局索引（跨进程唯一，由各进程拥有节点数的前缀和分配）。
//! 两者用不同的新类型表示，避免混用。
//!
//! # 示例
//!
//! ```rust
//! use mh_runtime::indices::{GlobalNodeId, LocalNodeId};
//!
//! let l = LocalNodeId::new(3);
//! let g = GlobalNodeId::new(17);
//!
//! assert!(l.is_valid());
//! assert_eq!(g.get(), 17);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// 无效索引标记
pub const INVALID_INDEX: usize = usize::MAX;

// =============================================================================
// 宏：生成索引类型
// =============================================================================

macro_rules! define_index {
    ($(#[$meta:meta])* $name:ident, $doc:literal) => {
        #[doc = $doc]
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub usize);

        impl $name {
            /// 无效索引常量
            pub const INVALID: Self = Self(INVALID_INDEX);

            /// 创建新索引
            #[inline]
            pub const fn new(idx: usize) -> Self {
                Self(idx)
            }

            /// 获取索引值
            #[inline]
            pub const fn get(self) -> usize {
                self.0
            }

            /// 检查是否有效
            #[inline]
            pub const fn is_valid(self) -> bool {
                self.0 != INVALID_INDEX
            }
        }

        impl From<usize> for $name {
            #[inline]
            fn from(idx: usize) -> Self { Self::new(idx) }
        }

        impl From<$name> for usize {
            #[inline]
            fn from(idx: $name) -> usize { idx.get() }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}({})", stringify!($name), self.0)
                } else {
                    write!(f, "{}(INVALID)", stringify!($name))
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}", self.0)
                } else {
                    write!(f, "INVALID")
                }
            }
        }

        impl Default for $name {
            fn default() -> Self { Self::INVALID }
        }
    };
}

// =============================================================================
// 索引类型定义
// =============================================================================

define_index!(LocalNodeId, "进程本地节点索引（含 halo 副本）");
define_index!(GlobalNodeId, "全局节点编号（跨进程唯一，无 halo 重复）");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_id() {
        let idx = GlobalNodeId::new(42);
        assert!(idx.is_valid());
        assert_eq!(idx.get(), 42);
        assert!(!GlobalNodeId::INVALID.is_valid());
        assert!(!GlobalNodeId::default().is_valid());
    }

    #[test]
    fn test_display() {
        assert_eq!(LocalNodeId::new(7).to_string(), "7");
        assert_eq!(LocalNodeId::INVALID.to_string(), "INVALID");
        assert_eq!(format!("{:?}", GlobalNodeId::new(3)), "GlobalNodeId(3)");
    }

    #[test]
    fn test_from_usize() {
        let idx: GlobalNodeId = 10.into();
        let val: usize = idx.into();
        assert_eq!(val, 10);
    }
}
