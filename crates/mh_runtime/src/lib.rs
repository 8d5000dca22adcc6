// crates/mh_runtime/src/lib.rs

//! MariHydro Runtime Layer (Layer 2)
//!
//! 运行时抽象层，提供分布式输出装配所需的集合通信与索引类型。
//!
//! # 模块概览
//!
//! - [`comm`]: Communicator trait、SerialComm、ThreadComm
//! - [`indices`]: 本地/全局节点索引新类型
//! - [`error`]: 运行时错误类型
//!
//! # 层级架构
//!
//! ```text
//! Layer 4: mh_config    ─> OutputConfig
//! Layer 3: mh_mesh/mh_io ─> PartitionedMesh, 合并器, 写出器
//! Layer 2: mh_runtime   ─> Communicator, GlobalNodeId (本层)
//! Layer 1: mh_foundation ─> MhError
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod comm;
pub mod error;
pub mod indices;

/// 层级标识
pub const LAYER: u8 = 2;

// 重导出核心类型
pub use comm::{Communicator, SerialComm, ThreadComm, ROOT};
pub use error::{RuntimeError, RuntimeResult};
pub use indices::{GlobalNodeId, LocalNodeId, INVALID_INDEX};

/// Prelude 模块
pub mod prelude {
    //! 常用类型预导入
    pub use crate::{Communicator, GlobalNodeId, LocalNodeId, RuntimeError, SerialComm, ThreadComm};
}
