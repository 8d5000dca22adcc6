// crates/mh_mesh/src/lib.rs

//! MariHydro 网格模块
//!
//! 提供分布式输出装配所需的网格数据模型。
//!
//! # 核心类型
//!
//! - [`PartitionedMesh`]: 单个 rank 上的分区网格（本地编号 + 全局编号映射）
//! - [`GlobalMesh`]: 合并后的无 halo 全局网格
//! - [`LocalSolution`]: 单个 rank 上的守恒变量与辅助量
//! - [`ElementType`] / [`ElementSet`]: 按类型分块的单元连接
//!
//! # 模块结构
//!
//! - [`element`]: 单元类型与连接块
//! - [`partitioned`]: 分区网格、边界标记、本地解
//! - [`global`]: 全局网格
//! - [`generation`]: 测试用分区网格生成
//!
//! # 示例
//!
//! ```rust
//! use mh_mesh::generation::two_partition_scenario;
//!
//! let parts = two_partition_scenario().unwrap();
//! let owned: usize = parts.iter().map(|p| p.n_owned()).sum();
//! assert_eq!(owned, 10);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod element;
pub mod error;
pub mod generation;
pub mod global;
pub mod partitioned;

// 重新导出核心类型
pub use element::{ElementBlock, ElementSet, ElementType};
pub use error::{MeshError, MeshResult};
pub use global::GlobalMesh;
pub use partitioned::{BoundaryMarker, LocalSolution, NamedField, PartitionedMesh};
