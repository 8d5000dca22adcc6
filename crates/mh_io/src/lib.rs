// crates/mh_io/src/lib.rs

//! MariHydro IO 模块
//!
//! 分布式结果装配与输出：把各分区的网格与解合并到聚合者（rank 0），
//! 再按配置写出重启、互操作、可视化与表面文件，并记录收敛历史。
//!
//! # 模块
//!
//! - [`buffer`]: 聚合者上的全局输出缓冲区
//! - [`merge`]: 几何合并、解合并与派生诊断量
//! - [`writers`]: 体输出格式
//! - [`surface`]: 边界表面导出
//! - [`history`]: 收敛历史
//! - [`dispatcher`]: 一次输出过程的编排
//! - [`capability`]: 可选格式的能力检测
//!
//! # 可选格式
//!
//! - `interop`: 结构化互操作格式
//! - `viz-binary`: 可视化二进制格式
//!
//! 未启用的格式不会导致编译或运行失败，写出时返回
//! [`IoError::CapabilityUnavailable`]。
//!
//! # 使用示例
//!
//! ```rust,no_run
//! use mh_config::OutputConfig;
//! use mh_io::{ResultDispatcher, ZoneInput};
//! use mh_mesh::generation::{analytic_flow_solution, rectangle_partitions};
//! use mh_runtime::{Communicator, ThreadComm};
//!
//! let parts = rectangle_partitions(8, 8, 2).unwrap();
//! let config = OutputConfig::default().with_directory("output");
//! let reports = ThreadComm::run(2, |comm| {
//!     let part = &parts[comm.rank()];
//!     let sol = analytic_flow_solution(part, 0.0);
//!     let mut dispatcher = ResultDispatcher::new(config.clone()).unwrap();
//!     let zone = ZoneInput { mesh: part, solution: &sol };
//!     dispatcher.set_result_files(&comm, &[zone], 0).map(|r| r.artifacts().len())
//! });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod capability;
mod crc;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod merge;
pub mod surface;
pub mod writers;

// 重导出常用类型
pub use buffer::{estimate_bytes, DistributedBuffer, GlobalField};
pub use capability::Capabilities;
pub use dispatcher::{DispatchReport, ResultDispatcher, WriterOutcome, ZoneInput, ZoneReport};
pub use error::{IoError, IoResult};
pub use history::{HistoryError, HistoryLogger, HistoryRecord, HistoryResult};
pub use merge::{agree, GeometryMerger, GeometryPass, LocalFields, MergeOptions, SolutionMerger};
pub use surface::{SurfaceExtractor, SurfaceSubset};
pub use writers::{create_writer, read_restart, FormatWriter, RestartData, StepMesh, UnavailableWriter};

/// 类型别名简化
pub type Result<T> = IoResult<T>;

/// 层级标识
pub const LAYER: u8 = 3;
