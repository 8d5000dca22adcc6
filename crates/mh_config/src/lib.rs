// crates/mh_config/src/lib.rs

//! MariHydro Config Layer (Layer 4)
//!
//! 配置层，描述结果输出装配的全部可调参数。
//!
//! # 模块概览
//!
//! - [`output_config`]: OutputConfig 及其各节（重启、互操作、可视化、表面、历史）
//! - [`error`]: 配置错误类型
//!
//! # 层级架构
//!
//! ```text
//! Layer 5: mh_cli      ─> 读取 OutputConfig
//! Layer 4: mh_config   ─> OutputConfig, SolverKind, FreeStream (本层)
//! Layer 3: mh_io       ─> 按配置选择写出器
//! Layer 1: mh_foundation
//! ```
//!
//! # 设计原则
//!
//! 1. **无泛型**: 本层所有类型都不包含泛型参数
//! 2. **全默认**: 每个字段都有 serde 默认值
//! 3. **集中校验**: `validate()` 在加载时一次性检查

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod output_config;

/// 层级标识
pub const LAYER: u8 = 4;

// 重导出核心类型
pub use error::ConfigError;
pub use output_config::{
    FormatToggle, FreeStream, HistoryConfig, HistoryStyle, OutputConfig, OutputFormat,
    RestartConfig, RestartEncoding, SolverKind, SurfaceConfig, SurfaceMode, VisualizationConfig,
};
