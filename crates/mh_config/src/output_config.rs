// crates/mh_config/src/output_config.rs

//! OutputConfig - 结果输出配置
//!
//! 描述一次运行中哪些输出格式启用、文件名前缀、表面导出与收敛历史的设置。
//! 所有字段都有默认值，JSON 中可只写需要覆盖的部分。
//!
//! # 示例
//!
//! ```rust
//! use mh_config::{OutputConfig, OutputFormat};
//!
//! let json = r#"{ "directory": "out", "visualization": { "binary": { "enabled": true } } }"#;
//! let config: OutputConfig = serde_json::from_str(json).unwrap();
//! assert!(config.validate().is_ok());
//! assert!(config.enabled_formats().contains(&OutputFormat::VisualizationBinary));
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

// =============================================================================
// 枚举
// =============================================================================

/// 求解器类型，决定派生诊断量与表面导出列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    /// 原始流场
    #[default]
    Flow,
    /// 伴随
    Adjoint,
    /// 线化
    Linearized,
}

/// 体输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// 原生重启文件
    Restart,
    /// 结构化互操作格式
    Interop,
    /// 可视化 ASCII
    VisualizationAscii,
    /// 可视化二进制
    VisualizationBinary,
}

impl OutputFormat {
    /// 全部格式，按写出顺序
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Restart,
        OutputFormat::Interop,
        OutputFormat::VisualizationAscii,
        OutputFormat::VisualizationBinary,
    ];

    /// 格式名称
    pub const fn name(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Interop => "interop",
            Self::VisualizationAscii => "visualization_ascii",
            Self::VisualizationBinary => "visualization_binary",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 重启文件编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RestartEncoding {
    /// 制表符分隔文本
    #[default]
    Text,
    /// 定宽二进制
    Binary,
}

/// 表面导出模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceMode {
    /// 合并后由聚合者导出
    #[default]
    Merged,
    /// 各 rank 导出自有边界节点
    PerProcess,
}

/// 收敛历史文件风格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStyle {
    /// 逗号分隔
    #[default]
    Csv,
    /// Tecplot 风格（TITLE / VARIABLES 头）
    Tecplot,
}

// =============================================================================
// 各节配置
// =============================================================================

/// 无量纲自由来流参考状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeStream {
    /// 比热比
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    /// 压力
    #[serde(default = "default_pressure")]
    pub pressure: f64,
    /// 密度
    #[serde(default = "default_density")]
    pub density: f64,
    /// 速度向量
    #[serde(default = "default_velocity")]
    pub velocity: [f64; 3],
}

fn default_gamma() -> f64 { 1.4 }
fn default_pressure() -> f64 { 1.0 / 1.4 }
fn default_density() -> f64 { 1.0 }
fn default_velocity() -> [f64; 3] { [0.5, 0.0, 0.0] }

impl Default for FreeStream {
    fn default() -> Self {
        Self {
            gamma: default_gamma(),
            pressure: default_pressure(),
            density: default_density(),
            velocity: default_velocity(),
        }
    }
}

impl FreeStream {
    /// 来流速度大小
    pub fn speed(&self) -> f64 {
        self.velocity.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// 动压 `0.5 ρ∞ |V∞|²`
    pub fn dynamic_pressure(&self) -> f64 {
        0.5 * self.density * self.speed().powi(2)
    }
}

/// 重启文件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    /// 是否写出
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 文件名前缀
    #[serde(default = "default_restart_stem")]
    pub stem: String,
    /// 编码
    #[serde(default)]
    pub encoding: RestartEncoding,
    /// 文本编码的小数位数（科学计数法尾数）
    #[serde(default = "default_precision")]
    pub precision: usize,
}

fn default_true() -> bool { true }
fn default_restart_stem() -> String { "restart_flow".into() }
fn default_precision() -> usize { 16 }

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stem: default_restart_stem(),
            encoding: RestartEncoding::default(),
            precision: default_precision(),
        }
    }
}

/// 单一格式开关
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatToggle {
    /// 是否写出
    #[serde(default)]
    pub enabled: bool,
    /// 文件名前缀
    #[serde(default = "default_volume_stem")]
    pub stem: String,
}

fn default_volume_stem() -> String { "flow".into() }

impl Default for FormatToggle {
    fn default() -> Self {
        Self {
            enabled: false,
            stem: default_volume_stem(),
        }
    }
}

impl FormatToggle {
    /// 启用的开关
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }
}

/// 可视化输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationConfig {
    /// ASCII 变体
    #[serde(default = "FormatToggle::enabled")]
    pub ascii: FormatToggle,
    /// 二进制变体
    #[serde(default)]
    pub binary: FormatToggle,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            ascii: FormatToggle::enabled(),
            binary: FormatToggle::default(),
        }
    }
}

/// 表面导出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceConfig {
    /// 是否导出
    #[serde(default)]
    pub enabled: bool,
    /// 导出的边界标记名称
    #[serde(default)]
    pub markers: Vec<String>,
    /// 导出 CSV
    #[serde(default = "default_true")]
    pub csv: bool,
    /// 同时以 ASCII 可视化格式导出
    #[serde(default)]
    pub full_format: bool,
    /// 导出模式
    #[serde(default)]
    pub mode: SurfaceMode,
    /// 文件名前缀
    #[serde(default = "default_surface_stem")]
    pub stem: String,
}

fn default_surface_stem() -> String { "surface_flow".into() }

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            markers: Vec::new(),
            csv: true,
            full_format: false,
            mode: SurfaceMode::default(),
            stem: default_surface_stem(),
        }
    }
}

/// 收敛历史配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// 文件名前缀
    #[serde(default = "default_history_stem")]
    pub stem: String,
    /// 文件风格
    #[serde(default)]
    pub style: HistoryStyle,
    /// 双时间步（外/内迭代）
    #[serde(default)]
    pub dual_time: bool,
    /// 内迭代收敛阈值（首个残差的 log10）
    #[serde(default = "default_inner_tolerance")]
    pub inner_tolerance: f64,
    /// 每个外迭代的最大内迭代数
    #[serde(default = "default_max_inner")]
    pub max_inner: usize,
    /// 额外监控的目标量名称
    #[serde(default)]
    pub objectives: Vec<String>,
}

fn default_history_stem() -> String { "history".into() }
fn default_inner_tolerance() -> f64 { -8.0 }
fn default_max_inner() -> usize { 100 }

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            stem: default_history_stem(),
            style: HistoryStyle::default(),
            dual_time: false,
            inner_tolerance: default_inner_tolerance(),
            max_inner: default_max_inner(),
            objectives: Vec::new(),
        }
    }
}

// =============================================================================
// OutputConfig
// =============================================================================

/// 结果输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// 输出目录
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,

    /// 求解器类型
    #[serde(default)]
    pub solver: SolverKind,

    /// 自由来流
    #[serde(default)]
    pub freestream: FreeStream,

    /// 重启文件
    #[serde(default)]
    pub restart: RestartConfig,

    /// 结构化互操作格式
    #[serde(default)]
    pub interop: FormatToggle,

    /// 可视化格式
    #[serde(default)]
    pub visualization: VisualizationConfig,

    /// 表面导出
    #[serde(default)]
    pub surface: SurfaceConfig,

    /// 收敛历史
    #[serde(default)]
    pub history: HistoryConfig,

    /// 运行时禁用的格式（视为库不可用）
    #[serde(default)]
    pub disabled_formats: Vec<OutputFormat>,

    /// 聚合者全局缓冲区上限 [字节]
    #[serde(default)]
    pub max_buffer_bytes: Option<u64>,
}

fn default_output_dir() -> PathBuf { PathBuf::from("output") }

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            solver: SolverKind::default(),
            freestream: FreeStream::default(),
            restart: RestartConfig::default(),
            interop: FormatToggle::default(),
            visualization: VisualizationConfig::default(),
            surface: SurfaceConfig::default(),
            history: HistoryConfig::default(),
            disabled_formats: Vec::new(),
            max_buffer_bytes: None,
        }
    }
}

impl OutputConfig {
    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(ConfigError::Io)?;

        let config: OutputConfig = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(ConfigError::Io)?;
        Ok(())
    }

    /// 设置输出目录
    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = dir.into();
        self
    }

    /// 设置求解器类型
    pub fn with_solver(mut self, kind: SolverKind) -> Self {
        self.solver = kind;
        self
    }

    /// 启用或关闭某一格式
    pub fn with_format(mut self, format: OutputFormat, enabled: bool) -> Self {
        match format {
            OutputFormat::Restart => self.restart.enabled = enabled,
            OutputFormat::Interop => self.interop.enabled = enabled,
            OutputFormat::VisualizationAscii => self.visualization.ascii.enabled = enabled,
            OutputFormat::VisualizationBinary => self.visualization.binary.enabled = enabled,
        }
        self
    }

    /// 配置中启用的格式，按固定顺序
    pub fn enabled_formats(&self) -> Vec<OutputFormat> {
        OutputFormat::ALL
            .into_iter()
            .filter(|f| match f {
                OutputFormat::Restart => self.restart.enabled,
                OutputFormat::Interop => self.interop.enabled,
                OutputFormat::VisualizationAscii => self.visualization.ascii.enabled,
                OutputFormat::VisualizationBinary => self.visualization.binary.enabled,
            })
            .collect()
    }

    /// 格式对应的文件名前缀
    pub fn stem(&self, format: OutputFormat) -> &str {
        match format {
            OutputFormat::Restart => &self.restart.stem,
            OutputFormat::Interop => &self.interop.stem,
            OutputFormat::VisualizationAscii => &self.visualization.ascii.stem,
            OutputFormat::VisualizationBinary => &self.visualization.binary.stem,
        }
    }

    /// 格式是否被运行时禁用
    pub fn is_disabled(&self, format: OutputFormat) -> bool {
        self.disabled_formats.contains(&format)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fs = &self.freestream;
        if fs.gamma <= 1.0 {
            return Err(ConfigError::invalid("freestream.gamma", fs.gamma, "比热比必须大于 1"));
        }
        if fs.density <= 0.0 {
            return Err(ConfigError::invalid("freestream.density", fs.density, "密度必须为正"));
        }
        if fs.pressure <= 0.0 {
            return Err(ConfigError::invalid("freestream.pressure", fs.pressure, "压力必须为正"));
        }
        if fs.dynamic_pressure() <= 0.0 {
            return Err(ConfigError::invalid(
                "freestream.velocity",
                format!("{:?}", fs.velocity),
                "动压必须为正（压力系数以其为分母）",
            ));
        }

        if self.restart.precision == 0 || self.restart.precision > 20 {
            return Err(ConfigError::invalid(
                "restart.precision",
                self.restart.precision,
                "必须在 1..=20 范围内",
            ));
        }

        for format in self.enabled_formats() {
            if self.stem(format).is_empty() {
                return Err(ConfigError::invalid(format!("{}.stem", format), "", "文件名前缀不能为空"));
            }
        }

        if self.surface.enabled {
            if self.surface.markers.is_empty() {
                return Err(ConfigError::invalid("surface.markers", "[]", "启用表面导出时必须指定标记"));
            }
            if !self.surface.csv && !self.surface.full_format {
                return Err(ConfigError::invalid("surface", "csv=false, full_format=false", "至少启用一种表面格式"));
            }
            if self.surface.stem.is_empty() {
                return Err(ConfigError::invalid("surface.stem", "", "文件名前缀不能为空"));
            }
        }

        if self.history.stem.is_empty() {
            return Err(ConfigError::invalid("history.stem", "", "文件名前缀不能为空"));
        }
        if self.history.max_inner == 0 {
            return Err(ConfigError::invalid("history.max_inner", 0, "必须为正"));
        }

        if self.max_buffer_bytes == Some(0) {
            return Err(ConfigError::invalid("max_buffer_bytes", 0, "上限必须为正"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OutputConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.solver, SolverKind::Flow);
        assert_eq!(config.restart.precision, 16);
        assert_eq!(
            config.enabled_formats(),
            vec![OutputFormat::Restart, OutputFormat::VisualizationAscii]
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "solver": "adjoint",
            "restart": { "encoding": "binary" },
            "disabled_formats": ["visualization_binary"],
            "max_buffer_bytes": 1048576
        }"#;
        let config: OutputConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.solver, SolverKind::Adjoint);
        assert_eq!(config.restart.encoding, RestartEncoding::Binary);
        assert_eq!(config.restart.stem, "restart_flow");
        assert!(config.is_disabled(OutputFormat::VisualizationBinary));
        assert_eq!(config.max_buffer_bytes, Some(1 << 20));
        assert!(config.visualization.ascii.enabled);
    }

    #[test]
    fn test_invalid_values() {
        let mut config = OutputConfig::default();
        config.freestream.gamma = 1.0;
        assert!(config.validate().is_err());

        let mut config = OutputConfig::default();
        config.restart.precision = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));

        let mut config = OutputConfig::default();
        config.surface.enabled = true;
        assert!(config.validate().is_err());
        config.surface.markers.push("wall".into());
        assert!(config.validate().is_ok());

        let mut config = OutputConfig::default();
        config.freestream.velocity = [0.0; 3];
        assert!(config.validate().is_err());

        let config = OutputConfig { max_buffer_bytes: Some(0), ..OutputConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = OutputConfig::default()
            .with_directory("results")
            .with_solver(SolverKind::Linearized)
            .with_format(OutputFormat::Interop, true)
            .with_format(OutputFormat::VisualizationAscii, false);
        assert_eq!(config.directory, PathBuf::from("results"));
        assert_eq!(config.enabled_formats(), vec![OutputFormat::Restart, OutputFormat::Interop]);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.json");
        let config = OutputConfig::default().with_format(OutputFormat::VisualizationBinary, true);
        config.save_to_file(&path).unwrap();
        let loaded = OutputConfig::from_file(&path).unwrap();
        assert_eq!(loaded.enabled_formats(), config.enabled_formats());
        assert_eq!(loaded.history.stem, "history");
    }

    #[test]
    fn test_from_file_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(OutputConfig::from_file(&path), Err(ConfigError::Parse(_))));
        assert!(matches!(
            OutputConfig::from_file(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_freestream() {
        let fs = FreeStream { velocity: [3.0, 4.0, 0.0], density: 2.0, ..FreeStream::default() };
        assert!((fs.speed() - 5.0).abs() < 1e-12);
        assert!((fs.dynamic_pressure() - 25.0).abs() < 1e-12);
    }
}
