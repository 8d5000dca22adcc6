// crates/mh_io/src/capability.rs

//! 输出格式能力检测
//!
//! 结构化互操作格式与可视化二进制格式依赖可选编码器，分别由 cargo feature
//! `interop` 和 `viz-binary` 控制。除构建期开关外，配置中的 `disabled_formats`
//! 可在运行时把格式标记为不可用（例如目标平台缺少对应库）。
//!
//! 不可用格式不会导致崩溃：写出器在首次调用时返回
//! [`IoError::CapabilityUnavailable`](crate::IoError::CapabilityUnavailable)。

use mh_config::OutputFormat;

/// 输出格式能力表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    interop: bool,
    viz_binary: bool,
    disabled: Vec<OutputFormat>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}

impl Capabilities {
    /// 按构建期 feature 检测
    pub fn detect() -> Self {
        Self {
            interop: cfg!(feature = "interop"),
            viz_binary: cfg!(feature = "viz-binary"),
            disabled: Vec::new(),
        }
    }

    /// 追加运行时禁用的格式
    pub fn with_disabled(mut self, formats: &[OutputFormat]) -> Self {
        for &f in formats {
            if !self.disabled.contains(&f) {
                self.disabled.push(f);
            }
        }
        self
    }

    /// 格式在构建期是否编译进来
    pub fn is_compiled(&self, format: OutputFormat) -> bool {
        match format {
            OutputFormat::Restart | OutputFormat::VisualizationAscii => true,
            OutputFormat::Interop => self.interop,
            OutputFormat::VisualizationBinary => self.viz_binary,
        }
    }

    /// 格式当前是否可用
    pub fn is_available(&self, format: OutputFormat) -> bool {
        self.is_compiled(format) && !self.disabled.contains(&format)
    }

    /// 当前可用的格式列表
    pub fn available(&self) -> Vec<OutputFormat> {
        OutputFormat::ALL
            .into_iter()
            .filter(|&f| self.is_available(f))
            .collect()
    }
}
