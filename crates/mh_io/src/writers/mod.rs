// crates/mh_io/src/writers/mod.rs

//! 体输出写出器
//!
//! 所有格式实现 [`FormatWriter`]：
//!
//! | 格式 | 基础记录 | 每步文件 |
//! |------|----------|----------|
//! | 重启 | 无 | `<stem>.dat` / `<stem>.bin`（覆盖） |
//! | 互操作 | `<stem>_grid.mhx` | `<stem>_sol.mhx`（覆盖） |
//! | 可视化 ASCII | 无 | `<stem>_<iter>.dat` |
//! | 可视化二进制 | `<stem>_grid.mhv` | `<stem>_<iter>.mhv` |
//!
//! 基础记录的写出状态保存在各写出器实例中，网格签名变化时重写。
//! 所有文件先写入同目录下的 `.tmp` 文件，成功后重命名。

pub mod restart;
pub mod viz_ascii;

#[cfg(feature = "interop")]
pub mod interop;
#[cfg(feature = "viz-binary")]
pub mod viz_binary;

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use mh_config::{OutputConfig, OutputFormat};
use mh_mesh::GlobalMesh;

use crate::buffer::GlobalField;
use crate::capability::Capabilities;
use crate::error::{IoError, IoResult};

pub use restart::{read_restart, RestartData, RestartWriter};
pub use viz_ascii::AsciiVizWriter;

// =============================================================================
// FormatWriter Trait
// =============================================================================

/// 一步输出中的全局网格及其签名，签名每步只计算一次
#[derive(Debug, Clone, Copy)]
pub struct StepMesh<'a> {
    /// 全局网格
    pub mesh: &'a GlobalMesh,
    /// 网格签名
    pub signature: u64,
}

impl<'a> StepMesh<'a> {
    /// 计算签名
    pub fn new(mesh: &'a GlobalMesh) -> Self {
        Self {
            mesh,
            signature: mesh.signature(),
        }
    }
}

impl std::ops::Deref for StepMesh<'_> {
    type Target = GlobalMesh;

    fn deref(&self) -> &GlobalMesh {
        self.mesh
    }
}

/// 体输出写出器
pub trait FormatWriter: Send {
    /// 输出格式
    fn format(&self) -> OutputFormat;

    /// 是否需要节点体积
    fn needs_volumes(&self) -> bool {
        false
    }

    /// 已写出基础记录对应的网格签名
    fn base_signature(&self) -> Option<u64>;

    /// 写出基础记录（拓扑、坐标）
    ///
    /// 同一网格已写过时为空操作，返回 `None`。
    fn write_base(&mut self, mesh: StepMesh<'_>) -> IoResult<Option<PathBuf>>;

    /// 写出一步的解
    fn write_solution(&mut self, mesh: StepMesh<'_>, field: &GlobalField, iteration: u64) -> IoResult<Vec<PathBuf>>;

    /// 写出一步：必要时先写基础记录
    fn write_step(&mut self, mesh: StepMesh<'_>, field: &GlobalField, iteration: u64) -> IoResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        if self.base_signature() != Some(mesh.signature) {
            written.extend(self.write_base(mesh)?);
        }
        written.extend(self.write_solution(mesh, field, iteration)?);
        Ok(written)
    }
}

/// 不可用格式的占位写出器：每次调用都返回 `CapabilityUnavailable`
#[derive(Debug, Clone, Copy)]
pub struct UnavailableWriter {
    format: OutputFormat,
}

impl UnavailableWriter {
    /// 创建占位写出器
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl FormatWriter for UnavailableWriter {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn base_signature(&self) -> Option<u64> {
        None
    }

    fn write_base(&mut self, _mesh: StepMesh<'_>) -> IoResult<Option<PathBuf>> {
        Err(IoError::unavailable(self.format))
    }

    fn write_solution(&mut self, _mesh: StepMesh<'_>, _field: &GlobalField, _iteration: u64) -> IoResult<Vec<PathBuf>> {
        Err(IoError::unavailable(self.format))
    }
}

// =============================================================================
// 工厂
// =============================================================================

/// 按配置创建写出器
///
/// 格式不可用时返回 [`UnavailableWriter`]，错误推迟到首次写出。
pub fn create_writer(
    format: OutputFormat,
    config: &OutputConfig,
    caps: &Capabilities,
    zone: usize,
    n_zones: usize,
) -> Box<dyn FormatWriter> {
    if !caps.is_available(format) {
        return Box::new(UnavailableWriter::new(format));
    }
    let dir = config.directory.clone();
    let stem = zone_stem(config.stem(format), zone, n_zones);
    match format {
        OutputFormat::Restart => Box::new(RestartWriter::new(dir, stem, config.restart.encoding, config.restart.precision)),
        OutputFormat::VisualizationAscii => Box::new(AsciiVizWriter::new(dir, stem)),
        OutputFormat::Interop => interop_writer(dir, stem),
        OutputFormat::VisualizationBinary => binary_writer(dir, stem),
    }
}

#[cfg(feature = "interop")]
fn interop_writer(dir: PathBuf, stem: String) -> Box<dyn FormatWriter> {
    Box::new(interop::InteropWriter::new(dir, stem))
}

#[cfg(not(feature = "interop"))]
fn interop_writer(_dir: PathBuf, _stem: String) -> Box<dyn FormatWriter> {
    Box::new(UnavailableWriter::new(OutputFormat::Interop))
}

#[cfg(feature = "viz-binary")]
fn binary_writer(dir: PathBuf, stem: String) -> Box<dyn FormatWriter> {
    Box::new(viz_binary::BinaryVizWriter::new(dir, stem))
}

#[cfg(not(feature = "viz-binary"))]
fn binary_writer(_dir: PathBuf, _stem: String) -> Box<dyn FormatWriter> {
    Box::new(UnavailableWriter::new(OutputFormat::VisualizationBinary))
}

// =============================================================================
// 文件名与原子写出
// =============================================================================

/// 多区域时在前缀后追加 `_zone<N>`
pub fn zone_stem(stem: &str, zone: usize, n_zones: usize) -> String {
    if n_zones > 1 {
        format!("{}_zone{}", stem, zone)
    } else {
        stem.to_string()
    }
}

/// 按迭代号命名的每步文件；同一迭代重复写出时追加 `_r<n>`
#[derive(Debug, Default, Clone)]
pub(crate) struct StepNamer {
    repeats: HashMap<u64, u32>,
}

impl StepNamer {
    pub(crate) fn next(&mut self, dir: &Path, stem: &str, iteration: u64, ext: &str) -> PathBuf {
        let n = self.repeats.entry(iteration).or_insert(0);
        let name = if *n == 0 {
            format!("{}_{:05}.{}", stem, iteration, ext)
        } else {
            format!("{}_{:05}_r{}.{}", stem, iteration, n, ext)
        };
        *n += 1;
        dir.join(name)
    }
}

/// 先写临时文件，成功后重命名为目标文件
///
/// 失败时删除临时文件，错误中带目标文件名。
pub(crate) fn write_atomic<F>(path: &Path, body: F) -> IoResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| IoError::io(path, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = File::create(&tmp).and_then(|file| {
        let mut writer = BufWriter::new(file);
        body(&mut writer)?;
        writer.flush()
    });

    match result {
        Ok(()) => fs::rename(&tmp, path).map_err(|e| IoError::io(path, e)),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(IoError::io(path, e))
        }
    }
}
