// crates/mh_io/src/writers/viz_binary.rs

//! 可视化二进制格式（需启用 `viz-binary` feature）
//!
//! 与 ASCII 变体内容相同的定长记录编码，头部为 `#[repr(C)]` Pod 结构。
//!
//! ```text
//! <stem>_grid.mhv:  [GridHeader 88B][坐标 f64 × N × dim][各类型连接 u64][CRC32]
//! <stem>_<iter>.mhv: [StepHeader 40B][变量名 (u32 长度 + UTF-8)…][f64 × N × 变量数][CRC32]
//! ```
//!
//! 数组按本机字节序写出（目标平台均为小端）。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use mh_config::OutputFormat;
use mh_mesh::{ElementBlock, ElementSet, ElementType};
use tracing::info;

use crate::buffer::GlobalField;
use crate::crc::crc32;
use crate::error::{IoError, IoResult};
use crate::writers::{write_atomic, FormatWriter, StepMesh, StepNamer};

const GRID_MAGIC: [u8; 4] = *b"MHVG";
const STEP_MAGIC: [u8; 4] = *b"MHVS";
const VIZ_VERSION: u32 = 1;

/// 网格文件头
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GridHeader {
    /// 魔数
    pub magic: [u8; 4],
    /// 版本
    pub version: u32,
    /// 空间维数
    pub dim: u32,
    /// 保留
    pub reserved: u32,
    /// 节点数
    pub n_nodes: u64,
    /// 网格签名
    pub signature: u64,
    /// 各类型单元数（按 `ElementType::ALL` 顺序）
    pub counts: [u64; 7],
}

/// 每步文件头
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct StepHeader {
    /// 魔数
    pub magic: [u8; 4],
    /// 版本
    pub version: u32,
    /// 变量数
    pub n_vars: u32,
    /// 守恒变量数
    pub n_conserved: u32,
    /// 迭代号
    pub iteration: u64,
    /// 节点数
    pub n_nodes: u64,
    /// 对应网格的签名
    pub signature: u64,
}

/// 可视化二进制写出器
#[derive(Debug, Clone)]
pub struct BinaryVizWriter {
    directory: PathBuf,
    stem: String,
    base: Option<u64>,
    namer: StepNamer,
}

impl BinaryVizWriter {
    /// 创建写出器
    pub fn new(directory: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            stem: stem.into(),
            base: None,
            namer: StepNamer::default(),
        }
    }

    /// 网格文件路径
    pub fn grid_path(&self) -> PathBuf {
        self.directory.join(format!("{}_grid.mhv", self.stem))
    }
}

impl FormatWriter for BinaryVizWriter {
    fn format(&self) -> OutputFormat {
        OutputFormat::VisualizationBinary
    }

    fn base_signature(&self) -> Option<u64> {
        self.base
    }

    fn write_base(&mut self, mesh: StepMesh<'_>) -> IoResult<Option<PathBuf>> {
        let signature = mesh.signature;
        if self.base == Some(signature) {
            return Ok(None);
        }

        let header = GridHeader {
            magic: GRID_MAGIC,
            version: VIZ_VERSION,
            dim: mesh.dim as u32,
            reserved: 0,
            n_nodes: mesh.n_nodes_owned as u64,
            signature,
            counts: mesh.elements.counts().map(|c| c as u64),
        };
        let mut data = Vec::new();
        data.extend_from_slice(bytemuck::bytes_of(&header));
        data.extend_from_slice(bytemuck::cast_slice(&mesh.coords));
        for block in mesh.elements.blocks() {
            let conn: Vec<u64> = block.connectivity.iter().map(|&g| g as u64).collect();
            data.extend_from_slice(bytemuck::cast_slice(&conn));
        }
        let crc = crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        let path = self.grid_path();
        write_atomic(&path, |w| w.write_all(&data))?;
        self.base = Some(signature);
        info!(path = %path.display(), "写出可视化二进制网格文件");
        Ok(Some(path))
    }

    fn write_solution(&mut self, mesh: StepMesh<'_>, field: &GlobalField, iteration: u64) -> IoResult<Vec<PathBuf>> {
        field.validate(mesh.n_nodes_owned)?;
        let header = StepHeader {
            magic: STEP_MAGIC,
            version: VIZ_VERSION,
            n_vars: field.n_vars() as u32,
            n_conserved: field.n_conserved as u32,
            iteration,
            n_nodes: mesh.n_nodes_owned as u64,
            signature: mesh.signature,
        };
        let mut data = Vec::new();
        data.extend_from_slice(bytemuck::bytes_of(&header));
        for name in &field.names {
            data.extend_from_slice(&(name.len() as u32).to_le_bytes());
            data.extend_from_slice(name.as_bytes());
        }
        for col in &field.data {
            data.extend_from_slice(bytemuck::cast_slice(col));
        }
        let crc = crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        let path = self.namer.next(&self.directory, &self.stem, iteration, "mhv");
        write_atomic(&path, |w| w.write_all(&data))?;
        info!(path = %path.display(), "写出可视化二进制步文件");
        Ok(vec![path])
    }
}

// =============================================================================
// 读取
// =============================================================================

/// 读回的网格文件
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryGrid {
    /// 文件头
    pub header: GridHeader,
    /// 交错坐标
    pub coords: Vec<f64>,
    /// 单元
    pub elements: ElementSet,
}

/// 读回的步文件
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryStep {
    /// 文件头
    pub header: StepHeader,
    /// 变量名
    pub names: Vec<String>,
    /// 变量值
    pub data: Vec<Vec<f64>>,
}

/// 校验 CRC 并返回正文
fn verified_body(path: &Path) -> IoResult<Vec<u8>> {
    let mut bytes = fs::read(path).map_err(|e| IoError::io(path, e))?;
    if bytes.len() < 4 {
        return Err(IoError::invalid_data(format!("{} 太小", path.display())));
    }
    let tail = bytes.split_off(bytes.len() - 4);
    let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let found = crc32(&bytes);
    if expected != found {
        return Err(IoError::Checksum { expected, found });
    }
    Ok(bytes)
}

fn slice(body: &[u8], pos: &mut usize, len: usize) -> IoResult<std::ops::Range<usize>> {
    let end = pos
        .checked_add(len)
        .filter(|&e| e <= body.len())
        .ok_or_else(|| IoError::invalid_data(format!("文件在偏移 {} 处截断", pos)))?;
    let range = *pos..end;
    *pos = end;
    Ok(range)
}

/// `count × width` 个 f64/u64 的字节数，溢出视为文件损坏
fn byte_len(count: u64, width: u64) -> IoResult<usize> {
    count
        .checked_mul(width)
        .and_then(|n| n.checked_mul(8))
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| IoError::invalid_data(format!("头部声明的数组过大: {} × {}", count, width)))
}

/// 读取网格文件
pub fn read_grid(path: impl AsRef<Path>) -> IoResult<BinaryGrid> {
    let body = verified_body(path.as_ref())?;
    let mut pos = 0;
    let header: GridHeader = bytemuck::pod_read_unaligned(&body[slice(&body, &mut pos, std::mem::size_of::<GridHeader>())?]);
    if header.magic != GRID_MAGIC || header.version != VIZ_VERSION {
        return Err(IoError::invalid_data("不是可视化二进制网格文件"));
    }

    let coords_len = byte_len(header.n_nodes, u64::from(header.dim))?;
    let coords: Vec<f64> = bytemuck::pod_collect_to_vec(&body[slice(&body, &mut pos, coords_len)?]);

    let mut blocks = Vec::with_capacity(7);
    for (etype, &count) in ElementType::ALL.into_iter().zip(&header.counts) {
        let len = byte_len(u64::from(count), etype.n_nodes() as u64)?;
        let raw: Vec<u64> = bytemuck::pod_collect_to_vec(&body[slice(&body, &mut pos, len)?]);
        blocks.push(ElementBlock {
            etype,
            count: count as usize,
            connectivity: raw.into_iter().map(|g| g as usize).collect(),
        });
    }

    Ok(BinaryGrid {
        header,
        coords,
        elements: ElementSet::from_blocks(blocks),
    })
}

/// 读取步文件
pub fn read_step(path: impl AsRef<Path>) -> IoResult<BinaryStep> {
    let body = verified_body(path.as_ref())?;
    let mut pos = 0;
    let header: StepHeader = bytemuck::pod_read_unaligned(&body[slice(&body, &mut pos, std::mem::size_of::<StepHeader>())?]);
    if header.magic != STEP_MAGIC || header.version != VIZ_VERSION {
        return Err(IoError::invalid_data("不是可视化二进制步文件"));
    }

    let mut names = Vec::with_capacity((header.n_vars as usize).min(body.len() / 4));
    for _ in 0..header.n_vars {
        let r = slice(&body, &mut pos, 4)?;
        let len = u32::from_le_bytes([body[r.start], body[r.start + 1], body[r.start + 2], body[r.start + 3]]) as usize;
        let raw = &body[slice(&body, &mut pos, len)?];
        let name = std::str::from_utf8(raw).map_err(|_| IoError::invalid_data("变量名不是 UTF-8"))?;
        names.push(name.to_string());
    }

    let column = byte_len(header.n_nodes, 1)?;
    let mut data = Vec::with_capacity(names.len());
    for _ in 0..names.len() {
        data.push(bytemuck::pod_collect_to_vec(&body[slice(&body, &mut pos, column)?]));
    }

    Ok(BinaryStep { header, names, data })
}
