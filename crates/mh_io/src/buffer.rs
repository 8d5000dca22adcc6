// crates/mh_io/src/buffer.rs

//! 分布式输出缓冲区
//!
//! [`DistributedBuffer`] 独占一次输出过程中合并得到的全局网格与全局场。
//! 只有聚合者（rank 0）上会装入数据；其他 rank 上的缓冲区始终为空。
//!
//! # 生命周期
//!
//! 1. 几何合并器装入 [`GlobalMesh`]
//! 2. 解合并器装入 [`GlobalField`]（必须已有网格）
//! 3. 写出器只读访问
//! 4. `clean_up()` 释放数组、计数归零；`Drop` 时同样释放，错误路径也不例外

use mh_mesh::GlobalMesh;
use tracing::debug;

use crate::error::{IoError, IoResult};

/// 全局节点场
///
/// `data[v][g]` 为第 v 个变量在全局节点 g 上的值。
/// 前 `n_conserved` 个变量为守恒变量，其后为派生诊断量。
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalField {
    /// 变量名
    pub names: Vec<String>,
    /// 守恒变量个数
    pub n_conserved: usize,
    /// 按变量存储的稠密数组
    pub data: Vec<Vec<f64>>,
}

impl GlobalField {
    /// 变量总数
    #[inline]
    pub fn n_vars(&self) -> usize {
        self.names.len()
    }

    /// 节点数
    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }

    /// 按名称查找变量序号
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// 按名称取变量数组
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.index_of(name).map(|i| self.data[i].as_slice())
    }

    /// 节点 g 上的全部变量值
    pub fn row(&self, g: usize) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().map(move |col| col[g])
    }

    /// 检查每个数组长度等于 `n_nodes`
    pub fn validate(&self, n_nodes: usize) -> IoResult<()> {
        if self.data.len() != self.names.len() {
            return Err(IoError::invalid_data(format!(
                "变量名 {} 个, 数组 {} 个",
                self.names.len(),
                self.data.len()
            )));
        }
        if self.n_conserved > self.names.len() {
            return Err(IoError::invalid_data("守恒变量数超过变量总数"));
        }
        for (name, col) in self.names.iter().zip(&self.data) {
            if col.len() != n_nodes {
                return Err(IoError::invalid_data(format!(
                    "变量 {} 长度 {}, 期望 {}",
                    name,
                    col.len(),
                    n_nodes
                )));
            }
        }
        Ok(())
    }
}

/// 分布式输出缓冲区
#[derive(Debug, Default)]
pub struct DistributedBuffer {
    zone: usize,
    mesh: Option<GlobalMesh>,
    field: Option<GlobalField>,
}

impl DistributedBuffer {
    /// 为指定区域创建空缓冲区
    pub fn new(zone: usize) -> Self {
        Self {
            zone,
            mesh: None,
            field: None,
        }
    }

    /// 区域编号
    pub fn zone(&self) -> usize {
        self.zone
    }

    /// 装入全局网格
    ///
    /// 缓冲区已持有数据时视为调用约定被破坏（上一轮未清理）。
    pub fn install_mesh(&mut self, mesh: GlobalMesh) -> IoResult<()> {
        if self.mesh.is_some() || self.field.is_some() {
            return Err(IoError::contract("缓冲区未清理即装入新网格"));
        }
        self.mesh = Some(mesh);
        Ok(())
    }

    /// 检查能否装入全局场（必须已有网格且节点数一致）
    pub fn check_field(&self, field: &GlobalField) -> IoResult<()> {
        let mesh = self
            .mesh
            .as_ref()
            .ok_or_else(|| IoError::contract("解合并先于几何合并执行"))?;
        if self.field.is_some() {
            return Err(IoError::contract("同一轮中重复装入全局场"));
        }
        field.validate(mesh.n_nodes_owned)
    }

    /// 装入全局场
    pub fn install_field(&mut self, field: GlobalField) -> IoResult<()> {
        self.check_field(&field)?;
        self.field = Some(field);
        Ok(())
    }

    /// 全局网格
    pub fn mesh(&self) -> Option<&GlobalMesh> {
        self.mesh.as_ref()
    }

    /// 全局场
    pub fn field(&self) -> Option<&GlobalField> {
        self.field.as_ref()
    }

    /// 网格与场是否都已就绪
    pub fn is_complete(&self) -> bool {
        self.mesh.is_some() && self.field.is_some()
    }

    /// 全局节点数（清理后为 0）
    pub fn n_nodes(&self) -> usize {
        self.mesh.as_ref().map_or(0, |m| m.n_nodes_owned)
    }

    /// 释放合并数组
    pub fn clean_up(&mut self) {
        if self.mesh.is_some() || self.field.is_some() {
            debug!(zone = self.zone, nodes = self.n_nodes(), "释放全局输出缓冲区");
        }
        self.mesh = None;
        self.field = None;
    }
}

impl Drop for DistributedBuffer {
    fn drop(&mut self) {
        self.clean_up();
    }
}

/// 估算聚合者上全局缓冲区的字节数
///
/// 计入坐标、连接（含 halo 重复的上界）、全部变量与可选体积。
pub fn estimate_bytes(dim: usize, n_nodes: usize, connectivity_len: usize, n_vars: usize, with_volumes: bool) -> u64 {
    let nodes = n_nodes as u64;
    let per_node = dim as u64 + n_vars as u64 + u64::from(with_volumes);
    8 * (nodes * per_node + connectivity_len as u64)
}
