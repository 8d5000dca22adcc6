// crates/mh_mesh/src/global.rs

//! 合并后的全局网格
//!
//! 坐标表按全局编号索引（行号 = 全局编号），不含 halo 重复；
//! 连接表只引用 `[0, n_nodes_owned)` 范围内的全局编号。

use serde::{Deserialize, Serialize};

use crate::element::{ElementSet, ElementType};
use crate::error::{MeshError, MeshResult};
use crate::partitioned::BoundaryMarker;

/// 全局网格
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalMesh {
    /// 空间维数
    pub dim: usize,
    /// 所有分区本地节点数之和（含 halo）
    pub n_nodes_with_halos: usize,
    /// 全局唯一节点数
    pub n_nodes_owned: usize,
    /// 坐标，交错存储，长度 `dim * n_nodes_owned`
    pub coords: Vec<f64>,
    /// 单元连接（全局编号）
    pub elements: ElementSet,
    /// 节点对偶体积（写出器需要时合并）
    pub volumes: Option<Vec<f64>>,
    /// 边界标记（全局编号）
    pub markers: Vec<BoundaryMarker>,
    /// 各 rank 拥有节点的前缀和偏移，长度 `size + 1`
    pub rank_offsets: Vec<usize>,
}

impl GlobalMesh {
    /// 某类型单元数
    #[inline]
    pub fn n_elements(&self, etype: ElementType) -> usize {
        self.elements.block(etype).count
    }

    /// 单元总数
    #[inline]
    pub fn n_elements_total(&self) -> usize {
        self.elements.total()
    }

    /// 某类型连接表
    #[inline]
    pub fn connectivity(&self, etype: ElementType) -> &[usize] {
        &self.elements.block(etype).connectivity
    }

    /// 节点坐标
    #[inline]
    pub fn coord(&self, id: usize) -> &[f64] {
        let i = id * self.dim;
        &self.coords[i..i + self.dim]
    }

    /// 按名称查找边界标记
    pub fn marker(&self, name: &str) -> Option<&BoundaryMarker> {
        self.markers.iter().find(|m| m.name == name)
    }

    /// 网格签名（FNV-1a，覆盖维数、节点数与各类型单元数）
    ///
    /// 解文件记录该签名，读取时用于确认与网格文件匹配。
    pub fn signature(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut h = OFFSET;
        let mut feed = |v: u64| {
            for b in v.to_le_bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(PRIME);
            }
        };
        feed(self.dim as u64);
        feed(self.n_nodes_owned as u64);
        for c in self.elements.counts() {
            feed(c as u64);
        }
        h
    }

    /// 不变量检查：坐标长度、连接编号范围、数量头一致
    pub fn validate(&self) -> MeshResult<()> {
        let n = self.n_nodes_owned;
        if self.coords.len() != n * self.dim {
            return Err(MeshError::size_mismatch("global coords", n * self.dim, self.coords.len()));
        }
        if let Some(v) = &self.volumes {
            if v.len() != n {
                return Err(MeshError::size_mismatch("global volumes", n, v.len()));
            }
        }
        let sets = std::iter::once(&self.elements).chain(self.markers.iter().map(|m| &m.elements));
        for set in sets {
            for block in set.blocks() {
                if !block.is_consistent() {
                    return Err(MeshError::size_mismatch(
                        format!("{} connectivity", block.etype),
                        block.count * block.etype.n_nodes(),
                        block.connectivity.len(),
                    ));
                }
                if let Some(&bad) = block.connectivity.iter().find(|&&g| g >= n) {
                    return Err(MeshError::IndexOutOfRange {
                        what: "global node",
                        index: bad,
                        len: n,
                    });
                }
            }
        }
        Ok(())
    }
}
