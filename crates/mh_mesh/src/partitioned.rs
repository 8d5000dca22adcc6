// crates/mh_mesh/src/partitioned.rs

//! 分区网格与本地解
//!
//! 每个 rank 持有一个 [`PartitionedMesh`]：本地节点坐标、本地编号的单元连接、
//! 本地→全局节点编号映射以及每个节点的拥有者 rank。
//!
//! # 编号约定
//!
//! - rank r 拥有的节点恰好占据全局编号 `[offset_r, offset_r + owned_r)`，
//!   其中 `offset_r` 为 rank 0..r 拥有节点数的前缀和
//! - halo 节点的全局编号等于其拥有者上对应节点的编号
//! - 连接表使用本地索引（`0..n_local`）

use mh_runtime::{GlobalNodeId, LocalNodeId};
use serde::{Deserialize, Serialize};

use crate::element::ElementSet;
use crate::error::{MeshError, MeshResult};

// =============================================================================
// 边界标记
// =============================================================================

/// 命名边界标记
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryMarker {
    /// 标记名称
    pub name: String,
    /// 边界单元（本地或全局编号，视所属网格而定）
    pub elements: ElementSet,
}

impl BoundaryMarker {
    /// 创建空标记
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elements: ElementSet::new(),
        }
    }

    /// 标记引用的去重节点，升序
    pub fn nodes(&self) -> Vec<usize> {
        let mut nodes: Vec<usize> = self
            .elements
            .blocks()
            .iter()
            .flat_map(|b| b.connectivity.iter().copied())
            .collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }
}

// =============================================================================
// 分区网格
// =============================================================================

/// 单个 rank 上的分区网格
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionedMesh {
    /// 本分区所属 rank
    pub rank: usize,
    /// 空间维数（2 或 3）
    pub dim: usize,
    /// 节点坐标，交错存储 `[x0, y0, (z0), x1, ...]`
    pub coords: Vec<f64>,
    /// 本地→全局编号
    pub global_ids: Vec<GlobalNodeId>,
    /// 每个本地节点的拥有者 rank
    pub owner: Vec<usize>,
    /// 单元连接（本地编号）
    pub elements: ElementSet,
    /// 节点对偶体积（可选）
    pub volumes: Option<Vec<f64>>,
    /// 边界标记（本地编号）
    pub markers: Vec<BoundaryMarker>,
}

impl PartitionedMesh {
    /// 创建空分区
    pub fn new(rank: usize, dim: usize) -> Self {
        Self {
            rank,
            dim,
            coords: Vec::new(),
            global_ids: Vec::new(),
            owner: Vec::new(),
            elements: ElementSet::new(),
            volumes: None,
            markers: Vec::new(),
        }
    }

    /// 追加本地节点，返回其本地索引
    ///
    /// 坐标分量少于空间维数时返回 [`MeshError::SizeMismatch`]，多余分量被忽略。
    pub fn add_node(&mut self, coord: &[f64], global: GlobalNodeId, owner: usize) -> MeshResult<LocalNodeId> {
        let c = coord
            .get(..self.dim)
            .ok_or_else(|| MeshError::size_mismatch("coord", self.dim, coord.len()))?;
        let id = LocalNodeId::new(self.global_ids.len());
        self.coords.extend_from_slice(c);
        self.global_ids.push(global);
        self.owner.push(owner);
        Ok(id)
    }

    /// 本地节点数（含 halo）
    #[inline]
    pub fn n_local(&self) -> usize {
        self.global_ids.len()
    }

    /// 本 rank 拥有的节点数
    pub fn n_owned(&self) -> usize {
        self.owner.iter().filter(|&&o| o == self.rank).count()
    }

    /// 是否为本 rank 拥有的节点
    #[inline]
    pub fn is_owned(&self, local: LocalNodeId) -> bool {
        self.owner[local.get()] == self.rank
    }

    /// 本地节点坐标
    #[inline]
    pub fn coord(&self, local: LocalNodeId) -> &[f64] {
        let i = local.get() * self.dim;
        &self.coords[i..i + self.dim]
    }

    /// 本地节点的全局编号
    #[inline]
    pub fn global_id(&self, local: LocalNodeId) -> GlobalNodeId {
        self.global_ids[local.get()]
    }

    /// 本 rank 拥有的本地节点，按本地索引升序
    pub fn owned_nodes(&self) -> impl Iterator<Item = LocalNodeId> + '_ {
        (0..self.n_local())
            .map(LocalNodeId::new)
            .filter(move |&l| self.is_owned(l))
    }

    /// 按名称查找边界标记
    pub fn marker(&self, name: &str) -> Option<&BoundaryMarker> {
        self.markers.iter().find(|m| m.name == name)
    }

    /// 结构检查：维数、数组长度、连接索引范围
    ///
    /// 不检查声明数量头与连接体的一致性，该项由合并器判定。
    pub fn validate(&self) -> MeshResult<()> {
        if self.dim != 2 && self.dim != 3 {
            return Err(MeshError::InvalidDimension { dim: self.dim });
        }
        let n = self.n_local();
        if self.coords.len() != n * self.dim {
            return Err(MeshError::size_mismatch("coords", n * self.dim, self.coords.len()));
        }
        if self.owner.len() != n {
            return Err(MeshError::size_mismatch("owner", n, self.owner.len()));
        }
        if let Some(v) = &self.volumes {
            if v.len() != n {
                return Err(MeshError::size_mismatch("volumes", n, v.len()));
            }
        }
        if self.global_ids.iter().any(|g| !g.is_valid()) {
            return Err(MeshError::invalid_partition(self.rank, "存在无效全局编号"));
        }

        let sets = std::iter::once(&self.elements).chain(self.markers.iter().map(|m| &m.elements));
        for set in sets {
            for block in set.blocks() {
                if let Some(&bad) = block.connectivity.iter().find(|&&l| l >= n) {
                    return Err(MeshError::IndexOutOfRange {
                        what: "local node",
                        index: bad,
                        len: n,
                    });
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// 本地解
// =============================================================================

/// 命名节点场
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedField {
    /// 变量名
    pub name: String,
    /// 每个本地节点一个值
    pub values: Vec<f64>,
}

impl NamedField {
    /// 创建命名场
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// 单个 rank 上的本地解
///
/// `conserved` 为守恒变量（按求解器约定的顺序），
/// `auxiliary` 为物理层额外提供的量（壁面摩擦系数、y+ 等）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalSolution {
    /// 守恒变量
    pub conserved: Vec<NamedField>,
    /// 辅助量
    pub auxiliary: Vec<NamedField>,
}

impl LocalSolution {
    /// 按名称查找辅助量
    pub fn auxiliary(&self, name: &str) -> Option<&[f64]> {
        self.auxiliary
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.values.as_slice())
    }

    /// 检查所有场长度等于本地节点数
    pub fn validate(&self, n_local: usize) -> MeshResult<()> {
        for f in self.conserved.iter().chain(&self.auxiliary) {
            if f.values.len() != n_local {
                return Err(MeshError::size_mismatch(f.name.clone(), n_local, f.values.len()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementType;

    fn tiny() -> PartitionedMesh {
        let mut m = PartitionedMesh::new(0, 2);
        m.add_node(&[0.0, 0.0], GlobalNodeId::new(0), 0).unwrap();
        m.add_node(&[1.0, 0.0], GlobalNodeId::new(1), 0).unwrap();
        m.add_node(&[0.0, 1.0, 0.0], GlobalNodeId::new(2), 1).unwrap();
        m.elements.push(ElementType::Triangle, &[0, 1, 2]);
        m
    }

    #[test]
    fn test_short_coordinate_rejected() {
        let mut m = PartitionedMesh::new(0, 3);
        let err = m.add_node(&[0.0, 1.0], GlobalNodeId::new(0), 0).unwrap_err();
        assert!(matches!(err, MeshError::SizeMismatch { expected: 3, actual: 2, .. }));
        assert_eq!(m.n_local(), 0);
        assert!(m.coords.is_empty());
    }

    #[test]
    fn test_ownership() {
        let m = tiny();
        assert_eq!(m.n_local(), 3);
        assert_eq!(m.n_owned(), 2);
        let owned: Vec<_> = m.owned_nodes().map(|l| l.get()).collect();
        assert_eq!(owned, vec![0, 1]);
        assert_eq!(m.coord(LocalNodeId::new(2)), &[0.0, 1.0]);
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_validate_out_of_range() {
        let mut m = tiny();
        m.elements.push(ElementType::Triangle, &[0, 1, 5]);
        assert!(matches!(m.validate(), Err(MeshError::IndexOutOfRange { index: 5, .. })));
    }

    #[test]
    fn test_validate_dimension() {
        let mut m = tiny();
        m.dim = 4;
        assert!(matches!(m.validate(), Err(MeshError::InvalidDimension { dim: 4 })));
    }

    #[test]
    fn test_marker_nodes() {
        let mut marker = BoundaryMarker::new("wall");
        marker.elements.push(ElementType::Line, &[2, 1]);
        marker.elements.push(ElementType::Line, &[1, 0]);
        assert_eq!(marker.nodes(), vec![0, 1, 2]);
    }

    #[test]
    fn test_solution_validate() {
        let sol = LocalSolution {
            conserved: vec![NamedField::new("Density", vec![1.0; 3])],
            auxiliary: vec![NamedField::new("Y_Plus", vec![0.0; 2])],
        };
        assert!(sol.validate(3).is_err());
        assert!(sol.auxiliary("Y_Plus").is_some());
        assert!(sol.auxiliary("Missing").is_none());
    }
}
