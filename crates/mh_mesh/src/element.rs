// crates/mh_mesh/src/element.rs

//! 单元类型与连接块
//!
//! 输出装配只区分七种单元类型，编号与 VTK 单元类型编号一致。
//! 连接关系按类型分块存储：每块带一个声明数量头和扁平的节点索引体。

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, MeshResult};

/// 单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElementType {
    /// 线段（2 节点，边界用）
    Line,
    /// 三角形
    Triangle,
    /// 四边形
    Quadrilateral,
    /// 四面体
    Tetrahedron,
    /// 六面体
    Hexahedron,
    /// 三棱柱
    Prism,
    /// 金字塔
    Pyramid,
}

impl ElementType {
    /// 全部类型，按固定输出顺序
    pub const ALL: [ElementType; 7] = [
        ElementType::Line,
        ElementType::Triangle,
        ElementType::Quadrilateral,
        ElementType::Tetrahedron,
        ElementType::Hexahedron,
        ElementType::Prism,
        ElementType::Pyramid,
    ];

    /// 每个单元的节点数
    #[inline]
    pub const fn n_nodes(self) -> usize {
        match self {
            Self::Line => 2,
            Self::Triangle => 3,
            Self::Quadrilateral => 4,
            Self::Tetrahedron => 4,
            Self::Hexahedron => 8,
            Self::Prism => 6,
            Self::Pyramid => 5,
        }
    }

    /// VTK 单元类型编号
    #[inline]
    pub const fn vtk_id(self) -> u8 {
        match self {
            Self::Line => 3,
            Self::Triangle => 5,
            Self::Quadrilateral => 9,
            Self::Tetrahedron => 10,
            Self::Hexahedron => 12,
            Self::Prism => 13,
            Self::Pyramid => 14,
        }
    }

    /// 由 VTK 编号还原
    pub fn from_vtk_id(code: u8) -> MeshResult<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.vtk_id() == code)
            .ok_or(MeshError::UnknownElementType { code })
    }

    /// 拓扑维数
    #[inline]
    pub const fn topo_dim(self) -> usize {
        match self {
            Self::Line => 1,
            Self::Triangle | Self::Quadrilateral => 2,
            _ => 3,
        }
    }

    /// 类型名称（用于文件头）
    pub const fn name(self) -> &'static str {
        match self {
            Self::Line => "Line",
            Self::Triangle => "Triangle",
            Self::Quadrilateral => "Quadrilateral",
            Self::Tetrahedron => "Tetrahedron",
            Self::Hexahedron => "Hexahedron",
            Self::Prism => "Prism",
            Self::Pyramid => "Pyramid",
        }
    }

    /// 在 [`ElementType::ALL`] 中的位置
    #[inline]
    pub const fn slot(self) -> usize {
        match self {
            Self::Line => 0,
            Self::Triangle => 1,
            Self::Quadrilateral => 2,
            Self::Tetrahedron => 3,
            Self::Hexahedron => 4,
            Self::Prism => 5,
            Self::Pyramid => 6,
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 同类型单元的连接块
///
/// `count` 是声明数量头，`connectivity` 是扁平节点索引体。
/// 正常情况下 `connectivity.len() == count * etype.n_nodes()`；
/// 二者不一致属于输入一致性错误，由合并器在收集时判定。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementBlock {
    /// 单元类型
    pub etype: ElementType,
    /// 声明的单元数
    pub count: usize,
    /// 扁平连接表
    pub connectivity: Vec<usize>,
}

impl ElementBlock {
    /// 空块
    pub fn new(etype: ElementType) -> Self {
        Self {
            etype,
            count: 0,
            connectivity: Vec::new(),
        }
    }

    /// 追加一个单元并更新数量头
    pub fn push(&mut self, nodes: &[usize]) {
        debug_assert_eq!(nodes.len(), self.etype.n_nodes());
        self.connectivity.extend_from_slice(nodes);
        self.count += 1;
    }

    /// 连接体中实际包含的完整单元数
    #[inline]
    pub fn actual_count(&self) -> usize {
        self.connectivity.len() / self.etype.n_nodes()
    }

    /// 声明数量与连接体是否一致
    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.connectivity.len() == self.count * self.etype.n_nodes()
    }

    /// 逐单元迭代
    pub fn elements(&self) -> std::slice::ChunksExact<'_, usize> {
        self.connectivity.chunks_exact(self.etype.n_nodes())
    }
}

/// 按类型分块的单元集合，始终包含 7 个块，按 [`ElementType::ALL`] 排列
///
/// 序列化为块列表；反序列化经 [`ElementSet::from_blocks`] 重建，
/// 缺少的类型补为空块，同类型块合并。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ElementBlock>", into = "Vec<ElementBlock>")]
pub struct ElementSet {
    blocks: Vec<ElementBlock>,
}

impl From<Vec<ElementBlock>> for ElementSet {
    fn from(blocks: Vec<ElementBlock>) -> Self {
        Self::from_blocks(blocks)
    }
}

impl From<ElementSet> for Vec<ElementBlock> {
    fn from(set: ElementSet) -> Self {
        set.blocks
    }
}

impl Default for ElementSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementSet {
    /// 全空集合
    pub fn new() -> Self {
        Self {
            blocks: ElementType::ALL.iter().map(|&t| ElementBlock::new(t)).collect(),
        }
    }

    /// 指定类型的块
    #[inline]
    pub fn block(&self, etype: ElementType) -> &ElementBlock {
        &self.blocks[etype.slot()]
    }

    /// 指定类型的可变块
    #[inline]
    pub fn block_mut(&mut self, etype: ElementType) -> &mut ElementBlock {
        &mut self.blocks[etype.slot()]
    }

    /// 追加单元
    pub fn push(&mut self, etype: ElementType, nodes: &[usize]) {
        self.block_mut(etype).push(nodes);
    }

    /// 全部块
    pub fn blocks(&self) -> &[ElementBlock] {
        &self.blocks
    }

    /// 各类型声明数量
    pub fn counts(&self) -> [usize; 7] {
        let mut c = [0; 7];
        for b in &self.blocks {
            c[b.etype.slot()] = b.count;
        }
        c
    }

    /// 单元总数（按声明数量）
    pub fn total(&self) -> usize {
        self.blocks.iter().map(|b| b.count).sum()
    }

    /// 连接表总长度
    pub fn connectivity_len(&self) -> usize {
        self.blocks.iter().map(|b| b.connectivity.len()).sum()
    }

    /// 由块列表构造；同类型块合并
    pub fn from_blocks(blocks: impl IntoIterator<Item = ElementBlock>) -> Self {
        let mut set = Self::new();
        for b in blocks {
            let dst = set.block_mut(b.etype);
            dst.count += b.count;
            dst.connectivity.extend(b.connectivity);
        }
        set
    }

    /// 最高拓扑维数（无单元时为 0）
    pub fn max_topo_dim(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.count > 0)
            .map(|b| b.etype.topo_dim())
            .max()
            .unwrap_or(0)
    }
}
