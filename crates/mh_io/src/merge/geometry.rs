// crates/mh_io/src/merge/geometry.rs

//! 几何合并
//!
//! 把各 rank 的分区网格合并为聚合者上一个无 halo 的 [`GlobalMesh`]。
//!
//! # 算法
//!
//! 1. 本地结构检查，结果在所有 rank 间达成一致
//! 2. all-gather 各 rank 的节点数/连接长度，前缀和得到全局偏移
//! 3. 容量检查：所有 rank 用同一份计数估算聚合者内存，超限则一起失败
//! 4. 各 rank 在发送前把本地连接索引翻译为全局编号（halo 引用翻译为拥有者编号）
//! 5. gather 到聚合者：校验声明数量、自有编号范围与唯一性，按全局编号放置坐标，
//!    按节点集合去重单元（同一单元可能出现在多个分区上）
//! 6. 聚合者的判定广播给所有 rank
//!
//! 去重后的单元按其排序节点集合排序，因此输出与分区数无关。

use std::collections::BTreeMap;

use mh_mesh::{BoundaryMarker, ElementBlock, ElementSet, ElementType, GlobalMesh, PartitionedMesh};
use mh_runtime::Communicator;
use tracing::{debug, error};

use crate::buffer::{estimate_bytes, DistributedBuffer};
use crate::error::{IoError, IoResult};
use crate::merge::agree;

// =============================================================================
// 选项与通行令牌
// =============================================================================

/// 合并选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// 是否合并节点体积
    pub with_volumes: bool,
    /// 随后合并的场变量个数（用于容量估算）
    pub n_field_vars: usize,
    /// 聚合者缓冲区上限 [字节]
    pub max_buffer_bytes: Option<u64>,
}

impl MergeOptions {
    /// 设置是否合并体积
    pub fn with_volumes(mut self, yes: bool) -> Self {
        self.with_volumes = yes;
        self
    }

    /// 设置场变量个数
    pub fn with_field_vars(mut self, n: usize) -> Self {
        self.n_field_vars = n;
        self
    }

    /// 设置缓冲区上限
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.max_buffer_bytes = limit;
        self
    }
}

/// 几何合并成功后的通行令牌
///
/// 解合并必须出示本令牌，借此在类型层面保证“先几何、后解”的顺序。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryPass {
    rank: usize,
    size: usize,
    n_local: usize,
    n_owned: usize,
    offset: usize,
    n_global: usize,
}

impl GeometryPass {
    /// 本 rank
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// rank 总数
    pub fn size(&self) -> usize {
        self.size
    }

    /// 合并时的本地节点数
    pub fn n_local(&self) -> usize {
        self.n_local
    }

    /// 本 rank 拥有的节点数
    pub fn n_owned(&self) -> usize {
        self.n_owned
    }

    /// 本 rank 自有节点的全局起始编号
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 全局唯一节点数
    pub fn n_global(&self) -> usize {
        self.n_global
    }
}

// =============================================================================
// 集合操作载荷
// =============================================================================

#[derive(Debug, Clone)]
struct Summary {
    dim: usize,
    n_local: usize,
    n_owned: usize,
    connectivity_len: usize,
    has_volumes: bool,
}

#[derive(Debug)]
struct Contribution {
    owned_ids: Vec<usize>,
    owned_coords: Vec<f64>,
    owned_volumes: Option<Vec<f64>>,
    elements: ElementSet,
    markers: Vec<BoundaryMarker>,
}

/// 聚合者的判定（可广播）
#[derive(Debug, Clone)]
enum Verdict {
    Accepted,
    Inconsistent {
        rank: usize,
        etype: ElementType,
        declared: usize,
        actual: usize,
    },
    Contract(String),
}

impl Verdict {
    fn into_result(self) -> IoResult<()> {
        match self {
            Verdict::Accepted => Ok(()),
            Verdict::Inconsistent { rank, etype, declared, actual } => Err(IoError::InconsistentElementCount {
                rank,
                etype,
                declared,
                actual,
            }),
            Verdict::Contract(message) => Err(IoError::ContractViolation { message }),
        }
    }
}

// =============================================================================
// GeometryMerger
// =============================================================================

/// 几何合并器
#[derive(Debug, Clone, Default)]
pub struct GeometryMerger {
    options: MergeOptions,
}

impl GeometryMerger {
    /// 创建合并器
    pub fn new(options: MergeOptions) -> Self {
        Self { options }
    }

    /// 执行几何合并（集合操作，所有 rank 必须同时调用）
    ///
    /// 成功时聚合者的 `buffer` 装入全局网格，所有 rank 得到相同的 [`GeometryPass`]
    /// 信息；任何失败都在所有 rank 上以同一错误返回。
    pub fn merge<C: Communicator>(
        &self,
        comm: &C,
        part: &PartitionedMesh,
        buffer: &mut DistributedBuffer,
    ) -> IoResult<GeometryPass> {
        let local_check = part.validate().map_err(IoError::from).and_then(|_| {
            if part.rank != comm.rank() {
                Err(IoError::contract(format!(
                    "分区 rank {} 与通信器 rank {} 不一致",
                    part.rank,
                    comm.rank()
                )))
            } else {
                Ok(())
            }
        });
        agree(comm, local_check)?;

        let summary = Summary {
            dim: part.dim,
            n_local: part.n_local(),
            n_owned: part.n_owned(),
            connectivity_len: std::iter::once(&part.elements)
                .chain(part.markers.iter().map(|m| &m.elements))
                .map(ElementSet::connectivity_len)
                .sum(),
            has_volumes: part.volumes.is_some(),
        };
        let summaries = comm.all_gather(summary)?;

        let dim = summaries[0].dim;
        if summaries.iter().any(|s| s.dim != dim) {
            return Err(IoError::contract("各分区空间维数不一致"));
        }

        let mut rank_offsets = Vec::with_capacity(summaries.len() + 1);
        rank_offsets.push(0);
        for s in &summaries {
            let last = rank_offsets[rank_offsets.len() - 1];
            rank_offsets.push(last + s.n_owned);
        }
        let n_global = rank_offsets[summaries.len()];
        let offset = rank_offsets[comm.rank()];

        let with_volumes = self.options.with_volumes && summaries.iter().all(|s| s.has_volumes);
        if self.options.with_volumes && !with_volumes {
            debug!("部分分区缺少节点体积，跳过体积合并");
        }
        let connectivity_total: usize = summaries.iter().map(|s| s.connectivity_len).sum();
        let required = estimate_bytes(dim, n_global, connectivity_total, self.options.n_field_vars, with_volumes);
        if let Some(limit) = self.options.max_buffer_bytes {
            if required > limit {
                error!(required, limit, "全局输出缓冲区超出上限");
                return Err(IoError::CapacityExceeded { required, limit });
            }
        }

        debug!(
            rank = comm.rank(),
            n_owned = summaries[comm.rank()].n_owned,
            offset,
            "几何合并: 发送本地贡献"
        );
        let contribution = translate(part, with_volumes);
        let gathered = comm.gather(contribution)?;

        let root_verdict = gathered.map(|contribs| {
            let n_with_halos = summaries.iter().map(|s| s.n_local).sum();
            match assemble(contribs, &rank_offsets, dim, n_with_halos, with_volumes) {
                Ok(mesh) => {
                    debug!(
                        nodes = mesh.n_nodes_owned,
                        elements = mesh.n_elements_total(),
                        "几何合并完成"
                    );
                    match buffer.install_mesh(mesh) {
                        Ok(()) => Verdict::Accepted,
                        Err(e) => Verdict::Contract(e.to_string()),
                    }
                }
                Err(v) => v,
            }
        });
        comm.broadcast(root_verdict)?.into_result()?;

        Ok(GeometryPass {
            rank: comm.rank(),
            size: comm.size(),
            n_local: part.n_local(),
            n_owned: summaries[comm.rank()].n_owned,
            offset,
            n_global,
        })
    }
}

/// 本地→全局翻译；只发送自有节点的坐标与体积
fn translate(part: &PartitionedMesh, with_volumes: bool) -> Contribution {
    let gid = |l: usize| part.global_ids[l].get();
    let translate_set = |set: &ElementSet| {
        ElementSet::from_blocks(set.blocks().iter().map(|b| ElementBlock {
            etype: b.etype,
            count: b.count,
            connectivity: b.connectivity.iter().map(|&l| gid(l)).collect(),
        }))
    };

    let mut owned_ids = Vec::with_capacity(part.n_local());
    let mut owned_coords = Vec::with_capacity(part.coords.len());
    let mut owned_volumes = with_volumes.then(Vec::new);
    for l in part.owned_nodes() {
        owned_ids.push(gid(l.get()));
        owned_coords.extend_from_slice(part.coord(l));
        if let (Some(dst), Some(src)) = (owned_volumes.as_mut(), part.volumes.as_ref()) {
            dst.push(src[l.get()]);
        }
    }

    Contribution {
        owned_ids,
        owned_coords,
        owned_volumes,
        elements: translate_set(&part.elements),
        markers: part
            .markers
            .iter()
            .map(|m| BoundaryMarker {
                name: m.name.clone(),
                elements: translate_set(&m.elements),
            })
            .collect(),
    }
}

/// 聚合者上的组装与校验
fn assemble(
    contribs: Vec<Contribution>,
    rank_offsets: &[usize],
    dim: usize,
    n_with_halos: usize,
    with_volumes: bool,
) -> Result<GlobalMesh, Verdict> {
    let n_global = rank_offsets[rank_offsets.len() - 1];

    // 声明数量头与连接体
    for (rank, c) in contribs.iter().enumerate() {
        let sets = std::iter::once(&c.elements).chain(c.markers.iter().map(|m| &m.elements));
        for set in sets {
            for block in set.blocks() {
                if !block.is_consistent() {
                    return Err(Verdict::Inconsistent {
                        rank,
                        etype: block.etype,
                        declared: block.count,
                        actual: block.actual_count(),
                    });
                }
            }
        }
    }

    // 自有节点：编号范围、唯一性、坐标放置
    let mut coords = vec![0.0; dim * n_global];
    let mut volumes = with_volumes.then(|| vec![0.0; n_global]);
    let mut seen = vec![false; n_global];
    for (rank, c) in contribs.iter().enumerate() {
        let (lo, hi) = (rank_offsets[rank], rank_offsets[rank + 1]);
        for (k, &g) in c.owned_ids.iter().enumerate() {
            if g < lo || g >= hi {
                return Err(Verdict::Contract(format!(
                    "rank {} 自有节点全局编号 {} 不在 [{}, {}) 内",
                    rank, g, lo, hi
                )));
            }
            if seen[g] {
                return Err(Verdict::Contract(format!("rank {} 自有节点全局编号 {} 重复", rank, g)));
            }
            seen[g] = true;
            coords[g * dim..(g + 1) * dim].copy_from_slice(&c.owned_coords[k * dim..(k + 1) * dim]);
            if let (Some(dst), Some(src)) = (volumes.as_mut(), c.owned_volumes.as_ref()) {
                dst[g] = src[k];
            }
        }
    }

    let elements = dedup(contribs.iter().map(|c| &c.elements).collect(), n_global)?;

    let mut names: Vec<&str> = Vec::new();
    for m in contribs.iter().flat_map(|c| &c.markers) {
        if !names.contains(&m.name.as_str()) {
            names.push(&m.name);
        }
    }
    let mut markers = Vec::with_capacity(names.len());
    for name in names {
        let sets = contribs
            .iter()
            .filter_map(|c| c.markers.iter().find(|m| m.name == name))
            .map(|m| &m.elements)
            .collect();
        markers.push(BoundaryMarker {
            name: name.to_string(),
            elements: dedup(sets, n_global)?,
        });
    }

    Ok(GlobalMesh {
        dim,
        n_nodes_with_halos: n_with_halos,
        n_nodes_owned: n_global,
        coords,
        elements,
        volumes,
        markers,
        rank_offsets: rank_offsets.to_vec(),
    })
}

/// 按排序节点集合去重并排序单元
fn dedup(sets: Vec<&ElementSet>, n_global: usize) -> Result<ElementSet, Verdict> {
    let mut out = ElementSet::new();
    for etype in ElementType::ALL {
        let mut unique: BTreeMap<Vec<usize>, &[usize]> = BTreeMap::new();
        for set in &sets {
            for elem in set.block(etype).elements() {
                if let Some(&bad) = elem.iter().find(|&&g| g >= n_global) {
                    return Err(Verdict::Contract(format!(
                        "{} 单元引用的全局编号 {} 超出 [0, {})",
                        etype, bad, n_global
                    )));
                }
                let mut key = elem.to_vec();
                key.sort_unstable();
                unique.entry(key).or_insert(elem);
            }
        }
        for elem in unique.values() {
            out.push(etype, elem);
        }
    }
    Ok(out)
}
