// crates/mh_mesh/src/generation.rs

//! 分区网格生成模块
//!
//! 提供简单的结构化网格及其条带分区，用于测试和 CLI 演示：
//!
//! - [`rectangle_partitions`]: 单位矩形上的四边形/三角形混合网格
//! - [`box_partitions`]: 单位立方体上的六面体网格
//! - [`two_partition_scenario`]: 固定的两分区小算例
//! - [`analytic_flow_solution`]: 只依赖坐标的解析流场
//!
//! # 分区方式
//!
//! 网格按最外层方向（2D 为 y 行，3D 为 z 层）切成条带。节点按层主序编号，
//! 因此每个分区拥有的节点在全局编号上连续，且满足前缀和顺序。
//! 每个分区额外携带下一条带的第一层单元作为 halo 单元，
//! 这些单元同时出现在两个分区上，用于检验合并去重。
//!
//! # 使用示例
//!
//! ```rust
//! use mh_mesh::generation::rectangle_partitions;
//!
//! let parts = rectangle_partitions(4, 4, 2).unwrap();
//! assert_eq!(parts.len(), 2);
//! let owned: usize = parts.iter().map(|p| p.n_owned()).sum();
//! assert_eq!(owned, 25);
//! ```

use std::collections::{BTreeSet, HashMap};

use mh_runtime::GlobalNodeId;

use crate::element::ElementType;
use crate::error::{MeshError, MeshResult};
use crate::partitioned::{BoundaryMarker, LocalSolution, NamedField, PartitionedMesh};

/// 解析解使用的比热比
pub const ANALYTIC_GAMMA: f64 = 1.4;

type Cell = (ElementType, Vec<usize>);

/// 分层描述的全局网格
struct LayeredMesh {
    dim: usize,
    nodes_per_layer: usize,
    coords: Vec<f64>,
    volumes: Vec<f64>,
    /// 每个单元层的单元
    cells: Vec<Vec<Cell>>,
    /// 每个单元层的边界单元 (标记序号, 单元)
    boundary: Vec<Vec<(usize, Cell)>>,
    marker_names: Vec<&'static str>,
}

impl LayeredMesh {
    fn n_cell_layers(&self) -> usize {
        self.cells.len()
    }

    /// 将单元体积平均分给其节点
    fn accumulate_volumes(&mut self, cell_volume: impl Fn(&Cell) -> f64) {
        let n_nodes = self.coords.len() / self.dim;
        let mut volumes = vec![0.0; n_nodes];
        for cell in self.cells.iter().flatten() {
            let share = cell_volume(cell) / cell.1.len() as f64;
            for &n in &cell.1 {
                volumes[n] += share;
            }
        }
        self.volumes = volumes;
    }

    fn partition(&self, n_parts: usize) -> MeshResult<Vec<PartitionedMesh>> {
        if n_parts == 0 {
            return Err(MeshError::invalid_partition(0, "分区数必须大于 0"));
        }
        let n_layers = self.n_cell_layers();
        let npl = self.nodes_per_layer;

        // 分区 p 拥有节点层 [start(p), end(p))
        let start = |p: usize| p * n_layers / n_parts;
        let end = |p: usize| if p + 1 < n_parts { start(p + 1) } else { n_layers + 1 };
        let owner_of_layer = |layer: usize| {
            (0..n_parts)
                .find(|&p| layer >= start(p) && layer < end(p))
                .unwrap_or(n_parts - 1)
        };

        let mut parts = Vec::with_capacity(n_parts);
        for p in 0..n_parts {
            let (a, b) = (start(p), end(p));
            let mut cell_layers: Vec<usize> = (a..b.min(n_layers)).collect();
            if a < b && b < n_layers {
                cell_layers.push(b);
            }

            let mut mesh = PartitionedMesh::new(p, self.dim);
            let mut volumes = Vec::new();
            let mut local: HashMap<usize, usize> = HashMap::new();

            // 自有节点在前，halo 节点按全局编号升序在后
            let owned = a * npl..b * npl;
            let needed: BTreeSet<usize> = cell_layers
                .iter()
                .flat_map(|&l| self.cells[l].iter().flat_map(|c| c.1.iter().copied()))
                .collect();
            let nodes = owned
                .clone()
                .map(|g| (g, p))
                .chain(needed.into_iter().filter(|g| !owned.contains(g)).map(|g| (g, owner_of_layer(g / npl))));
            for (g, owner) in nodes {
                let c = &self.coords[g * self.dim..(g + 1) * self.dim];
                let l = mesh.add_node(c, GlobalNodeId::new(g), owner)?;
                volumes.push(self.volumes[g]);
                local.insert(g, l.get());
            }

            let map = |nodes: &[usize]| -> Vec<usize> { nodes.iter().map(|g| local[g]).collect() };
            for &l in &cell_layers {
                for (t, nodes) in &self.cells[l] {
                    mesh.elements.push(*t, &map(nodes));
                }
            }
            mesh.markers = self.marker_names.iter().map(|n| BoundaryMarker::new(*n)).collect();
            for &l in &cell_layers {
                for (mi, (t, nodes)) in &self.boundary[l] {
                    mesh.markers[*mi].elements.push(*t, &map(nodes));
                }
            }
            mesh.volumes = Some(volumes);
            parts.push(mesh);
        }
        Ok(parts)
    }
}

/// 单位矩形 `nx × ny` 网格的 `n_parts` 条带分区
///
/// 最后一列单元切成两个三角形（`nx > 1` 时），其余为四边形。
/// 边界标记：`lower`、`right`、`upper`、`left`（线单元）。
pub fn rectangle_partitions(nx: usize, ny: usize, n_parts: usize) -> MeshResult<Vec<PartitionedMesh>> {
    if nx == 0 || ny == 0 {
        return Err(MeshError::invalid_partition(0, format!("网格尺寸无效: {}x{}", nx, ny)));
    }
    let npl = nx + 1;
    let id = |i: usize, j: usize| j * npl + i;
    let (dx, dy) = (1.0 / nx as f64, 1.0 / ny as f64);

    let mut coords = Vec::with_capacity(2 * npl * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            coords.push(i as f64 * dx);
            coords.push(j as f64 * dy);
        }
    }

    let mut cells = Vec::with_capacity(ny);
    let mut boundary = Vec::with_capacity(ny);
    for j in 0..ny {
        let mut layer = Vec::new();
        for i in 0..nx {
            let (a, b, c, d) = (id(i, j), id(i + 1, j), id(i + 1, j + 1), id(i, j + 1));
            if nx > 1 && i == nx - 1 {
                layer.push((ElementType::Triangle, vec![a, b, c]));
                layer.push((ElementType::Triangle, vec![a, c, d]));
            } else {
                layer.push((ElementType::Quadrilateral, vec![a, b, c, d]));
            }
        }
        cells.push(layer);

        let mut edges = Vec::new();
        if j == 0 {
            for i in 0..nx {
                edges.push((0, (ElementType::Line, vec![id(i, 0), id(i + 1, 0)])));
            }
        }
        edges.push((1, (ElementType::Line, vec![id(nx, j), id(nx, j + 1)])));
        if j == ny - 1 {
            for i in (0..nx).rev() {
                edges.push((2, (ElementType::Line, vec![id(i + 1, ny), id(i, ny)])));
            }
        }
        edges.push((3, (ElementType::Line, vec![id(0, j + 1), id(0, j)])));
        boundary.push(edges);
    }

    let mut mesh = LayeredMesh {
        dim: 2,
        nodes_per_layer: npl,
        coords,
        volumes: Vec::new(),
        cells,
        boundary,
        marker_names: vec!["lower", "right", "upper", "left"],
    };
    let cell_area = dx * dy;
    mesh.accumulate_volumes(|c| match c.0 {
        ElementType::Triangle => 0.5 * cell_area,
        _ => cell_area,
    });
    mesh.partition(n_parts)
}

/// 单位立方体 `nx × ny × nz` 六面体网格的 `n_parts` 条带分区（沿 z 切分）
///
/// 边界标记：`bottom`、`top`、`side`（x = 0 面，四边形单元）。
pub fn box_partitions(nx: usize, ny: usize, nz: usize, n_parts: usize) -> MeshResult<Vec<PartitionedMesh>> {
    if nx == 0 || ny == 0 || nz == 0 {
        return Err(MeshError::invalid_partition(0, format!("网格尺寸无效: {}x{}x{}", nx, ny, nz)));
    }
    let npl = (nx + 1) * (ny + 1);
    let id = |i: usize, j: usize, k: usize| k * npl + j * (nx + 1) + i;
    let (dx, dy, dz) = (1.0 / nx as f64, 1.0 / ny as f64, 1.0 / nz as f64);

    let mut coords = Vec::with_capacity(3 * npl * (nz + 1));
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                coords.extend_from_slice(&[i as f64 * dx, j as f64 * dy, k as f64 * dz]);
            }
        }
    }

    let mut cells = Vec::with_capacity(nz);
    let mut boundary = Vec::with_capacity(nz);
    for k in 0..nz {
        let mut layer = Vec::new();
        let mut faces = Vec::new();
        for j in 0..ny {
            for i in 0..nx {
                layer.push((
                    ElementType::Hexahedron,
                    vec![
                        id(i, j, k),
                        id(i + 1, j, k),
                        id(i + 1, j + 1, k),
                        id(i, j + 1, k),
                        id(i, j, k + 1),
                        id(i + 1, j, k + 1),
                        id(i + 1, j + 1, k + 1),
                        id(i, j + 1, k + 1),
                    ],
                ));
                if k == 0 {
                    let quad = vec![id(i, j, 0), id(i, j + 1, 0), id(i + 1, j + 1, 0), id(i + 1, j, 0)];
                    faces.push((0, (ElementType::Quadrilateral, quad)));
                }
                if k == nz - 1 {
                    let quad = vec![id(i, j, nz), id(i + 1, j, nz), id(i + 1, j + 1, nz), id(i, j + 1, nz)];
                    faces.push((1, (ElementType::Quadrilateral, quad)));
                }
            }
            let quad = vec![id(0, j, k), id(0, j, k + 1), id(0, j + 1, k + 1), id(0, j + 1, k)];
            faces.push((2, (ElementType::Quadrilateral, quad)));
        }
        cells.push(layer);
        boundary.push(faces);
    }

    let mut mesh = LayeredMesh {
        dim: 3,
        nodes_per_layer: npl,
        coords,
        volumes: Vec::new(),
        cells,
        boundary,
        marker_names: vec!["bottom", "top", "side"],
    };
    let cell_volume = dx * dy * dz;
    mesh.accumulate_volumes(|_| cell_volume);
    mesh.partition(n_parts)
}

/// 固定的两分区算例
///
/// 10 个节点排成 5 × 2，节点 g 的坐标为 `(g % 5, g / 5)`；4 个四边形单元。
/// 分区 A（rank 0）拥有 0–5，持有 6、7 的 halo 副本；
/// 分区 B（rank 1）拥有 6–9，持有 1–4 的 halo 副本，并与 A 共享第二个单元。
/// 边界标记 `lower` 为 y = 0 上的线单元。
pub fn two_partition_scenario() -> MeshResult<Vec<PartitionedMesh>> {
    let quads: [[usize; 4]; 4] = [[0, 1, 6, 5], [1, 2, 7, 6], [2, 3, 8, 7], [3, 4, 9, 8]];
    let lines: [[usize; 2]; 4] = [[0, 1], [1, 2], [2, 3], [3, 4]];
    let owner_of = |g: usize| if g <= 5 { 0 } else { 1 };

    let build = |rank: usize, nodes: &[usize], cells: &[usize], edges: &[usize]| -> MeshResult<PartitionedMesh> {
        let mut mesh = PartitionedMesh::new(rank, 2);
        let mut local = HashMap::new();
        for &g in nodes {
            let c = [(g % 5) as f64, (g / 5) as f64];
            let l = mesh.add_node(&c, GlobalNodeId::new(g), owner_of(g))?;
            local.insert(g, l.get());
        }
        for &c in cells {
            let conn: Vec<usize> = quads[c].iter().map(|g| local[g]).collect();
            mesh.elements.push(ElementType::Quadrilateral, &conn);
        }
        let mut lower = BoundaryMarker::new("lower");
        for &e in edges {
            let conn: Vec<usize> = lines[e].iter().map(|g| local[g]).collect();
            lower.elements.push(ElementType::Line, &conn);
        }
        mesh.markers.push(lower);
        mesh.volumes = Some(vec![1.0; mesh.n_local()]);
        Ok(mesh)
    };

    Ok(vec![
        build(0, &[0, 1, 2, 3, 4, 5, 6, 7], &[0, 1], &[0, 1])?,
        build(1, &[6, 7, 8, 9, 1, 2, 3, 4], &[1, 2, 3], &[1, 2, 3])?,
    ])
}

/// 只依赖节点坐标的解析可压缩流场
///
/// 守恒变量：`Rho`、`Rho_U`、`Rho_V`、（3D 时 `Rho_W`）、`Rho_E`。
/// 辅助量：`Skin_Friction_Coefficient`、`Y_Plus`。
/// 由于只依赖坐标，halo 副本与拥有者上的值一致，合并结果与分区方式无关。
pub fn analytic_flow_solution(mesh: &PartitionedMesh, time: f64) -> LocalSolution {
    let n = mesh.n_local();
    let dim = mesh.dim;
    let mut rho = Vec::with_capacity(n);
    let mut mom: Vec<Vec<f64>> = vec![Vec::with_capacity(n); dim];
    let mut energy = Vec::with_capacity(n);
    let mut cf = Vec::with_capacity(n);
    let mut yplus = Vec::with_capacity(n);

    for c in mesh.coords.chunks_exact(dim) {
        let (x, y) = (c[0], c[1]);
        let r = 1.0 + 0.1 * x.sin();
        let vel = [0.5 + 0.1 * y, 0.05, 0.0];
        let p = (1.0 + 0.05 * (x + time).cos()) / ANALYTIC_GAMMA;
        let v2: f64 = vel[..dim].iter().map(|v| v * v).sum();
        rho.push(r);
        for (d, m) in mom.iter_mut().enumerate() {
            m.push(r * vel[d]);
        }
        energy.push(p / (ANALYTIC_GAMMA - 1.0) + 0.5 * r * v2);
        cf.push(0.003 * (1.0 + x));
        yplus.push(1.0 + y);
    }

    let axes = ["Rho_U", "Rho_V", "Rho_W"];
    let mut conserved = vec![NamedField::new("Rho", rho)];
    for (d, m) in mom.into_iter().enumerate() {
        conserved.push(NamedField::new(axes[d], m));
    }
    conserved.push(NamedField::new("Rho_E", energy));

    LocalSolution {
        conserved,
        auxiliary: vec![
            NamedField::new("Skin_Friction_Coefficient", cf),
            NamedField::new("Y_Plus", yplus),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_prefix_sum(parts: &[PartitionedMesh]) {
        let mut offset = 0;
        for p in parts {
            let mut owned: Vec<usize> = p.owned_nodes().map(|l| p.global_id(l).get()).collect();
            owned.sort_unstable();
            let expected: Vec<usize> = (offset..offset + owned.len()).collect();
            assert_eq!(owned, expected);
            offset += owned.len();
            assert!(p.validate().is_ok());
        }
    }

    #[test]
    fn test_rectangle_single_part() {
        let parts = rectangle_partitions(3, 2, 1).unwrap();
        assert_eq!(parts.len(), 1);
        let p = &parts[0];
        assert_eq!(p.n_local(), 12);
        assert_eq!(p.n_owned(), 12);
        assert_eq!(p.elements.block(ElementType::Quadrilateral).count, 4);
        assert_eq!(p.elements.block(ElementType::Triangle).count, 4);
        assert_eq!(p.marker("lower").unwrap().elements.total(), 3);
        let total: f64 = p.volumes.as_ref().unwrap().iter().sum();
        assert!((total - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_rectangle_partitions_prefix_sum() {
        for n in 1..=5 {
            let parts = rectangle_partitions(4, 5, n).unwrap();
            check_prefix_sum(&parts);
            let owned: usize = parts.iter().map(|p| p.n_owned()).sum();
            assert_eq!(owned, 30);
        }
    }

    #[test]
    fn test_rectangle_halo_cells_duplicated() {
        let parts = rectangle_partitions(2, 4, 2).unwrap();
        // 每行 1 个四边形 + 2 个三角形；分区 0 持有 2 行自有 + 1 行 halo
        assert_eq!(parts[0].elements.block(ElementType::Quadrilateral).count, 3);
        assert_eq!(parts[1].elements.block(ElementType::Quadrilateral).count, 2);
        assert!(parts[0].n_local() > parts[0].n_owned());
        for l in 0..parts[0].n_local() {
            let l = mh_runtime::LocalNodeId::new(l);
            if !parts[0].is_owned(l) {
                assert_eq!(parts[0].owner[l.get()], 1);
            }
        }
    }

    #[test]
    fn test_more_parts_than_layers() {
        let parts = rectangle_partitions(2, 1, 3).unwrap();
        check_prefix_sum(&parts);
        assert_eq!(parts[0].n_owned(), 0);
        assert_eq!(parts[2].n_owned(), 6);
    }

    #[test]
    fn test_box_partitions() {
        let parts = box_partitions(2, 2, 3, 2).unwrap();
        check_prefix_sum(&parts);
        let owned: usize = parts.iter().map(|p| p.n_owned()).sum();
        assert_eq!(owned, 36);
        assert_eq!(parts[0].dim, 3);
        assert!(parts[0].marker("bottom").unwrap().elements.total() > 0);
    }

    #[test]
    fn test_two_partition_scenario() {
        let parts = two_partition_scenario().unwrap();
        check_prefix_sum(&parts);
        assert_eq!(parts[0].n_owned(), 6);
        assert_eq!(parts[1].n_owned(), 4);
        assert_eq!(parts[0].n_local(), 8);
    }

    #[test]
    fn test_invalid_sizes() {
        assert!(rectangle_partitions(0, 2, 1).is_err());
        assert!(rectangle_partitions(2, 2, 0).is_err());
        assert!(box_partitions(1, 1, 0, 1).is_err());
    }

    #[test]
    fn test_analytic_solution() {
        let parts = rectangle_partitions(2, 2, 1).unwrap();
        let sol = analytic_flow_solution(&parts[0], 0.0);
        assert_eq!(sol.conserved.len(), 4);
        assert_eq!(sol.conserved[0].name, "Rho");
        assert_eq!(sol.conserved[3].name, "Rho_E");
        assert!(sol.validate(parts[0].n_local()).is_ok());
        assert!(sol.auxiliary("Y_Plus").is_some());
    }
}
