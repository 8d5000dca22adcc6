// crates/mh_io/src/surface.rs

//! 表面导出
//!
//! 从体网格与解中抽取指定边界标记上的节点、单元与表面量：
//!
//! - 合并模式：聚合者在合并后的全局数据上导出 `<stem>.csv` / `<stem>.dat`
//! - 逐进程模式：每个 rank 导出自有边界节点 `<stem>_<rank>.csv` / `<stem>_<rank>.dat`
//!
//! 导出列由求解器类型决定：
//!
//! | 求解器 | 列 |
//! |--------|----|
//! | Flow | Pressure, Pressure_Coefficient, Skin_Friction_Coefficient, Heat_Transfer_Coefficient, Mach, Y_Plus |
//! | Adjoint | Surface_Sensitivity + 伴随守恒变量 |
//! | Linearized | Delta_Pressure_Coefficient |

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;

use mh_config::{SolverKind, SurfaceConfig};
use mh_mesh::{BoundaryMarker, ElementSet, ElementType, GlobalMesh, PartitionedMesh};
use tracing::info;

use crate::buffer::GlobalField;
use crate::error::{IoError, IoResult};
use crate::merge::LocalFields;
use crate::writers::viz_ascii::TecplotZone;
use crate::writers::{write_atomic, zone_stem};

const AXES: [&str; 3] = ["x", "y", "z"];

/// 求解器对应的表面列（伴随时附加守恒变量名）
pub fn surface_columns(kind: SolverKind, conserved: &[String]) -> Vec<String> {
    match kind {
        SolverKind::Flow => [
            "Pressure",
            "Pressure_Coefficient",
            "Skin_Friction_Coefficient",
            "Heat_Transfer_Coefficient",
            "Mach",
            "Y_Plus",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        SolverKind::Adjoint => std::iter::once("Surface_Sensitivity".to_string())
            .chain(conserved.iter().cloned())
            .collect(),
        SolverKind::Linearized => vec!["Delta_Pressure_Coefficient".to_string()],
    }
}

/// 边界子集
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceSubset {
    /// 空间维数
    pub dim: usize,
    /// 子集节点的全局编号（升序）
    pub global_ids: Vec<usize>,
    /// 交错坐标
    pub coords: Vec<f64>,
    /// 边界单元（索引指向子集节点）
    pub elements: ElementSet,
    /// 列名
    pub names: Vec<String>,
    /// 列值
    pub columns: Vec<Vec<f64>>,
}

impl SurfaceSubset {
    /// 子集节点数
    pub fn n_nodes(&self) -> usize {
        self.global_ids.len()
    }
}

/// 表面导出器
#[derive(Debug, Clone)]
pub struct SurfaceExtractor {
    config: SurfaceConfig,
    solver: SolverKind,
    directory: PathBuf,
}

impl SurfaceExtractor {
    /// 创建导出器
    pub fn new(config: SurfaceConfig, solver: SolverKind, directory: impl Into<PathBuf>) -> Self {
        Self {
            config,
            solver,
            directory: directory.into(),
        }
    }

    /// 导出配置
    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    /// 在合并后的全局数据上抽取子集
    pub fn extract_merged(&self, mesh: &GlobalMesh, field: &GlobalField) -> IoResult<SurfaceSubset> {
        let markers = self.lookup(|name| mesh.marker(name))?;
        let mut ids: Vec<usize> = markers.iter().flat_map(|m| m.nodes()).collect();
        ids.sort_unstable();
        ids.dedup();

        let names = surface_columns(self.solver, field.names.get(..field.n_conserved).unwrap_or_default());
        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            let col = field
                .column(name)
                .ok_or_else(|| IoError::MissingVariable { name: name.clone() })?;
            columns.push(ids.iter().map(|&g| col[g]).collect());
        }

        let coords = ids.iter().flat_map(|&g| mesh.coord(g).iter().copied()).collect();
        Ok(SurfaceSubset {
            dim: mesh.dim,
            elements: remap(&markers, &ids),
            global_ids: ids,
            coords,
            names,
            columns,
        })
    }

    /// 在本地数据上抽取自有边界节点
    pub fn extract_local(&self, part: &PartitionedMesh, fields: &LocalFields) -> IoResult<SurfaceSubset> {
        let markers = self.lookup(|name| part.marker(name))?;
        let mut locals: Vec<usize> = markers
            .iter()
            .flat_map(|m| m.nodes())
            .filter(|&l| part.owner[l] == part.rank)
            .collect();
        locals.sort_unstable_by_key(|&l| part.global_ids[l]);
        locals.dedup();

        let names = surface_columns(self.solver, fields.names.get(..fields.n_conserved).unwrap_or_default());
        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            let v = fields
                .names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| IoError::MissingVariable { name: name.clone() })?;
            columns.push(locals.iter().map(|&l| fields.data[v][l]).collect());
        }

        let coords = locals
            .iter()
            .flat_map(|&l| part.coords[l * part.dim..(l + 1) * part.dim].iter().copied())
            .collect();
        let global_ids = locals.iter().map(|&l| part.global_ids[l].get()).collect();
        Ok(SurfaceSubset {
            dim: part.dim,
            elements: remap(&markers, &locals),
            global_ids,
            coords,
            names,
            columns,
        })
    }

    /// 合并模式导出（仅聚合者调用）
    pub fn export_merged(&self, mesh: &GlobalMesh, field: &GlobalField, zone: usize, n_zones: usize) -> IoResult<Vec<PathBuf>> {
        let subset = self.extract_merged(mesh, field)?;
        self.write(&subset, zone_stem(&self.config.stem, zone, n_zones))
    }

    /// 逐进程模式导出（每个 rank 调用，文件名带 rank）
    pub fn export_local(
        &self,
        rank: usize,
        part: &PartitionedMesh,
        fields: &LocalFields,
        zone: usize,
        n_zones: usize,
    ) -> IoResult<Vec<PathBuf>> {
        let subset = self.extract_local(part, fields)?;
        let stem = format!("{}_{}", zone_stem(&self.config.stem, zone, n_zones), rank);
        self.write(&subset, stem)
    }

    fn lookup<'m>(&self, find: impl Fn(&str) -> Option<&'m BoundaryMarker>) -> IoResult<Vec<&'m BoundaryMarker>> {
        self.config
            .markers
            .iter()
            .map(|name| find(name).ok_or_else(|| IoError::UnknownMarker { name: name.clone() }))
            .collect()
    }

    fn write(&self, subset: &SurfaceSubset, stem: String) -> IoResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        if self.config.csv {
            let path = self.directory.join(format!("{}.csv", stem));
            write_atomic(&path, |w| write_csv(w, subset))?;
            written.push(path);
        }
        if self.config.full_format {
            let path = self.directory.join(format!("{}.dat", stem));
            let zone = TecplotZone {
                title: &stem,
                zone_title: self.config.markers.join(","),
                dim: subset.dim,
                coords: &subset.coords,
                elements: &subset.elements,
                names: subset.names.iter().map(String::as_str).collect(),
                columns: subset.columns.iter().map(Vec::as_slice).collect(),
            };
            write_atomic(&path, |w| zone.write(w))?;
            written.push(path);
        }
        info!(nodes = subset.n_nodes(), files = written.len(), "写出表面文件");
        Ok(written)
    }
}

/// 把标记单元的节点编号映射到子集序号；含子集外节点的单元丢弃
///
/// 同一单元出现在多个标记中时只保留首次出现（按排序后的节点集合判重）。
fn remap(markers: &[&BoundaryMarker], nodes: &[usize]) -> ElementSet {
    let index: HashMap<usize, usize> = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();
    let mut out = ElementSet::new();
    for etype in ElementType::ALL {
        let mut seen = HashSet::new();
        for m in markers {
            for elem in m.elements.block(etype).elements() {
                let mapped: Option<Vec<usize>> = elem.iter().map(|n| index.get(n).copied()).collect();
                let Some(mapped) = mapped else { continue };
                let mut key = mapped.clone();
                key.sort_unstable();
                if seen.insert(key) {
                    out.push(etype, &mapped);
                }
            }
        }
    }
    out
}

fn write_csv<W: Write>(w: &mut W, subset: &SurfaceSubset) -> std::io::Result<()> {
    let mut header = vec!["\"Global_Index\"".to_string()];
    header.extend(AXES[..subset.dim].iter().map(|a| format!("\"{}\"", a)));
    header.extend(subset.names.iter().map(|n| format!("\"{}\"", n)));
    writeln!(w, "{}", header.join(","))?;

    for (i, &g) in subset.global_ids.iter().enumerate() {
        write!(w, "{}", g)?;
        for c in &subset.coords[i * subset.dim..(i + 1) * subset.dim] {
            write!(w, ",{:.12e}", c)?;
        }
        for col in &subset.columns {
            write!(w, ",{:.12e}", col[i])?;
        }
        writeln!(w)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mh_mesh::generation::{analytic_flow_solution, rectangle_partitions, two_partition_scenario};

    fn config(markers: &[&str]) -> SurfaceConfig {
        SurfaceConfig {
            enabled: true,
            markers: markers.iter().map(|s| s.to_string()).collect(),
            ..SurfaceConfig::default()
        }
    }

    /// 单分区时本地数据即全局数据
    fn global_data() -> (GlobalMesh, GlobalField) {
        let part = rectangle_partitions(3, 2, 1).unwrap().remove(0);
        let sol = analytic_flow_solution(&part, 0.0);
        let fields =
            crate::merge::SolutionMerger::prepare_local(&part, &sol, &mh_config::OutputConfig::default()).unwrap();
        let mesh = GlobalMesh {
            dim: 2,
            n_nodes_with_halos: part.n_local(),
            n_nodes_owned: part.n_local(),
            coords: part.coords.clone(),
            elements: part.elements.clone(),
            volumes: part.volumes.clone(),
            markers: part.markers.clone(),
            rank_offsets: vec![0, part.n_local()],
        };
        let field = GlobalField {
            names: fields.names,
            n_conserved: fields.n_conserved,
            data: fields.data,
        };
        (mesh, field)
    }

    #[test]
    fn test_merged_csv() {
        let dir = tempfile::tempdir().unwrap();
        let (mesh, field) = global_data();
        let ex = SurfaceExtractor::new(config(&["lower"]), SolverKind::Flow, dir.path());
        let paths = ex.export_merged(&mesh, &field, 0, 1).unwrap();
        assert_eq!(paths, vec![dir.path().join("surface_flow.csv")]);

        let text = std::fs::read_to_string(&paths[0]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "\"Global_Index\",\"x\",\"y\",\"Pressure\",\"Pressure_Coefficient\",\"Skin_Friction_Coefficient\",\"Heat_Transfer_Coefficient\",\"Mach\",\"Y_Plus\""
        );
        // 下边界 4 个节点
        assert_eq!(lines.len(), 5);
        assert!(lines[1].starts_with("0,"));
        assert_eq!(lines[1].split(',').count(), 9);
    }

    #[test]
    fn test_subset_values() {
        let (mesh, field) = global_data();
        let ex = SurfaceExtractor::new(config(&["lower"]), SolverKind::Flow, ".");
        let subset = ex.extract_merged(&mesh, &field).unwrap();
        assert_eq!(subset.global_ids, vec![0, 1, 2, 3]);
        assert_eq!(subset.elements.block(ElementType::Line).count, 3);
        let p = field.column("Pressure").unwrap();
        assert_eq!(subset.columns[0], p[..4].to_vec());
    }

    #[test]
    fn test_shared_elements_exported_once() {
        let (mut mesh, field) = global_data();
        let mut reversed = BoundaryMarker::new("lower_reversed");
        for e in mesh.marker("lower").unwrap().elements.block(ElementType::Line).elements() {
            reversed.elements.push(ElementType::Line, &[e[1], e[0]]);
        }
        mesh.markers.push(reversed);

        let ex = SurfaceExtractor::new(config(&["lower", "lower_reversed"]), SolverKind::Flow, ".");
        let subset = ex.extract_merged(&mesh, &field).unwrap();
        assert_eq!(subset.global_ids, vec![0, 1, 2, 3]);
        let lines = subset.elements.block(ElementType::Line);
        assert_eq!(lines.count, 3);
        // 保留首个标记中的方向
        assert_eq!(lines.connectivity[..2], [0, 1]);
    }

    #[test]
    fn test_unknown_marker() {
        let (mesh, field) = global_data();
        let ex = SurfaceExtractor::new(config(&["wing"]), SolverKind::Flow, ".");
        let err = ex.extract_merged(&mesh, &field).unwrap_err();
        assert!(matches!(err, IoError::UnknownMarker { ref name } if name == "wing"));
    }

    #[test]
    fn test_missing_column() {
        let (mesh, mut field) = global_data();
        let i = field.index_of("Y_Plus").unwrap();
        field.names.remove(i);
        field.data.remove(i);
        let ex = SurfaceExtractor::new(config(&["lower"]), SolverKind::Flow, ".");
        assert!(matches!(
            ex.extract_merged(&mesh, &field),
            Err(IoError::MissingVariable { .. })
        ));
    }

    #[test]
    fn test_empty_marker_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let (mut mesh, field) = global_data();
        mesh.markers.push(BoundaryMarker::new("empty"));
        let mut cfg = config(&["empty"]);
        cfg.full_format = true;
        let ex = SurfaceExtractor::new(cfg, SolverKind::Flow, dir.path());
        let paths = ex.export_merged(&mesh, &field, 0, 1).unwrap();
        assert_eq!(paths.len(), 2);
        let text = std::fs::read_to_string(&paths[0]).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("\"Global_Index\""));
    }

    #[test]
    fn test_adjoint_columns() {
        let conserved = vec!["Psi_Rho".to_string(), "Psi_E".to_string()];
        let cols = surface_columns(SolverKind::Adjoint, &conserved);
        assert_eq!(cols, vec!["Surface_Sensitivity", "Psi_Rho", "Psi_E"]);
        assert_eq!(surface_columns(SolverKind::Linearized, &[]), vec!["Delta_Pressure_Coefficient"]);
    }

    #[test]
    fn test_per_process_owned_only() {
        let dir = tempfile::tempdir().unwrap();
        let parts = two_partition_scenario().unwrap();
        let ex = SurfaceExtractor::new(config(&["lower"]), SolverKind::Flow, dir.path());
        let cfg = mh_config::OutputConfig::default();
        for part in &parts {
            let sol = analytic_flow_solution(part, 0.0);
            let fields = crate::merge::SolutionMerger::prepare_local(part, &sol, &cfg).unwrap();
            let paths = ex.export_local(part.rank, part, &fields, 0, 1).unwrap();
            assert_eq!(paths, vec![dir.path().join(format!("surface_flow_{}.csv", part.rank))]);
        }
        let a = std::fs::read_to_string(dir.path().join("surface_flow_0.csv")).unwrap();
        let b = std::fs::read_to_string(dir.path().join("surface_flow_1.csv")).unwrap();
        // rank 0 的标记单元覆盖自有节点 0、1、2；rank 1 的下边界节点全是 halo
        assert_eq!(a.lines().count(), 4);
        assert_eq!(b.lines().count(), 1);
    }
}
