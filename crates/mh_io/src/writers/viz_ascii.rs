// crates/mh_io/src/writers/viz_ascii.rs

//! 可视化 ASCII 格式（Tecplot 风格有限元区域）
//!
//! 每步一个自包含文件：`TITLE` / `VARIABLES` / `ZONE` 头、逐点数据、
//! 1 起始的连接表。区域类型由最高拓扑维数决定，低阶单元按退化节点补齐：
//!
//! | 维数 | ZONETYPE | 每单元节点 |
//! |------|----------|------------|
//! | 1 | FELINESEG | 2 |
//! | 2 | FEQUADRILATERAL | 4（三角形末节点重复） |
//! | 3 | FEBRICK | 8（四面体、三棱柱、金字塔退化） |
//!
//! 各单元类型的数量写入 `AUXDATA`。

use std::io::{self, Write};
use std::path::PathBuf;

use mh_config::OutputFormat;
use mh_mesh::{ElementSet, ElementType};
use tracing::info;

use crate::buffer::GlobalField;
use crate::error::IoResult;
use crate::writers::{write_atomic, FormatWriter, StepMesh, StepNamer};

const AXES: [&str; 3] = ["x", "y", "z"];

/// 单个有限元区域的只读视图
#[derive(Debug, Clone)]
pub struct TecplotZone<'a> {
    /// 文件标题
    pub title: &'a str,
    /// 区域标题
    pub zone_title: String,
    /// 空间维数
    pub dim: usize,
    /// 交错存储的节点坐标
    pub coords: &'a [f64],
    /// 单元（索引指向 `coords` 中的节点）
    pub elements: &'a ElementSet,
    /// 变量名
    pub names: Vec<&'a str>,
    /// 变量值，每列长度等于节点数
    pub columns: Vec<&'a [f64]>,
}

impl TecplotZone<'_> {
    fn n_nodes(&self) -> usize {
        self.coords.len() / self.dim.max(1)
    }

    /// 写出完整文件内容
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let zone_dim = self.elements.max_topo_dim().max(1);
        let (zone_type, width) = match zone_dim {
            1 => ("FELINESEG", 2),
            2 => ("FEQUADRILATERAL", 4),
            _ => ("FEBRICK", 8),
        };
        let types: Vec<ElementType> = ElementType::ALL
            .into_iter()
            .filter(|t| t.topo_dim() == zone_dim)
            .collect();
        let n_elements: usize = types.iter().map(|&t| self.elements.block(t).count).sum();

        writeln!(w, "TITLE = \"{}\"", self.title)?;
        write!(w, "VARIABLES =")?;
        for axis in &AXES[..self.dim] {
            write!(w, " \"{}\"", axis)?;
        }
        for name in &self.names {
            write!(w, " \"{}\"", name)?;
        }
        writeln!(w)?;
        writeln!(
            w,
            "ZONE T=\"{}\", NODES={}, ELEMENTS={}, DATAPACKING=POINT, ZONETYPE={}",
            self.zone_title,
            self.n_nodes(),
            n_elements,
            zone_type
        )?;
        for &t in &types {
            writeln!(w, "AUXDATA N_{}=\"{}\"", t.name().to_uppercase(), self.elements.block(t).count)?;
        }

        for (g, c) in self.coords.chunks_exact(self.dim).enumerate() {
            let mut first = true;
            for v in c.iter().copied().chain(self.columns.iter().map(|col| col[g])) {
                if !first {
                    w.write_all(b" ")?;
                }
                write!(w, "{:.12e}", v)?;
                first = false;
            }
            writeln!(w)?;
        }

        for &t in &types {
            for elem in self.elements.block(t).elements() {
                let padded = pad_element(t, elem, width);
                let line: Vec<String> = padded.iter().map(|n| (n + 1).to_string()).collect();
                writeln!(w, "{}", line.join(" "))?;
            }
        }
        Ok(())
    }
}

/// 把单元节点按退化规则补齐到区域宽度
fn pad_element(etype: ElementType, nodes: &[usize], width: usize) -> Vec<usize> {
    let n = |i: usize| nodes[i];
    match (etype, width) {
        (ElementType::Triangle, 4) => vec![n(0), n(1), n(2), n(2)],
        (ElementType::Tetrahedron, 8) => vec![n(0), n(1), n(2), n(2), n(3), n(3), n(3), n(3)],
        (ElementType::Prism, 8) => vec![n(0), n(1), n(2), n(2), n(3), n(4), n(5), n(5)],
        (ElementType::Pyramid, 8) => vec![n(0), n(1), n(2), n(3), n(4), n(4), n(4), n(4)],
        _ => nodes.to_vec(),
    }
}

/// 可视化 ASCII 写出器
#[derive(Debug, Clone)]
pub struct AsciiVizWriter {
    directory: PathBuf,
    stem: String,
    base: Option<u64>,
    namer: StepNamer,
}

impl AsciiVizWriter {
    /// 创建写出器
    pub fn new(directory: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            stem: stem.into(),
            base: None,
            namer: StepNamer::default(),
        }
    }
}

impl FormatWriter for AsciiVizWriter {
    fn format(&self) -> OutputFormat {
        OutputFormat::VisualizationAscii
    }

    fn base_signature(&self) -> Option<u64> {
        self.base
    }

    /// 每步文件自包含，基础记录只记录状态
    fn write_base(&mut self, mesh: StepMesh<'_>) -> IoResult<Option<PathBuf>> {
        self.base = Some(mesh.signature);
        Ok(None)
    }

    fn write_solution(&mut self, mesh: StepMesh<'_>, field: &GlobalField, iteration: u64) -> IoResult<Vec<PathBuf>> {
        field.validate(mesh.n_nodes_owned)?;
        let zone = TecplotZone {
            title: &self.stem,
            zone_title: format!("iteration {}", iteration),
            dim: mesh.dim,
            coords: &mesh.coords,
            elements: &mesh.elements,
            names: field.names.iter().map(String::as_str).collect(),
            columns: field.data.iter().map(Vec::as_slice).collect(),
        };
        let path = self.namer.next(&self.directory, &self.stem, iteration, "dat");
        write_atomic(&path, |w| zone.write(w))?;
        info!(path = %path.display(), "写出可视化 ASCII 文件");
        Ok(vec![path])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mh_mesh::GlobalMesh;

    fn mesh() -> GlobalMesh {
        // 0-1-2 / 3-4-5 两行节点：一个四边形 + 两个三角形
        let mut elements = ElementSet::new();
        elements.push(ElementType::Quadrilateral, &[0, 1, 4, 3]);
        elements.push(ElementType::Triangle, &[1, 2, 5]);
        elements.push(ElementType::Triangle, &[1, 5, 4]);
        GlobalMesh {
            dim: 2,
            n_nodes_with_halos: 6,
            n_nodes_owned: 6,
            coords: vec![0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0],
            elements,
            volumes: None,
            markers: Vec::new(),
            rank_offsets: vec![0, 6],
        }
    }

    fn field() -> GlobalField {
        GlobalField {
            names: vec!["Rho".into(), "Mach".into()],
            n_conserved: 1,
            data: vec![vec![1.0; 6], (0..6).map(|g| g as f64 * 0.1).collect()],
        }
    }

    #[test]
    fn test_zone_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = AsciiVizWriter::new(dir.path(), "flow");
        let paths = w.write_step(StepMesh::new(&mesh()), &field(), 3).unwrap();
        assert_eq!(paths, vec![dir.path().join("flow_00003.dat")]);

        let text = std::fs::read_to_string(&paths[0]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "TITLE = \"flow\"");
        assert_eq!(lines[1], "VARIABLES = \"x\" \"y\" \"Rho\" \"Mach\"");
        assert!(lines[2].contains("NODES=6, ELEMENTS=3"));
        assert!(lines[2].ends_with("ZONETYPE=FEQUADRILATERAL"));
        assert_eq!(lines[3], "AUXDATA N_TRIANGLE=\"2\"");
        assert_eq!(lines[4], "AUXDATA N_QUADRILATERAL=\"1\"");
        // 4 行头 + 6 行节点 + 3 行单元
        assert_eq!(lines.len(), 5 + 6 + 3);
        assert_eq!(lines[11], "2 3 6 6");
        assert_eq!(lines[13], "1 2 5 4");
    }

    #[test]
    fn test_repeat_iteration_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = AsciiVizWriter::new(dir.path(), "flow");
        let a = w.write_step(StepMesh::new(&mesh()), &field(), 5).unwrap();
        let b = w.write_step(StepMesh::new(&mesh()), &field(), 5).unwrap();
        assert_ne!(a, b);
        assert_eq!(b[0], dir.path().join("flow_00005_r1.dat"));
        assert_eq!(std::fs::read(&a[0]).unwrap(), std::fs::read(&b[0]).unwrap());
    }

    #[test]
    fn test_base_is_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = AsciiVizWriter::new(dir.path(), "flow");
        assert!(w.base_signature().is_none());
        assert!(w.write_base(StepMesh::new(&mesh())).unwrap().is_none());
        assert_eq!(w.base_signature(), Some(mesh().signature()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_brick_padding() {
        assert_eq!(
            pad_element(ElementType::Tetrahedron, &[0, 1, 2, 3], 8),
            vec![0, 1, 2, 2, 3, 3, 3, 3]
        );
        assert_eq!(pad_element(ElementType::Hexahedron, &[0, 1, 2, 3, 4, 5, 6, 7], 8).len(), 8);
    }
}
