// crates/mh_io/src/writers/interop.rs

//! 结构化互操作格式（JSON 文档，需启用 `interop` feature）
//!
//! - `<stem>_grid.mhx`：维数、节点坐标（按坐标轴分列）、1 起始的单元分区、
//!   边界标记、节点体积与区域元数据，每个网格只写一次
//! - `<stem>_sol.mhx`：网格签名 + 按名称存储的场数组，每步覆盖
//!
//! 解文件中的签名必须与网格文件一致，读取端据此确认二者配套。
//!
//! JSON 没有非有限数，`NaN`、`inf`、`-inf` 以同名字符串保存，读回时还原。

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use mh_config::OutputFormat;
use mh_mesh::{ElementSet, ElementType};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::buffer::GlobalField;
use crate::error::{IoError, IoResult};
use crate::writers::{write_atomic, FormatWriter, StepMesh};

/// 网格文档标识
pub const GRID_KIND: &str = "mhx-grid";
/// 解文档标识
pub const SOLUTION_KIND: &str = "mhx-solution";
/// 文档版本
pub const INTEROP_VERSION: u32 = 1;

/// 单元分区（1 起始连接）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// 单元类型
    pub etype: ElementType,
    /// 单元数
    pub count: usize,
    /// 扁平连接表，节点编号从 1 开始
    pub connectivity: Vec<usize>,
}

/// 边界标记分区
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerSections {
    /// 标记名
    pub name: String,
    /// 非空单元分区
    pub sections: Vec<Section>,
}

/// 区域元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneInfo {
    /// 去重前（含 halo）的节点总数
    pub n_nodes_with_halos: usize,
    /// 各 rank 自有节点的全局起始编号
    pub rank_offsets: Vec<usize>,
}

/// 网格文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDocument {
    /// 文档标识
    pub kind: String,
    /// 版本
    pub version: u32,
    /// 网格签名
    pub signature: u64,
    /// 空间维数
    pub dim: usize,
    /// 节点数
    pub n_nodes: usize,
    /// 按坐标轴分列的坐标
    #[serde(with = "real::columns")]
    pub coordinates: Vec<Vec<f64>>,
    /// 体单元分区
    pub sections: Vec<Section>,
    /// 边界标记
    pub markers: Vec<MarkerSections>,
    /// 节点体积
    #[serde(default, skip_serializing_if = "Option::is_none", with = "real::optional")]
    pub volumes: Option<Vec<f64>>,
    /// 区域元数据
    pub zone: ZoneInfo,
}

/// 命名场数组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldArray {
    /// 变量名
    pub name: String,
    /// 按全局编号排列的值
    #[serde(with = "real::values")]
    pub values: Vec<f64>,
}

/// 解文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionDocument {
    /// 文档标识
    pub kind: String,
    /// 版本
    pub version: u32,
    /// 对应网格的签名
    pub signature: u64,
    /// 迭代号
    pub iteration: u64,
    /// 守恒变量个数
    pub n_conserved: usize,
    /// 场数组
    pub fields: Vec<FieldArray>,
}

// =============================================================================
// 非有限值编码
// =============================================================================

mod real {
    use std::fmt;

    use serde::de::{self, Deserializer, Visitor};
    use serde::ser::Serializer;
    use serde::{Deserialize, Serialize};

    struct Reals<'a>(&'a [f64]);

    impl Serialize for Reals<'_> {
        fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
            s.collect_seq(self.0.iter().map(|&v| Real(v)))
        }
    }

    struct Real(f64);

    impl Serialize for Real {
        fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
            let v = self.0;
            if v.is_nan() {
                s.serialize_str("NaN")
            } else if v == f64::INFINITY {
                s.serialize_str("inf")
            } else if v == f64::NEG_INFINITY {
                s.serialize_str("-inf")
            } else {
                s.serialize_f64(v)
            }
        }
    }

    impl<'de> Deserialize<'de> for Real {
        fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
            d.deserialize_any(RealVisitor)
        }
    }

    struct RealVisitor;

    impl Visitor<'_> for RealVisitor {
        type Value = Real;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("数值或 \"NaN\" / \"inf\" / \"-inf\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Real, E> {
            Ok(Real(v))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Real, E> {
            Ok(Real(v as f64))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Real, E> {
            Ok(Real(v as f64))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Real, E> {
            match v {
                "NaN" => Ok(Real(f64::NAN)),
                "inf" => Ok(Real(f64::INFINITY)),
                "-inf" => Ok(Real(f64::NEG_INFINITY)),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }

    fn unwrap_all(v: Vec<Real>) -> Vec<f64> {
        v.into_iter().map(|r| r.0).collect()
    }

    pub mod values {
        use super::*;

        pub fn serialize<S: Serializer>(v: &[f64], s: S) -> Result<S::Ok, S::Error> {
            Reals(v).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
            Vec::<Real>::deserialize(d).map(unwrap_all)
        }
    }

    pub mod columns {
        use super::*;

        pub fn serialize<S: Serializer>(v: &[Vec<f64>], s: S) -> Result<S::Ok, S::Error> {
            s.collect_seq(v.iter().map(|c| Reals(c)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<f64>>, D::Error> {
            Vec::<Vec<Real>>::deserialize(d).map(|cols| cols.into_iter().map(unwrap_all).collect())
        }
    }

    pub mod optional {
        use super::*;

        pub fn serialize<S: Serializer>(v: &Option<Vec<f64>>, s: S) -> Result<S::Ok, S::Error> {
            v.as_deref().map(Reals).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<f64>>, D::Error> {
            Option::<Vec<Real>>::deserialize(d).map(|v| v.map(unwrap_all))
        }
    }
}

fn sections(set: &ElementSet) -> Vec<Section> {
    set.blocks()
        .iter()
        .filter(|b| b.count > 0)
        .map(|b| Section {
            etype: b.etype,
            count: b.count,
            connectivity: b.connectivity.iter().map(|&g| g + 1).collect(),
        })
        .collect()
}

impl GridDocument {
    /// 由全局网格构造
    pub fn from_mesh(mesh: StepMesh<'_>) -> Self {
        let n = mesh.n_nodes_owned;
        let coordinates = (0..mesh.dim)
            .map(|d| (0..n).map(|g| mesh.coords[g * mesh.dim + d]).collect())
            .collect();
        Self {
            kind: GRID_KIND.into(),
            version: INTEROP_VERSION,
            signature: mesh.signature,
            dim: mesh.dim,
            n_nodes: n,
            coordinates,
            sections: sections(&mesh.elements),
            markers: mesh
                .markers
                .iter()
                .map(|m| MarkerSections {
                    name: m.name.clone(),
                    sections: sections(&m.elements),
                })
                .collect(),
            volumes: mesh.volumes.clone(),
            zone: ZoneInfo {
                n_nodes_with_halos: mesh.n_nodes_with_halos,
                rank_offsets: mesh.rank_offsets.clone(),
            },
        }
    }
}

/// 结构化互操作写出器
#[derive(Debug, Clone)]
pub struct InteropWriter {
    directory: PathBuf,
    stem: String,
    base: Option<u64>,
}

impl InteropWriter {
    /// 创建写出器
    pub fn new(directory: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            stem: stem.into(),
            base: None,
        }
    }

    /// 网格文件路径
    pub fn grid_path(&self) -> PathBuf {
        self.directory.join(format!("{}_grid.mhx", self.stem))
    }

    /// 解文件路径
    pub fn solution_path(&self) -> PathBuf {
        self.directory.join(format!("{}_sol.mhx", self.stem))
    }
}

impl FormatWriter for InteropWriter {
    fn format(&self) -> OutputFormat {
        OutputFormat::Interop
    }

    fn needs_volumes(&self) -> bool {
        true
    }

    fn base_signature(&self) -> Option<u64> {
        self.base
    }

    fn write_base(&mut self, mesh: StepMesh<'_>) -> IoResult<Option<PathBuf>> {
        let signature = mesh.signature;
        if self.base == Some(signature) {
            return Ok(None);
        }
        let doc = GridDocument::from_mesh(mesh);
        let path = self.grid_path();
        write_atomic(&path, |w| serde_json::to_writer(w, &doc).map_err(Into::into))?;
        self.base = Some(signature);
        info!(path = %path.display(), nodes = doc.n_nodes, "写出互操作网格文件");
        Ok(Some(path))
    }

    fn write_solution(&mut self, mesh: StepMesh<'_>, field: &GlobalField, iteration: u64) -> IoResult<Vec<PathBuf>> {
        field.validate(mesh.n_nodes_owned)?;
        let doc = SolutionDocument {
            kind: SOLUTION_KIND.into(),
            version: INTEROP_VERSION,
            signature: mesh.signature,
            iteration,
            n_conserved: field.n_conserved,
            fields: field
                .names
                .iter()
                .zip(&field.data)
                .map(|(name, values)| FieldArray {
                    name: name.clone(),
                    values: values.clone(),
                })
                .collect(),
        };
        let path = self.solution_path();
        write_atomic(&path, |w| serde_json::to_writer(w, &doc).map_err(Into::into))?;
        info!(path = %path.display(), iteration, "写出互操作解文件");
        Ok(vec![path])
    }
}

fn read_document<T: for<'de> Deserialize<'de>>(path: &Path) -> IoResult<T> {
    let file = File::open(path).map_err(|e| IoError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| IoError::ParseError {
        file: path.display().to_string(),
        line: e.line(),
        message: e.to_string(),
    })
}

/// 读取网格文档
pub fn read_grid(path: impl AsRef<Path>) -> IoResult<GridDocument> {
    let doc: GridDocument = read_document(path.as_ref())?;
    if doc.kind != GRID_KIND {
        return Err(IoError::invalid_data(format!("不是互操作网格文件: {}", doc.kind)));
    }
    Ok(doc)
}

/// 读取解文档，并确认与网格文档配套
pub fn read_solution(path: impl AsRef<Path>, grid: &GridDocument) -> IoResult<SolutionDocument> {
    let doc: SolutionDocument = read_document(path.as_ref())?;
    if doc.kind != SOLUTION_KIND {
        return Err(IoError::invalid_data(format!("不是互操作解文件: {}", doc.kind)));
    }
    if doc.signature != grid.signature {
        return Err(IoError::invalid_data(format!(
            "解文件签名 {:016x} 与网格文件 {:016x} 不匹配",
            doc.signature, grid.signature
        )));
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mh_mesh::{BoundaryMarker, GlobalMesh};

    fn mesh() -> GlobalMesh {
        let mut elements = ElementSet::new();
        elements.push(ElementType::Quadrilateral, &[0, 1, 3, 2]);
        let mut lower = BoundaryMarker::new("lower");
        lower.elements.push(ElementType::Line, &[0, 1]);
        GlobalMesh {
            dim: 2,
            n_nodes_with_halos: 5,
            n_nodes_owned: 4,
            coords: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
            elements,
            volumes: Some(vec![0.25; 4]),
            markers: vec![lower],
            rank_offsets: vec![0, 2, 4],
        }
    }

    fn field(scale: f64) -> GlobalField {
        GlobalField {
            names: vec!["Rho".into(), "Pressure".into()],
            n_conserved: 1,
            data: vec![vec![scale; 4], vec![2.0 * scale; 4]],
        }
    }

    #[test]
    fn test_grid_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = InteropWriter::new(dir.path(), "flow");
        let first = w.write_step(StepMesh::new(&mesh()), &field(1.0), 1).unwrap();
        assert_eq!(first, vec![w.grid_path(), w.solution_path()]);
        let second = w.write_step(StepMesh::new(&mesh()), &field(2.0), 2).unwrap();
        assert_eq!(second, vec![w.solution_path()]);
        assert!(w.write_base(StepMesh::new(&mesh())).unwrap().is_none());
    }

    #[test]
    fn test_step_signature_drives_base_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = InteropWriter::new(dir.path(), "flow");
        let m = mesh();
        let step = StepMesh { mesh: &m, signature: 7 };
        assert_eq!(w.write_step(step, &field(1.0), 1).unwrap().len(), 2);
        assert_eq!(w.base_signature(), Some(7));
        assert_eq!(w.write_step(step, &field(1.0), 2).unwrap().len(), 1);

        let grid = read_grid(w.grid_path()).unwrap();
        assert_eq!(grid.signature, 7);
        // 真实签名与已写出的基础记录不同，网格重写
        assert_eq!(w.write_step(StepMesh::new(&m), &field(1.0), 3).unwrap().len(), 2);
    }

    #[test]
    fn test_documents_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = InteropWriter::new(dir.path(), "flow");
        w.write_step(StepMesh::new(&mesh()), &field(3.0), 10).unwrap();

        let grid = read_grid(w.grid_path()).unwrap();
        assert_eq!(grid.n_nodes, 4);
        assert_eq!(grid.coordinates[1], vec![0.0, 0.0, 1.0, 1.0]);
        assert_eq!(grid.sections.len(), 1);
        assert_eq!(grid.sections[0].connectivity, vec![1, 2, 4, 3]);
        assert_eq!(grid.markers[0].sections[0].etype, ElementType::Line);
        assert_eq!(grid.zone.rank_offsets, vec![0, 2, 4]);
        assert_eq!(grid.volumes.as_deref(), Some(&[0.25; 4][..]));

        let sol = read_solution(w.solution_path(), &grid).unwrap();
        assert_eq!(sol.iteration, 10);
        assert_eq!(sol.fields[1].name, "Pressure");
        assert_eq!(sol.fields[1].values, vec![6.0; 4]);
    }

    #[test]
    fn test_non_finite_values_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = InteropWriter::new(dir.path(), "flow");
        let mut f = field(1.0);
        f.data[0] = vec![1.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY];
        let mut m = mesh();
        m.volumes = Some(vec![0.25, f64::NAN, 0.25, 0.25]);
        w.write_step(StepMesh::new(&m), &f, 4).unwrap();

        let text = std::fs::read_to_string(w.solution_path()).unwrap();
        assert!(text.contains(r#"[1.0,"NaN","inf","-inf"]"#));
        assert!(!text.contains("null"));

        let grid = read_grid(w.grid_path()).unwrap();
        assert!(grid.volumes.unwrap()[1].is_nan());
        let sol = read_solution(w.solution_path(), &read_grid(w.grid_path()).unwrap()).unwrap();
        let rho = &sol.fields[0].values;
        assert_eq!(rho[0], 1.0);
        assert!(rho[1].is_nan());
        assert_eq!(rho[2], f64::INFINITY);
        assert_eq!(rho[3], f64::NEG_INFINITY);
    }

    #[test]
    fn test_unknown_text_value_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = InteropWriter::new(dir.path(), "flow");
        w.write_step(StepMesh::new(&mesh()), &field(1.0), 1).unwrap();
        let grid = read_grid(w.grid_path()).unwrap();
        let text = std::fs::read_to_string(w.solution_path()).unwrap();
        std::fs::write(w.solution_path(), text.replacen("2.0", "\"big\"", 1)).unwrap();
        assert!(matches!(
            read_solution(w.solution_path(), &grid),
            Err(IoError::ParseError { .. })
        ));
    }

    #[test]
    fn test_signature_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = InteropWriter::new(dir.path(), "flow");
        w.write_step(StepMesh::new(&mesh()), &field(1.0), 1).unwrap();
        let mut grid = read_grid(w.grid_path()).unwrap();
        grid.signature ^= 1;
        assert!(read_solution(w.solution_path(), &grid).is_err());
    }
}
