// crates/mh_io/src/writers/restart.rs

//! 原生重启文件
//!
//! 每个全局节点一条记录：节点编号 + 全部变量（守恒 + 派生）。
//!
//! # 文本格式 (`<stem>.dat`)
//!
//! ```text
//! "PointID"	"Rho"	"Rho_U"	...
//! 0	1.0000000000000000e0	...
//! ITER= 120
//! N_CONSERVED= 4
//! ```
//!
//! 数值以 `{:.Pe}` 写出；默认 `P = 16`（17 位有效数字），f64 可无损回读。
//!
//! # 二进制格式 (`<stem>.bin`)
//!
//! ```text
//! [魔数 MHRS 4B][版本 u32][节点数 u64][变量数 u32][守恒变量数 u32][迭代号 u64]
//! [变量名: (长度 u32 + UTF-8) × 变量数]
//! [(编号 u64 + f64 × 变量数) × 节点数]
//! [CRC32 u32]
//! ```
//!
//! 全部小端。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use mh_config::{OutputFormat, RestartEncoding};
use tracing::info;

use crate::buffer::GlobalField;
use crate::crc::crc32;
use crate::error::{IoError, IoResult};
use crate::writers::{write_atomic, FormatWriter, StepMesh};

/// 二进制魔数
const RESTART_MAGIC: &[u8; 4] = b"MHRS";

/// 二进制格式版本
const RESTART_VERSION: u32 = 1;

/// 重启文件写出器
#[derive(Debug, Clone)]
pub struct RestartWriter {
    directory: PathBuf,
    stem: String,
    encoding: RestartEncoding,
    precision: usize,
    base: Option<u64>,
}

impl RestartWriter {
    /// 创建写出器
    pub fn new(directory: impl Into<PathBuf>, stem: impl Into<String>, encoding: RestartEncoding, precision: usize) -> Self {
        Self {
            directory: directory.into(),
            stem: stem.into(),
            encoding,
            precision,
            base: None,
        }
    }

    /// 输出文件路径
    pub fn path(&self) -> PathBuf {
        let ext = match self.encoding {
            RestartEncoding::Text => "dat",
            RestartEncoding::Binary => "bin",
        };
        self.directory.join(format!("{}.{}", self.stem, ext))
    }
}

impl FormatWriter for RestartWriter {
    fn format(&self) -> OutputFormat {
        OutputFormat::Restart
    }

    fn base_signature(&self) -> Option<u64> {
        self.base
    }

    /// 重启文件没有独立的基础记录，只记录状态
    fn write_base(&mut self, mesh: StepMesh<'_>) -> IoResult<Option<PathBuf>> {
        self.base = Some(mesh.signature);
        Ok(None)
    }

    fn write_solution(&mut self, mesh: StepMesh<'_>, field: &GlobalField, iteration: u64) -> IoResult<Vec<PathBuf>> {
        field.validate(mesh.n_nodes_owned)?;
        let path = self.path();
        let bytes = match self.encoding {
            RestartEncoding::Text => encode_text(field, iteration, self.precision),
            RestartEncoding::Binary => encode_binary(field, iteration),
        };
        write_atomic(&path, |w| w.write_all(&bytes))?;
        info!(path = %path.display(), nodes = field.n_nodes(), "写出重启文件");
        Ok(vec![path])
    }
}

fn encode_text(field: &GlobalField, iteration: u64, precision: usize) -> Vec<u8> {
    let mut out = String::with_capacity(field.n_nodes() * field.n_vars() * (precision + 8));
    out.push_str("\"PointID\"");
    for name in &field.names {
        out.push_str("\t\"");
        out.push_str(name);
        out.push('"');
    }
    out.push('\n');

    for g in 0..field.n_nodes() {
        out.push_str(&g.to_string());
        for v in field.row(g) {
            out.push('\t');
            out.push_str(&format!("{:.*e}", precision, v));
        }
        out.push('\n');
    }
    out.push_str(&format!("ITER= {}\n", iteration));
    out.push_str(&format!("N_CONSERVED= {}\n", field.n_conserved));
    out.into_bytes()
}

fn encode_binary(field: &GlobalField, iteration: u64) -> Vec<u8> {
    let n_nodes = field.n_nodes();
    let n_vars = field.n_vars();
    let mut data = Vec::with_capacity(32 + n_nodes * (8 + 8 * n_vars));

    data.extend_from_slice(RESTART_MAGIC);
    data.extend_from_slice(&RESTART_VERSION.to_le_bytes());
    data.extend_from_slice(&(n_nodes as u64).to_le_bytes());
    data.extend_from_slice(&(n_vars as u32).to_le_bytes());
    data.extend_from_slice(&(field.n_conserved as u32).to_le_bytes());
    data.extend_from_slice(&iteration.to_le_bytes());

    for name in &field.names {
        data.extend_from_slice(&(name.len() as u32).to_le_bytes());
        data.extend_from_slice(name.as_bytes());
    }

    for g in 0..n_nodes {
        data.extend_from_slice(&(g as u64).to_le_bytes());
        for v in field.row(g) {
            data.extend_from_slice(&v.to_le_bytes());
        }
    }

    let crc = crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    data
}

// =============================================================================
// 读取
// =============================================================================

/// 读回的重启数据
#[derive(Debug, Clone, PartialEq)]
pub struct RestartData {
    /// 编码
    pub encoding: RestartEncoding,
    /// 迭代号
    pub iteration: u64,
    /// 按节点编号排列的全局场
    pub field: GlobalField,
}

/// 读取重启文件，自动识别文本或二进制
pub fn read_restart(path: impl AsRef<Path>) -> IoResult<RestartData> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| IoError::io(path, e))?;
    if bytes.starts_with(RESTART_MAGIC) {
        decode_binary(&bytes)
    } else {
        let text = String::from_utf8(bytes).map_err(|_| IoError::ParseError {
            file: path.display().to_string(),
            line: 0,
            message: "既不是二进制重启文件，也不是 UTF-8 文本".into(),
        })?;
        decode_text(&text, &path.display().to_string())
    }
}

/// 按顺序读取小端字段的游标
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> IoResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len());
        match end {
            Some(end) => {
                let s = &self.data[self.pos..end];
                self.pos = end;
                Ok(s)
            }
            None => Err(IoError::invalid_data(format!("重启文件在偏移 {} 处截断", self.pos))),
        }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn array<const N: usize>(&mut self) -> IoResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> IoResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> IoResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> IoResult<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }
}

fn decode_binary(bytes: &[u8]) -> IoResult<RestartData> {
    if bytes.len() < 36 {
        return Err(IoError::invalid_data("重启文件太小"));
    }
    let (body, tail) = bytes.split_at(bytes.len() - 4);
    let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let found = crc32(body);
    if expected != found {
        return Err(IoError::Checksum { expected, found });
    }

    let mut cur = Cursor { data: body, pos: 4 };
    let version = cur.u32()?;
    if version != RESTART_VERSION {
        return Err(IoError::invalid_data(format!("不支持的重启文件版本: {}", version)));
    }
    let n_nodes = cur.u64()? as usize;
    let n_vars = cur.u32()? as usize;
    let n_conserved = cur.u32()? as usize;
    let iteration = cur.u64()?;

    let mut names = Vec::with_capacity(n_vars.min(cur.remaining() / 4));
    for _ in 0..n_vars {
        let len = cur.u32()? as usize;
        let raw = cur.take(len)?;
        let name = std::str::from_utf8(raw).map_err(|_| IoError::invalid_data("变量名不是 UTF-8"))?;
        names.push(name.to_string());
    }

    // 按头部分配之前先确认记录区长度
    let records = n_vars
        .checked_mul(8)
        .and_then(|r| r.checked_add(8))
        .and_then(|r| r.checked_mul(n_nodes));
    if records != Some(cur.remaining()) {
        return Err(IoError::invalid_data(format!(
            "头部声明 {} 个节点 × {} 个变量，与剩余 {} 字节不符",
            n_nodes,
            n_vars,
            cur.remaining()
        )));
    }

    let mut data = vec![Vec::with_capacity(n_nodes); n_vars];
    for g in 0..n_nodes {
        let id = cur.u64()?;
        if id != g as u64 {
            return Err(IoError::invalid_data(format!("第 {} 条记录的节点编号为 {}", g, id)));
        }
        for col in data.iter_mut() {
            col.push(cur.f64()?);
        }
    }

    Ok(RestartData {
        encoding: RestartEncoding::Binary,
        iteration,
        field: GlobalField {
            names,
            n_conserved,
            data,
        },
    })
}

fn decode_text(text: &str, file: &str) -> IoResult<RestartData> {
    let parse_err = |line: usize, message: String| IoError::ParseError {
        file: file.to_string(),
        line,
        message,
    };

    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));
    let (_, header) = lines.next().ok_or_else(|| parse_err(1, "空文件".into()))?;
    let mut columns = header.split('\t').map(|c| c.trim().trim_matches('"'));
    if columns.next() != Some("PointID") {
        return Err(parse_err(1, "首列必须为 \"PointID\"".into()));
    }
    let names: Vec<String> = columns.map(String::from).collect();

    let mut data = vec![Vec::new(); names.len()];
    let mut iteration = None;
    let mut n_conserved = None;
    let mut n_rows = 0usize;

    for (line_no, line) in lines {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("ITER=") {
            iteration = Some(
                rest.trim()
                    .parse::<u64>()
                    .map_err(|e| parse_err(line_no, format!("ITER: {}", e)))?,
            );
            continue;
        }
        if let Some(rest) = line.strip_prefix("N_CONSERVED=") {
            n_conserved = Some(
                rest.trim()
                    .parse::<usize>()
                    .map_err(|e| parse_err(line_no, format!("N_CONSERVED: {}", e)))?,
            );
            continue;
        }

        let mut cells = line.split('\t');
        let id: usize = cells
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|e| parse_err(line_no, format!("节点编号: {}", e)))?;
        if id != n_rows {
            return Err(parse_err(line_no, format!("节点编号 {} 不连续，期望 {}", id, n_rows)));
        }
        let mut count = 0;
        for (col, cell) in data.iter_mut().zip(cells.by_ref()) {
            let v: f64 = cell
                .trim()
                .parse()
                .map_err(|e| parse_err(line_no, format!("数值 {:?}: {}", cell, e)))?;
            col.push(v);
            count += 1;
        }
        if count != names.len() || cells.next().is_some() {
            return Err(parse_err(line_no, format!("列数与表头不一致（{} 个变量）", names.len())));
        }
        n_rows += 1;
    }

    let iteration = iteration.ok_or_else(|| parse_err(0, "缺少 ITER= 行".into()))?;
    let n_conserved = n_conserved.ok_or_else(|| parse_err(0, "缺少 N_CONSERVED= 行".into()))?;
    if n_conserved > names.len() {
        return Err(parse_err(0, format!("N_CONSERVED={} 超过变量数", n_conserved)));
    }

    Ok(RestartData {
        encoding: RestartEncoding::Text,
        iteration,
        field: GlobalField {
            names,
            n_conserved,
            data,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mh_mesh::{ElementSet, GlobalMesh};

    fn mesh(n: usize) -> GlobalMesh {
        GlobalMesh {
            dim: 2,
            n_nodes_with_halos: n,
            n_nodes_owned: n,
            coords: vec![0.0; 2 * n],
            elements: ElementSet::new(),
            volumes: None,
            markers: Vec::new(),
            rank_offsets: vec![0, n],
        }
    }

    fn field() -> GlobalField {
        GlobalField {
            names: vec!["Rho".into(), "Rho_E".into(), "Pressure".into()],
            n_conserved: 2,
            data: vec![
                vec![1.0, 0.1 + 0.2, std::f64::consts::PI],
                vec![-2.5e-300, 1.0 / 3.0, 7.0e12],
                vec![0.0, -0.0, 123.456],
            ],
        }
    }

    #[test]
    fn test_binary_roundtrip_bit_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = RestartWriter::new(dir.path(), "restart_flow", RestartEncoding::Binary, 16);
        let paths = w.write_step(StepMesh::new(&mesh(3)), &field(), 42).unwrap();
        assert_eq!(paths, vec![dir.path().join("restart_flow.bin")]);

        let back = read_restart(&paths[0]).unwrap();
        assert_eq!(back.encoding, RestartEncoding::Binary);
        assert_eq!(back.iteration, 42);
        assert_eq!(back.field.names, field().names);
        for (a, b) in back.field.data.iter().flatten().zip(field().data.iter().flatten()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_text_roundtrip_lossless_at_default_precision() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = RestartWriter::new(dir.path(), "restart_flow", RestartEncoding::Text, 16);
        let paths = w.write_step(StepMesh::new(&mesh(3)), &field(), 7).unwrap();

        let back = read_restart(&paths[0]).unwrap();
        assert_eq!(back.encoding, RestartEncoding::Text);
        assert_eq!(back.iteration, 7);
        assert_eq!(back.field.n_conserved, 2);
        assert_eq!(back.field, field());
    }

    #[test]
    fn test_text_low_precision_within_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = RestartWriter::new(dir.path(), "r", RestartEncoding::Text, 5);
        let paths = w.write_step(StepMesh::new(&mesh(3)), &field(), 1).unwrap();
        let back = read_restart(&paths[0]).unwrap();
        for (a, b) in back.field.data.iter().flatten().zip(field().data.iter().flatten()) {
            assert!((a - b).abs() <= 1e-5 * b.abs());
        }
    }

    #[test]
    fn test_text_header() {
        let bytes = encode_text(&field(), 3, 2);
        let text = String::from_utf8(bytes).unwrap();
        let first = text.lines().next().unwrap();
        assert_eq!(first, "\"PointID\"\t\"Rho\"\t\"Rho_E\"\t\"Pressure\"");
        assert!(text.contains("\n0\t1.00e0\t"));
        assert!(text.ends_with("ITER= 3\nN_CONSERVED= 2\n"));
    }

    #[test]
    fn test_corrupted_binary_detected() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = RestartWriter::new(dir.path(), "r", RestartEncoding::Binary, 16);
        let path = w.write_step(StepMesh::new(&mesh(3)), &field(), 1).unwrap().remove(0);
        let mut bytes = fs::read(&path).unwrap();
        bytes[40] ^= 0xFF;
        fs::write(&path, bytes).unwrap();
        assert!(matches!(read_restart(&path), Err(IoError::Checksum { .. })));
    }

    #[test]
    fn test_oversized_header_rejected() {
        let mut bytes = encode_binary(&field(), 1);
        bytes.truncate(bytes.len() - 4);
        bytes[8..16].copy_from_slice(&(u64::MAX / 16).to_le_bytes());
        let crc = crc32(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        assert!(matches!(decode_binary(&bytes), Err(IoError::InvalidData { .. })));
    }

    #[test]
    fn test_non_finite_values_read_back() {
        let mut f = field();
        f.data[2] = vec![f64::NAN, f64::INFINITY, f64::NEG_INFINITY];
        for encoding in [RestartEncoding::Text, RestartEncoding::Binary] {
            let dir = tempfile::tempdir().unwrap();
            let mut w = RestartWriter::new(dir.path(), "r", encoding, 16);
            let path = w.write_step(StepMesh::new(&mesh(3)), &f, 2).unwrap().remove(0);
            let p = &read_restart(&path).unwrap().field.data[2];
            assert!(p[0].is_nan());
            assert_eq!(p[1], f64::INFINITY);
            assert_eq!(p[2], f64::NEG_INFINITY);
        }
    }

    #[test]
    fn test_overwrite_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = RestartWriter::new(dir.path(), "r", RestartEncoding::Text, 16);
        let p1 = w.write_step(StepMesh::new(&mesh(3)), &field(), 9).unwrap();
        let first = fs::read(&p1[0]).unwrap();
        let p2 = w.write_step(StepMesh::new(&mesh(3)), &field(), 9).unwrap();
        assert_eq!(p1, p2);
        assert_eq!(fs::read(&p2[0]).unwrap(), first);
    }

    #[test]
    fn test_field_size_checked() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = RestartWriter::new(dir.path(), "r", RestartEncoding::Text, 16);
        assert!(w.write_step(StepMesh::new(&mesh(4)), &field(), 1).is_err());
    }
}
