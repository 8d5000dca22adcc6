// crates/mh_io/src/history.rs

//! 收敛历史
//!
//! 每个求解器迭代追加一行，迭代号严格递增且无间隙，已写出的行不再改动。
//! 每行写出后立即刷新，同时把精简信息写到交互状态流（默认标准输出）。
//!
//! # 双时间步
//!
//! 记录携带外迭代与内迭代序号。下一条记录只能是同一外迭代的下一个内迭代，
//! 或下一个外迭代的第 0 个内迭代。首个残差（log10）不大于 `inner_tolerance`
//! 或内迭代达到 `max_inner - 1` 时，该内迭代标记为收敛，并结束当前外迭代：
//! 其后只接受下一个外迭代的第 0 个内迭代。
//!
//! # 文件风格
//!
//! - CSV：`"Iteration","Time(s)",...` 表头，逗号分隔
//! - Tecplot：`TITLE` / `VARIABLES =` 表头，空格分隔

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use mh_config::{HistoryStyle, OutputConfig, SolverKind};
use mh_foundation::MhError;
use thiserror::Error;
use tracing::debug;

/// 历史模块结果类型别名
pub type HistoryResult<T> = Result<T, HistoryError>;

/// 历史错误
#[derive(Error, Debug)]
pub enum HistoryError {
    /// 记录顺序错误
    #[error("历史记录顺序错误: 期望 {expected}, 实际 {found}")]
    OutOfOrder {
        /// 允许的下一条记录
        expected: String,
        /// 实际的记录
        found: String,
    },

    /// 列数与表头不一致
    #[error("{what} 个数不一致: 表头 {expected}, 记录 {actual}")]
    ColumnMismatch {
        /// 列类别
        what: &'static str,
        /// 表头列数
        expected: usize,
        /// 记录列数
        actual: usize,
    },

    /// 双时间步记录缺少内迭代序号，或单时间步记录携带了内迭代序号
    #[error("迭代 {iteration} 的内迭代序号与双时间步设置不符")]
    InnerMismatch {
        /// 外迭代
        iteration: u64,
    },

    /// 文件读写失败
    #[error("历史文件读写失败: {}: {source}", path.display())]
    Io {
        /// 文件
        path: PathBuf,
        /// 底层错误
        #[source]
        source: io::Error,
    },

    /// 状态流写出失败
    #[error("状态流写出失败: {0}")]
    Status(#[source] io::Error),
}

impl From<HistoryError> for MhError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::Io { path, source } => MhError::io_with_source(path.display().to_string(), source),
            HistoryError::Status(source) => MhError::io_with_source("history status stream", source),
            e => MhError::invalid_input(e.to_string()),
        }
    }
}

/// 一条历史记录
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryRecord {
    /// 迭代号（双时间步时为外迭代）
    pub iteration: u64,
    /// 内迭代序号（仅双时间步）
    pub inner: Option<u64>,
    /// 墙钟时间 [s]
    pub elapsed: f64,
    /// 各方程残差（log10）
    pub residuals: Vec<f64>,
    /// 目标量
    pub objectives: Vec<f64>,
}

/// 收敛历史记录器
pub struct HistoryLogger {
    path: PathBuf,
    writer: BufWriter<File>,
    status: Box<dyn Write + Send>,
    style: HistoryStyle,
    solver: SolverKind,
    dual_time: bool,
    inner_tolerance: f64,
    max_inner: u64,
    residual_names: Vec<String>,
    objective_names: Vec<String>,
    header_written: bool,
    last: Option<(u64, Option<u64>)>,
    /// 上一条记录的内迭代已收敛
    last_converged: bool,
}

impl std::fmt::Debug for HistoryLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLogger")
            .field("path", &self.path)
            .field("style", &self.style)
            .field("dual_time", &self.dual_time)
            .field("last", &self.last)
            .finish()
    }
}

impl HistoryLogger {
    /// 创建（截断）历史文件 `<directory>/<stem>.csv|.dat`
    pub fn create(config: &OutputConfig, residual_names: Vec<String>) -> HistoryResult<Self> {
        let h = &config.history;
        let ext = match h.style {
            HistoryStyle::Csv => "csv",
            HistoryStyle::Tecplot => "dat",
        };
        let path = config.directory.join(format!("{}.{}", h.stem, ext));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| HistoryError::Io {
                path: path.clone(),
                source,
            })?;
        }
        let file = File::create(&path).map_err(|source| HistoryError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "创建收敛历史文件");

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            status: Box::new(io::stdout()),
            style: h.style,
            solver: config.solver,
            dual_time: h.dual_time,
            inner_tolerance: h.inner_tolerance,
            max_inner: h.max_inner as u64,
            residual_names,
            objective_names: h.objectives.clone(),
            header_written: false,
            last: None,
            last_converged: false,
        })
    }

    /// 替换交互状态流
    pub fn with_status_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.status = sink;
        self
    }

    /// 历史文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 最后一条记录的迭代号
    pub fn last_iteration(&self) -> Option<u64> {
        self.last.map(|(it, _)| it)
    }

    /// 列名
    pub fn columns(&self) -> Vec<String> {
        let prefix = match self.solver {
            SolverKind::Flow => "Res_Flow",
            SolverKind::Adjoint => "Res_Adj",
            SolverKind::Linearized => "Res_Lin",
        };
        let mut cols = vec!["Iteration".to_string()];
        if self.dual_time {
            cols.push("Inner_Iter".into());
        }
        cols.push("Time(s)".into());
        cols.extend(self.residual_names.iter().map(|n| format!("{}[{}]", prefix, n)));
        cols.extend(self.objective_names.iter().cloned());
        if self.dual_time {
            cols.push("Inner_Converged".into());
        }
        cols
    }

    /// 写出表头；已写出时为空操作
    pub fn write_header(&mut self) -> HistoryResult<()> {
        if self.header_written {
            return Ok(());
        }
        let quoted: Vec<String> = self.columns().iter().map(|c| format!("\"{}\"", c)).collect();
        let text = match self.style {
            HistoryStyle::Csv => format!("{}\n", quoted.join(",")),
            HistoryStyle::Tecplot => format!(
                "TITLE = \"Convergence history\"\nVARIABLES = {}\nZONE T=\"history\"\n",
                quoted.join(",")
            ),
        };
        self.emit(&text)?;
        self.header_written = true;
        Ok(())
    }

    /// 内迭代是否收敛
    pub fn is_inner_converged(&self, record: &HistoryRecord) -> bool {
        let by_residual = record.residuals.first().is_some_and(|&r| r <= self.inner_tolerance);
        let by_limit = record
            .inner
            .is_some_and(|i| i + 1 >= self.max_inner);
        by_residual || by_limit
    }

    /// 追加一条记录（必要时先写表头）
    pub fn append_record(&mut self, record: &HistoryRecord) -> HistoryResult<()> {
        self.check_order(record)?;
        if record.residuals.len() != self.residual_names.len() {
            return Err(HistoryError::ColumnMismatch {
                what: "残差",
                expected: self.residual_names.len(),
                actual: record.residuals.len(),
            });
        }
        if record.objectives.len() != self.objective_names.len() {
            return Err(HistoryError::ColumnMismatch {
                what: "目标量",
                expected: self.objective_names.len(),
                actual: record.objectives.len(),
            });
        }
        self.write_header()?;

        let mut cells = vec![record.iteration.to_string()];
        if let Some(inner) = record.inner {
            cells.push(inner.to_string());
        }
        cells.push(format!("{:.6e}", record.elapsed));
        cells.extend(record.residuals.iter().map(|r| format!("{:.8}", r)));
        cells.extend(record.objectives.iter().map(|o| format!("{:.10e}", o)));
        let converged = self.dual_time && self.is_inner_converged(record);
        if self.dual_time {
            cells.push(u8::from(converged).to_string());
        }
        let sep = match self.style {
            HistoryStyle::Csv => ",",
            HistoryStyle::Tecplot => " ",
        };
        self.emit(&format!("{}\n", cells.join(sep)))?;
        self.last = Some((record.iteration, record.inner));
        self.last_converged = converged;

        let mut line = match record.inner {
            Some(inner) => format!("{:>8} {:>6}", record.iteration, inner),
            None => format!("{:>8}", record.iteration),
        };
        line.push_str(&format!(" {:>12.4e}", record.elapsed));
        if let (Some(name), Some(r)) = (self.residual_names.first(), record.residuals.first()) {
            line.push_str(&format!("  {}={:.6}", name, r));
        }
        if converged {
            line.push_str("  (inner converged)");
        }
        writeln!(self.status, "{}", line).map_err(HistoryError::Status)?;
        Ok(())
    }

    fn check_order(&self, record: &HistoryRecord) -> HistoryResult<()> {
        if self.dual_time != record.inner.is_some() {
            return Err(HistoryError::InnerMismatch {
                iteration: record.iteration,
            });
        }
        let found = (record.iteration, record.inner);
        let ok = match (self.last, record.inner) {
            (None, None) => true,
            (None, Some(inner)) => inner == 0,
            (Some((last, _)), None) => found.0 == last + 1,
            (Some((last, last_inner)), Some(inner)) => {
                let next_inner = last_inner.map_or(0, |i| i + 1);
                let same_outer = !self.last_converged && found.0 == last && inner == next_inner;
                same_outer || (found.0 == last + 1 && inner == 0)
            }
        };
        if ok {
            return Ok(());
        }
        let expected = match self.last {
            None => "内迭代 0".to_string(),
            Some((last, None)) => (last + 1).to_string(),
            Some((last, Some(_))) if self.last_converged => format!("{}/0", last + 1),
            Some((last, Some(i))) => format!("{}/{} 或 {}/0", last, i + 1, last + 1),
        };
        let found = match record.inner {
            Some(i) => format!("{}/{}", record.iteration, i),
            None => record.iteration.to_string(),
        };
        Err(HistoryError::OutOfOrder { expected, found })
    }

    fn emit(&mut self, text: &str) -> HistoryResult<()> {
        let path = &self.path;
        self.writer
            .write_all(text.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|source| HistoryError::Io {
                path: path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mh_config::HistoryConfig;

    fn config(dir: &Path, history: HistoryConfig) -> OutputConfig {
        OutputConfig {
            history,
            ..OutputConfig::default().with_directory(dir)
        }
    }

    fn record(iteration: u64, inner: Option<u64>, res: f64) -> HistoryRecord {
        HistoryRecord {
            iteration,
            inner,
            elapsed: iteration as f64 * 0.1,
            residuals: vec![res, res - 1.0],
            objectives: Vec::new(),
        }
    }

    fn names() -> Vec<String> {
        vec!["Rho".into(), "Rho_E".into()]
    }

    #[test]
    fn test_csv_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = HistoryLogger::create(&config(dir.path(), HistoryConfig::default()), names())
            .unwrap()
            .with_status_sink(Box::new(io::sink()));
        log.write_header().unwrap();
        log.write_header().unwrap();
        for it in 5..8 {
            log.append_record(&record(it, None, -1.0 - it as f64)).unwrap();
        }

        let text = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "\"Iteration\",\"Time(s)\",\"Res_Flow[Rho]\",\"Res_Flow[Rho_E]\"");
        assert_eq!(lines.len(), 4);
        let iters: Vec<u64> = lines[1..].iter().map(|l| l.split(',').next().unwrap().parse().unwrap()).collect();
        assert_eq!(iters, vec![5, 6, 7]);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = HistoryLogger::create(&config(dir.path(), HistoryConfig::default()), names())
            .unwrap()
            .with_status_sink(Box::new(io::sink()));
        log.append_record(&record(1, None, -2.0)).unwrap();
        assert!(matches!(
            log.append_record(&record(3, None, -2.0)),
            Err(HistoryError::OutOfOrder { .. })
        ));
        assert!(matches!(
            log.append_record(&record(1, None, -2.0)),
            Err(HistoryError::OutOfOrder { .. })
        ));
        log.append_record(&record(2, None, -2.0)).unwrap();
        assert_eq!(log.last_iteration(), Some(2));
    }

    #[test]
    fn test_column_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = HistoryLogger::create(&config(dir.path(), HistoryConfig::default()), names())
            .unwrap()
            .with_status_sink(Box::new(io::sink()));
        let mut r = record(0, None, -1.0);
        r.residuals.pop();
        assert!(matches!(log.append_record(&r), Err(HistoryError::ColumnMismatch { .. })));
    }

    #[test]
    fn test_dual_time() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryConfig {
            dual_time: true,
            inner_tolerance: -6.0,
            max_inner: 3,
            style: HistoryStyle::Tecplot,
            ..HistoryConfig::default()
        };
        let mut log = HistoryLogger::create(&config(dir.path(), history), names())
            .unwrap()
            .with_status_sink(Box::new(io::sink()));

        log.append_record(&record(0, Some(0), -3.0)).unwrap();
        log.append_record(&record(0, Some(1), -7.0)).unwrap();
        log.append_record(&record(1, Some(0), -2.0)).unwrap();
        log.append_record(&record(1, Some(1), -2.5)).unwrap();
        log.append_record(&record(1, Some(2), -2.8)).unwrap();
        assert!(matches!(
            log.append_record(&record(3, Some(0), -2.0)),
            Err(HistoryError::OutOfOrder { .. })
        ));
        assert!(matches!(
            log.append_record(&record(2, None, -2.0)),
            Err(HistoryError::InnerMismatch { iteration: 2 })
        ));

        let text = fs::read_to_string(log.path()).unwrap();
        assert!(log.path().ends_with("history.dat"));
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("TITLE"));
        assert!(lines[1].contains("\"Inner_Iter\""));
        assert!(lines[1].ends_with("\"Inner_Converged\""));
        let flags: Vec<&str> = lines[3..].iter().map(|l| l.rsplit(' ').next().unwrap()).collect();
        // 残差达标 / 达到 max_inner - 1
        assert_eq!(flags, vec!["0", "1", "0", "0", "1"]);
    }

    #[test]
    fn test_converged_inner_ends_outer_step() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryConfig {
            dual_time: true,
            inner_tolerance: -6.0,
            max_inner: 2,
            ..HistoryConfig::default()
        };
        let mut log = HistoryLogger::create(&config(dir.path(), history), names())
            .unwrap()
            .with_status_sink(Box::new(io::sink()));

        log.append_record(&record(0, Some(0), -3.0)).unwrap();
        // 达到 max_inner - 1
        log.append_record(&record(0, Some(1), -3.0)).unwrap();
        let err = log.append_record(&record(0, Some(2), -3.0)).unwrap_err();
        match err {
            HistoryError::OutOfOrder { expected, found } => {
                assert_eq!(expected, "1/0");
                assert_eq!(found, "0/2");
            }
            e => panic!("unexpected error: {e}"),
        }

        // 残差达标
        log.append_record(&record(1, Some(0), -8.0)).unwrap();
        assert!(matches!(
            log.append_record(&record(1, Some(1), -8.0)),
            Err(HistoryError::OutOfOrder { .. })
        ));
        log.append_record(&record(2, Some(0), -3.0)).unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        let flags: Vec<&str> = text.lines().skip(1).map(|l| l.rsplit(',').next().unwrap()).collect();
        assert_eq!(flags, vec!["0", "1", "1", "0"]);
    }

    #[test]
    fn test_status_mirror() {
        #[derive(Clone, Default)]
        struct Shared(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let sink = Shared::default();
        let mut log = HistoryLogger::create(&config(dir.path(), HistoryConfig::default()), names())
            .unwrap()
            .with_status_sink(Box::new(sink.clone()));
        log.append_record(&record(1, None, -4.5)).unwrap();
        let text = String::from_utf8(sink.0.lock().clone()).unwrap();
        assert!(text.contains("Rho=-4.500000"));
    }
}
