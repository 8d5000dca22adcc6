// crates/mh_io/src/dispatcher.rs

//! 结果分发
//!
//! [`ResultDispatcher::set_result_files`] 是一次输出过程的入口，所有 rank 同时调用。
//! 对每个区域依次执行：
//!
//! 1. 本地派生量（各 rank）
//! 2. 几何合并 + 解合并（集合操作，结果装入该区域的 [`DistributedBuffer`]）
//! 3. 聚合者上依次调用已启用的写出器
//! 4. 表面导出（合并模式在聚合者，逐进程模式在每个 rank）
//! 5. 释放缓冲区
//!
//! 合并层错误是致命的，直接返回；写出器与表面导出的错误只影响自身，
//! 记录在 [`DispatchReport`] 中。

use std::path::{Path, PathBuf};

use mh_config::{OutputConfig, OutputFormat, SurfaceMode};
use mh_mesh::{LocalSolution, PartitionedMesh};
use mh_runtime::Communicator;
use tracing::{debug, error, info_span, warn};

use crate::buffer::DistributedBuffer;
use crate::capability::Capabilities;
use crate::error::{IoError, IoResult};
use crate::merge::{agree, GeometryMerger, MergeOptions, SolutionMerger};
use crate::surface::SurfaceExtractor;
use crate::writers::{create_writer, FormatWriter, StepMesh};

/// 单个区域的本地输入
#[derive(Debug, Clone, Copy)]
pub struct ZoneInput<'a> {
    /// 本 rank 的分区网格
    pub mesh: &'a PartitionedMesh,
    /// 本 rank 的本地解
    pub solution: &'a LocalSolution,
}

/// 单个写出器的结果
#[derive(Debug)]
pub struct WriterOutcome {
    /// 格式
    pub format: OutputFormat,
    /// 写出的文件
    pub artifacts: Vec<PathBuf>,
    /// 失败原因
    pub error: Option<IoError>,
}

impl WriterOutcome {
    /// 是否成功
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// 单个区域的结果
#[derive(Debug)]
pub struct ZoneReport {
    /// 区域编号
    pub zone: usize,
    /// 合并后的全局节点数
    pub n_global_nodes: usize,
    /// 写出器结果（仅聚合者非空）
    pub writers: Vec<WriterOutcome>,
    /// 表面导出结果（未启用或本 rank 不负责时为 `None`）
    pub surface: Option<IoResult<Vec<PathBuf>>>,
}

impl ZoneReport {
    /// 指定格式的结果
    pub fn writer(&self, format: OutputFormat) -> Option<&WriterOutcome> {
        self.writers.iter().find(|w| w.format == format)
    }
}

/// 一次输出过程的结果
#[derive(Debug)]
pub struct DispatchReport {
    /// 迭代号
    pub iteration: u64,
    /// 各区域结果
    pub zones: Vec<ZoneReport>,
}

impl DispatchReport {
    /// 所有写出的文件
    pub fn artifacts(&self) -> Vec<&Path> {
        self.zones
            .iter()
            .flat_map(|z| {
                let writers = z.writers.iter().flat_map(|w| w.artifacts.iter());
                let surface = z.surface.iter().flat_map(|s| s.iter().flatten());
                writers.chain(surface)
            })
            .map(PathBuf::as_path)
            .collect()
    }

    /// 是否没有任何隔离错误
    pub fn is_clean(&self) -> bool {
        self.zones
            .iter()
            .all(|z| z.writers.iter().all(WriterOutcome::is_ok) && !matches!(z.surface, Some(Err(_))))
    }
}

/// 结果分发器
pub struct ResultDispatcher {
    config: OutputConfig,
    caps: Capabilities,
    surface: Option<SurfaceExtractor>,
    n_zones: Option<usize>,
    /// `writers[zone]`，只在聚合者上创建
    writers: Vec<Vec<Box<dyn FormatWriter>>>,
}

impl std::fmt::Debug for ResultDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultDispatcher")
            .field("directory", &self.config.directory)
            .field("caps", &self.caps)
            .field("n_zones", &self.n_zones)
            .finish()
    }
}

impl ResultDispatcher {
    /// 创建分发器（配置先经校验）
    pub fn new(config: OutputConfig) -> IoResult<Self> {
        config.validate()?;
        let caps = Capabilities::detect().with_disabled(&config.disabled_formats);
        let surface = config
            .surface
            .enabled
            .then(|| SurfaceExtractor::new(config.surface.clone(), config.solver, config.directory.clone()));
        Ok(Self {
            config,
            caps,
            surface,
            n_zones: None,
            writers: Vec::new(),
        })
    }

    /// 覆盖能力表（必须在首次分发前调用）
    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    /// 输出配置
    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// 执行一次输出过程（集合操作，所有 rank 同时调用）
    pub fn set_result_files<C: Communicator>(
        &mut self,
        comm: &C,
        zones: &[ZoneInput<'_>],
        iteration: u64,
    ) -> IoResult<DispatchReport> {
        let n_zones = zones.len();
        let counts = comm.all_gather(n_zones)?;
        if counts.iter().any(|&n| n != n_zones) {
            return Err(IoError::contract(format!("各 rank 的区域数不一致: {:?}", counts)));
        }
        match self.n_zones {
            None => {
                self.n_zones = Some(n_zones);
                if comm.is_root() {
                    let formats = self.config.enabled_formats();
                    self.writers = (0..n_zones)
                        .map(|z| {
                            formats
                                .iter()
                                .map(|&f| create_writer(f, &self.config, &self.caps, z, n_zones))
                                .collect()
                        })
                        .collect();
                }
            }
            Some(n) if n != n_zones => {
                return Err(IoError::contract(format!("区域数从 {} 变为 {}", n, n_zones)));
            }
            Some(_) => {}
        }

        let mut reports = Vec::with_capacity(n_zones);
        for (zone, input) in zones.iter().enumerate() {
            let span = info_span!("dispatch", iteration, zone);
            let _guard = span.enter();
            let report = self.dispatch_zone(comm, zone, n_zones, input, iteration).map_err(|e| {
                error!(error = %e, "输出过程中止");
                e
            })?;
            reports.push(report);
        }
        Ok(DispatchReport {
            iteration,
            zones: reports,
        })
    }

    fn dispatch_zone<C: Communicator>(
        &mut self,
        comm: &C,
        zone: usize,
        n_zones: usize,
        input: &ZoneInput<'_>,
        iteration: u64,
    ) -> IoResult<ZoneReport> {
        let mut buffer = DistributedBuffer::new(zone);

        let fields = agree(
            comm,
            SolutionMerger::prepare_local(input.mesh, input.solution, &self.config),
        )?;

        let root_needs = comm
            .is_root()
            .then(|| self.writers[zone].iter().any(|w| w.needs_volumes()));
        let with_volumes = comm.broadcast(root_needs)?;

        let options = MergeOptions::default()
            .with_volumes(with_volumes)
            .with_field_vars(fields.n_vars())
            .with_limit(self.config.max_buffer_bytes);
        let pass = GeometryMerger::new(options).merge(comm, input.mesh, &mut buffer)?;
        SolutionMerger::merge(comm, &pass, input.mesh, &fields, &mut buffer)?;
        debug!(nodes = pass.n_global(), "合并完成");

        let mut writers = Vec::new();
        if let (Some(mesh), Some(field)) = (buffer.mesh(), buffer.field()) {
            let step = StepMesh::new(mesh);
            for w in self.writers[zone].iter_mut() {
                let format = w.format();
                match w.write_step(step, field, iteration) {
                    Ok(artifacts) => writers.push(WriterOutcome {
                        format,
                        artifacts,
                        error: None,
                    }),
                    Err(e) => {
                        warn!(%format, error = %e, "写出器失败，其余写出器继续");
                        writers.push(WriterOutcome {
                            format,
                            artifacts: Vec::new(),
                            error: Some(e),
                        });
                    }
                }
            }
        }

        let surface = self.surface.as_ref().and_then(|ex| match ex.config().mode {
            SurfaceMode::Merged => match (buffer.mesh(), buffer.field()) {
                (Some(mesh), Some(field)) => Some(ex.export_merged(mesh, field, zone, n_zones)),
                _ => None,
            },
            SurfaceMode::PerProcess => Some(ex.export_local(comm.rank(), input.mesh, &fields, zone, n_zones)),
        });
        if let Some(Err(e)) = &surface {
            warn!(error = %e, "表面导出失败");
        }

        buffer.clean_up();
        Ok(ZoneReport {
            zone,
            n_global_nodes: pass.n_global(),
            writers,
            surface,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mh_mesh::generation::{analytic_flow_solution, rectangle_partitions};
    use mh_runtime::SerialComm;

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = OutputConfig::default();
        config.freestream.gamma = 0.5;
        assert!(matches!(ResultDispatcher::new(config), Err(IoError::Config(_))));
    }

    #[test]
    fn test_zone_count_fixed_after_first_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = ResultDispatcher::new(OutputConfig::default().with_directory(dir.path())).unwrap();
        let part = rectangle_partitions(2, 2, 1).unwrap().remove(0);
        let sol = analytic_flow_solution(&part, 0.0);
        let zone = ZoneInput {
            mesh: &part,
            solution: &sol,
        };

        let report = d.set_result_files(&SerialComm, &[zone], 1).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.zones[0].n_global_nodes, 9);

        let err = d.set_result_files(&SerialComm, &[zone, zone], 2).unwrap_err();
        assert!(matches!(err, IoError::ContractViolation { .. }));
    }

    #[test]
    fn test_multi_zone_stems() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = ResultDispatcher::new(OutputConfig::default().with_directory(dir.path())).unwrap();
        let part = rectangle_partitions(1, 1, 1).unwrap().remove(0);
        let sol = analytic_flow_solution(&part, 0.0);
        let zone = ZoneInput {
            mesh: &part,
            solution: &sol,
        };
        d.set_result_files(&SerialComm, &[zone, zone], 3).unwrap();
        assert!(dir.path().join("restart_flow_zone0.dat").exists());
        assert!(dir.path().join("restart_flow_zone1.dat").exists());
        assert!(dir.path().join("flow_zone1_00003.dat").exists());
    }
}
