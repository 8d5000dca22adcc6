// apps/mh_cli/src/commands/run.rs

//! 运行输出演示
//!
//! 生成条带分区网格，在 `--ranks` 个线程 rank 上推进解析流场：
//! 每步由聚合者记录收敛历史，每 `--output-interval` 步执行一次输出过程。

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Args;
use mh_config::OutputConfig;
use mh_foundation::MhResult;
use mh_io::{agree, HistoryLogger, HistoryRecord, HistoryResult, IoError, ResultDispatcher, ZoneInput};
use mh_mesh::generation::{analytic_flow_solution, box_partitions, rectangle_partitions};
use mh_mesh::{LocalSolution, PartitionedMesh};
use mh_runtime::{Communicator, ThreadComm};
use tracing::{info, warn};

/// 运行参数
#[derive(Args, Clone)]
pub struct RunArgs {
    /// 输出配置文件路径（JSON）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 输出目录（覆盖配置）
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// rank 数
    #[arg(short = 'n', long, default_value = "2")]
    pub ranks: usize,

    /// x 方向单元数
    #[arg(long, default_value = "16")]
    pub nx: usize,

    /// y 方向单元数
    #[arg(long, default_value = "8")]
    pub ny: usize,

    /// z 方向单元数（给出时生成三维六面体网格）
    #[arg(long)]
    pub nz: Option<usize>,

    /// 迭代数
    #[arg(short, long, default_value = "20")]
    pub iterations: u64,

    /// 输出间隔 [迭代]
    #[arg(long, default_value = "10")]
    pub output_interval: u64,

    /// 伪时间步长
    #[arg(long, default_value = "0.05")]
    pub dt: f64,
}

/// 单个 rank 的运行统计
#[derive(Debug, Default)]
struct RankSummary {
    passes: usize,
    artifacts: usize,
    isolated_failures: usize,
}

/// 执行运行命令
pub fn execute(args: RunArgs) -> Result<()> {
    info!("=== MariHydro 输出演示 ===");

    if args.ranks == 0 {
        bail!("rank 数必须大于 0");
    }
    if args.output_interval == 0 {
        bail!("输出间隔必须大于 0");
    }

    let mut config = match &args.config {
        Some(path) => OutputConfig::from_file(path)
            .with_context(|| format!("无法加载配置文件: {}", path.display()))?,
        None => OutputConfig::default(),
    };
    if let Some(dir) = &args.output {
        config.directory = dir.clone();
    }
    if !config.history.objectives.is_empty() {
        warn!("演示运行不计算目标量，忽略 history.objectives");
        config.history.objectives.clear();
    }
    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("无法创建输出目录: {}", config.directory.display()))?;

    let parts = match args.nz {
        Some(nz) => box_partitions(args.nx, args.ny, nz, args.ranks),
        None => rectangle_partitions(args.nx, args.ny, args.ranks),
    }
    .context("生成分区网格失败")?;
    info!(
        ranks = args.ranks,
        dim = parts[0].dim,
        owned = parts.iter().map(|p| p.n_owned()).sum::<usize>(),
        "分区网格已生成"
    );

    let start = Instant::now();
    let results = ThreadComm::run(args.ranks, |comm| run_rank(&comm, &parts[comm.rank()], &config, &args));

    let mut total = RankSummary::default();
    for (rank, result) in results.into_iter().enumerate() {
        let summary = result.with_context(|| format!("rank {} 失败", rank))?;
        total.passes = total.passes.max(summary.passes);
        total.artifacts += summary.artifacts;
        total.isolated_failures += summary.isolated_failures;
    }

    info!("=== 运行完成 ===");
    info!("迭代数: {}", args.iterations);
    info!("输出过程: {}", total.passes);
    info!("写出文件: {}", total.artifacts);
    if total.isolated_failures > 0 {
        warn!("有 {} 个写出器或表面导出失败，详见上方日志", total.isolated_failures);
    }
    info!("耗时: {:.2} s", start.elapsed().as_secs_f64());
    Ok(())
}

fn run_rank<C: Communicator>(comm: &C, part: &PartitionedMesh, config: &OutputConfig, args: &RunArgs) -> MhResult<RankSummary> {
    let mut dispatcher = ResultDispatcher::new(config.clone())?;
    let mut previous = analytic_flow_solution(part, -args.dt);

    // 历史文件只在聚合者上打开，失败必须让其余 rank 一起退出
    let opened = if comm.is_root() {
        let names = previous.conserved.iter().map(|f| f.name.clone()).collect();
        HistoryLogger::create(config, names).and_then(|mut logger| {
            logger.write_header()?;
            Ok(Some(logger))
        })
    } else {
        Ok(None)
    };
    let mut history = shared(comm, opened)?;

    let clock = Instant::now();
    let mut summary = RankSummary::default();
    for it in 0..args.iterations {
        let solution = analytic_flow_solution(part, it as f64 * args.dt);
        let residuals = residuals(comm, part, &solution, &previous)?;

        let appended = match history.as_mut() {
            Some(logger) => logger.append_record(&HistoryRecord {
                iteration: it,
                inner: config.history.dual_time.then_some(0),
                elapsed: clock.elapsed().as_secs_f64(),
                residuals,
                ..Default::default()
            }),
            None => Ok(()),
        };
        shared(comm, appended)?;

        if it % args.output_interval == 0 || it + 1 == args.iterations {
            let zone = ZoneInput {
                mesh: part,
                solution: &solution,
            };
            let report = dispatcher.set_result_files(comm, &[zone], it)?;
            summary.passes += 1;
            summary.artifacts += report.artifacts().len();
            summary.isolated_failures += report
                .zones
                .iter()
                .map(|z| z.writers.iter().filter(|w| !w.is_ok()).count() + usize::from(matches!(z.surface, Some(Err(_)))))
                .sum::<usize>();
        }
        previous = solution;
    }
    Ok(summary)
}

/// 聚合者上的历史操作结果由所有 rank 共享
fn shared<C: Communicator, T>(comm: &C, local: HistoryResult<T>) -> MhResult<T> {
    Ok(agree(comm, local.map_err(IoError::from))?)
}

/// 守恒变量相邻两步变化的全局 RMS（log10），只统计自有节点
fn residuals<C: Communicator>(
    comm: &C,
    part: &PartitionedMesh,
    current: &LocalSolution,
    previous: &LocalSolution,
) -> MhResult<Vec<f64>> {
    let owned: Vec<usize> = part.owned_nodes().map(|l| l.get()).collect();
    let local: Vec<f64> = current
        .conserved
        .iter()
        .zip(&previous.conserved)
        .map(|(c, p)| owned.iter().map(|&l| (c.values[l] - p.values[l]).powi(2)).sum())
        .collect();

    let gathered = comm.all_gather((owned.len(), local))?;
    let n: usize = gathered.iter().map(|(n, _)| n).sum();
    let n_vars = current.conserved.len();
    Ok((0..n_vars)
        .map(|v| {
            let sum: f64 = gathered.iter().map(|(_, s)| s[v]).sum();
            (sum / n.max(1) as f64).sqrt().max(1e-16).log10()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mh_foundation::MhError;
    use std::path::Path;

    fn args(dir: &Path, ranks: usize) -> RunArgs {
        RunArgs {
            config: None,
            output: Some(dir.to_path_buf()),
            ranks,
            nx: 4,
            ny: 2,
            nz: None,
            iterations: 3,
            output_interval: 1,
            dt: 0.05,
        }
    }

    #[test]
    fn test_run_writes_history_and_restart() {
        let dir = tempfile::tempdir().unwrap();
        execute(args(dir.path(), 2)).unwrap();

        let history = std::fs::read_to_string(dir.path().join("history.csv")).unwrap();
        assert_eq!(history.lines().count(), 4);
        assert!(dir.path().join("restart_flow.dat").is_file());
    }

    #[test]
    fn test_blocked_history_fails_every_rank() {
        let dir = tempfile::tempdir().unwrap();
        // 同名目录使历史文件无法创建
        std::fs::create_dir(dir.path().join("history.csv")).unwrap();
        let config = OutputConfig::default().with_directory(dir.path());
        let parts = rectangle_partitions(4, 3, 3).unwrap();
        let run = args(dir.path(), 3);

        let results = ThreadComm::run(3, |comm| run_rank(&comm, &parts[comm.rank()], &config, &run));
        assert!(matches!(results[0], Err(MhError::Io { .. })));
        assert!(results[1..].iter().all(|r| matches!(r, Err(MhError::Contract(_)))));
    }

    #[test]
    fn test_blocked_history_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("history.csv")).unwrap();
        assert!(execute(args(dir.path(), 2)).is_err());
    }
}
