// crates/mh_io/src/merge/solution.rs

//! 解合并
//!
//! 在几何合并之后，把各 rank 自有节点上的守恒变量与派生诊断量按全局编号
//! 放入聚合者的 [`GlobalField`]。halo 节点的值不参与合并，由拥有者提供。

use mh_config::OutputConfig;
use mh_mesh::{LocalSolution, PartitionedMesh};
use mh_runtime::Communicator;
use tracing::debug;

use crate::buffer::{DistributedBuffer, GlobalField};
use crate::error::{IoError, IoResult};
use crate::merge::geometry::GeometryPass;
use crate::merge::{agree, diagnostics};

/// 单个 rank 上待合并的本地场（守恒变量在前，派生量在后）
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFields {
    /// 变量名
    pub names: Vec<String>,
    /// 守恒变量个数
    pub n_conserved: usize,
    /// `data[v][l]`：变量 v 在本地节点 l 上的值
    pub data: Vec<Vec<f64>>,
}

impl LocalFields {
    /// 变量总数
    pub fn n_vars(&self) -> usize {
        self.names.len()
    }

    fn validate(&self, n_local: usize) -> IoResult<()> {
        if self.data.len() != self.names.len() {
            return Err(IoError::invalid_data("本地场的变量名与数组个数不一致"));
        }
        for (name, col) in self.names.iter().zip(&self.data) {
            if col.len() != n_local {
                return Err(IoError::invalid_data(format!(
                    "本地变量 {} 长度 {}, 本地节点数 {}",
                    name,
                    col.len(),
                    n_local
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Contribution {
    names: Vec<String>,
    n_conserved: usize,
    owned_ids: Vec<usize>,
    values: Vec<Vec<f64>>,
}

#[derive(Debug, Clone)]
enum Verdict {
    Accepted,
    Contract(String),
    Invalid(String),
}

/// 解合并器
#[derive(Debug, Clone, Copy, Default)]
pub struct SolutionMerger;

impl SolutionMerger {
    /// 组装本地场：守恒变量 + 求解器对应的派生量
    pub fn prepare_local(
        part: &PartitionedMesh,
        sol: &LocalSolution,
        config: &OutputConfig,
    ) -> IoResult<LocalFields> {
        sol.validate(part.n_local())?;
        let derived = diagnostics::compute(config.solver, part, sol, &config.freestream)?;
        if let Some(d) = derived.iter().find(|d| sol.conserved.iter().any(|c| c.name == d.name)) {
            return Err(IoError::invalid_data(format!("派生量 {} 与守恒变量重名", d.name)));
        }

        let n_conserved = sol.conserved.len();
        let (names, data) = sol
            .conserved
            .iter()
            .cloned()
            .chain(derived)
            .map(|f| (f.name, f.values))
            .unzip();
        Ok(LocalFields { names, n_conserved, data })
    }

    /// 执行解合并（集合操作）
    ///
    /// 必须出示同一区域几何合并得到的 [`GeometryPass`]，且本地网格自几何合并后未变。
    pub fn merge<C: Communicator>(
        comm: &C,
        pass: &GeometryPass,
        part: &PartitionedMesh,
        fields: &LocalFields,
        buffer: &mut DistributedBuffer,
    ) -> IoResult<()> {
        let local = if pass.rank() != comm.rank() || pass.size() != comm.size() {
            Err(IoError::contract("几何合并令牌来自其他通信器"))
        } else if pass.n_local() != part.n_local() || pass.n_owned() != part.n_owned() {
            Err(IoError::contract("本地网格在几何合并后发生变化"))
        } else {
            fields.validate(part.n_local())
        };
        agree(comm, local)?;

        let owned: Vec<usize> = part.owned_nodes().map(|l| l.get()).collect();
        let contribution = Contribution {
            names: fields.names.clone(),
            n_conserved: fields.n_conserved,
            owned_ids: owned.iter().map(|&l| part.global_ids[l].get()).collect(),
            values: fields
                .data
                .iter()
                .map(|col| owned.iter().map(|&l| col[l]).collect())
                .collect(),
        };
        let gathered = comm.gather(contribution)?;

        let root_verdict = gathered.map(|contribs| match assemble(contribs, buffer) {
            Ok(field) => {
                debug!(vars = field.n_vars(), nodes = field.n_nodes(), "解合并完成");
                match buffer.install_field(field) {
                    Ok(()) => Verdict::Accepted,
                    Err(e) => Verdict::Contract(e.to_string()),
                }
            }
            Err(v) => v,
        });

        match comm.broadcast(root_verdict)? {
            Verdict::Accepted => Ok(()),
            Verdict::Contract(message) => Err(IoError::ContractViolation { message }),
            Verdict::Invalid(message) => Err(IoError::InvalidData { message }),
        }
    }
}

fn assemble(contribs: Vec<Contribution>, buffer: &DistributedBuffer) -> Result<GlobalField, Verdict> {
    let n_global = buffer
        .mesh()
        .map(|m| m.n_nodes_owned)
        .ok_or_else(|| Verdict::Contract("解合并先于几何合并执行".into()))?;
    let first = contribs
        .first()
        .ok_or_else(|| Verdict::Contract("没有任何 rank 参与解合并".into()))?;
    let names = first.names.clone();
    let n_conserved = first.n_conserved;

    for (rank, c) in contribs.iter().enumerate() {
        if c.names != names || c.n_conserved != n_conserved {
            return Err(Verdict::Invalid(format!(
                "rank {} 的变量集合与 rank 0 不一致: {:?} vs {:?}",
                rank, c.names, names
            )));
        }
    }

    let mut data = vec![vec![0.0; n_global]; names.len()];
    for (rank, c) in contribs.iter().enumerate() {
        for (k, &g) in c.owned_ids.iter().enumerate() {
            if g >= n_global {
                return Err(Verdict::Contract(format!(
                    "rank {} 的节点全局编号 {} 超出 [0, {})",
                    rank, g, n_global
                )));
            }
            for (v, col) in c.values.iter().enumerate() {
                data[v][g] = col[k];
            }
        }
    }

    let field = GlobalField {
        names,
        n_conserved,
        data,
    };
    buffer
        .check_field(&field)
        .map_err(|e| Verdict::Invalid(e.to_string()))?;
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::geometry::{GeometryMerger, MergeOptions};
    use mh_mesh::generation::{analytic_flow_solution, two_partition_scenario};
    use mh_runtime::ThreadComm;

    fn run_merge(
        parts: Vec<PartitionedMesh>,
        tweak: impl Fn(usize, &mut LocalFields) + Sync,
    ) -> Vec<IoResult<Option<GlobalField>>> {
        let config = OutputConfig::default();
        ThreadComm::run(parts.len(), |comm| -> IoResult<Option<GlobalField>> {
            let part = &parts[comm.rank()];
            let mut buffer = DistributedBuffer::new(0);
            let pass = GeometryMerger::new(MergeOptions::default()).merge(&comm, part, &mut buffer)?;
            let sol = analytic_flow_solution(part, 0.0);
            let mut fields = SolutionMerger::prepare_local(part, &sol, &config)?;
            tweak(comm.rank(), &mut fields);
            SolutionMerger::merge(&comm, &pass, part, &fields, &mut buffer)?;
            Ok(buffer.field().cloned())
        })
    }

    #[test]
    fn test_prepare_local_layout() {
        let part = &two_partition_scenario().unwrap()[0];
        let sol = analytic_flow_solution(part, 0.0);
        let fields = SolutionMerger::prepare_local(part, &sol, &OutputConfig::default()).unwrap();
        assert_eq!(fields.n_conserved, 4);
        assert_eq!(fields.n_vars(), 12);
        assert_eq!(fields.names[0], "Rho");
        assert_eq!(fields.names[4], "Pressure");
    }

    #[test]
    fn test_prepare_local_name_collision() {
        let part = &two_partition_scenario().unwrap()[0];
        let mut sol = analytic_flow_solution(part, 0.0);
        sol.conserved[0].name = "Density".into();
        let err = SolutionMerger::prepare_local(part, &sol, &OutputConfig::default()).unwrap_err();
        assert!(matches!(err, IoError::InvalidData { .. }));
    }

    #[test]
    fn test_values_placed_by_global_id() {
        let results = run_merge(two_partition_scenario().unwrap(), |_, _| {});
        let field = results[0].as_ref().unwrap().as_ref().unwrap();
        assert_eq!(field.n_nodes(), 10);
        let rho = field.column("Rho").unwrap();
        for (g, &r) in rho.iter().enumerate() {
            let x = (g % 5) as f64;
            assert!((r - (1.0 + 0.1 * x.sin())).abs() < 1e-14);
        }
        assert!(results[1].as_ref().unwrap().is_none());
    }

    #[test]
    fn test_mismatched_variable_sets() {
        let results = run_merge(two_partition_scenario().unwrap(), |rank, f| {
            if rank == 1 {
                f.names[1] = "Momentum".into();
            }
        });
        assert!(results.iter().all(|r| matches!(r, Err(IoError::InvalidData { .. }))));
    }

    #[test]
    fn test_wrong_length_is_agreed() {
        let results = run_merge(two_partition_scenario().unwrap(), |rank, f| {
            if rank == 0 {
                f.data[2].pop();
            }
        });
        assert!(matches!(results[0], Err(IoError::InvalidData { .. })));
        assert!(matches!(results[1], Err(IoError::PeerFailed { rank: 0, .. })));
    }

    #[test]
    fn test_solution_without_geometry_is_contract_violation() {
        let parts = two_partition_scenario().unwrap();
        let config = OutputConfig::default();
        let results = ThreadComm::run(2, |comm| -> IoResult<()> {
            let part = &parts[comm.rank()];
            let mut buffer = DistributedBuffer::new(0);
            let pass = GeometryMerger::default().merge(&comm, part, &mut buffer)?;
            buffer.clean_up();
            let fields = SolutionMerger::prepare_local(part, &analytic_flow_solution(part, 0.0), &config)?;
            SolutionMerger::merge(&comm, &pass, part, &fields, &mut buffer)
        });
        assert!(results.iter().all(|r| matches!(r, Err(IoError::ContractViolation { .. }))));
    }
}
