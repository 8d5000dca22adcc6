// crates/mh_io/src/merge/diagnostics.rs

//! 派生诊断量
//!
//! 各 rank 在本地节点（含 halo）上计算，随守恒变量一起合并。
//!
//! | 求解器 | 派生量 |
//! |--------|--------|
//! | Flow | Pressure, Density, Mach, Pressure_Coefficient, Skin_Friction_Coefficient, Heat_Transfer_Coefficient, Cell_Size, Y_Plus |
//! | Adjoint | Surface_Sensitivity, Cell_Size |
//! | Linearized | Delta_Pressure_Coefficient, Cell_Size |
//!
//! 流场守恒变量按 `ρ, ρu, ρv, (ρw), ρE` 排列。摩擦系数、传热系数、y+、
//! 表面灵敏度与压力扰动取自物理层的同名辅助量（`Delta_Pressure` 除外），缺失时为 0。

use mh_config::{FreeStream, SolverKind};
use mh_mesh::{LocalSolution, NamedField, PartitionedMesh};
use rayon::prelude::*;

use crate::error::{IoError, IoResult};

const FLOW_NAMES: [&str; 8] = [
    "Pressure",
    "Density",
    "Mach",
    "Pressure_Coefficient",
    "Skin_Friction_Coefficient",
    "Heat_Transfer_Coefficient",
    "Cell_Size",
    "Y_Plus",
];
const ADJOINT_NAMES: [&str; 2] = ["Surface_Sensitivity", "Cell_Size"];
const LINEARIZED_NAMES: [&str; 2] = ["Delta_Pressure_Coefficient", "Cell_Size"];

/// 求解器对应的派生量名称
pub fn derived_names(kind: SolverKind) -> &'static [&'static str] {
    match kind {
        SolverKind::Flow => &FLOW_NAMES,
        SolverKind::Adjoint => &ADJOINT_NAMES,
        SolverKind::Linearized => &LINEARIZED_NAMES,
    }
}

/// 计算本地派生量
pub fn compute(
    kind: SolverKind,
    part: &PartitionedMesh,
    sol: &LocalSolution,
    freestream: &FreeStream,
) -> IoResult<Vec<NamedField>> {
    let n = part.n_local();
    let aux_or_zero = |name: &str| sol.auxiliary(name).map_or_else(|| vec![0.0; n], <[f64]>::to_vec);

    let fields = match kind {
        SolverKind::Flow => {
            let [p, rho, mach, cp] = flow_state(part.dim, sol, freestream, n)?;
            vec![
                NamedField::new("Pressure", p),
                NamedField::new("Density", rho),
                NamedField::new("Mach", mach),
                NamedField::new("Pressure_Coefficient", cp),
                NamedField::new("Skin_Friction_Coefficient", aux_or_zero("Skin_Friction_Coefficient")),
                NamedField::new("Heat_Transfer_Coefficient", aux_or_zero("Heat_Transfer_Coefficient")),
                NamedField::new("Cell_Size", cell_size(part)),
                NamedField::new("Y_Plus", aux_or_zero("Y_Plus")),
            ]
        }
        SolverKind::Adjoint => vec![
            NamedField::new("Surface_Sensitivity", aux_or_zero("Surface_Sensitivity")),
            NamedField::new("Cell_Size", cell_size(part)),
        ],
        SolverKind::Linearized => {
            let q_inf = freestream.dynamic_pressure();
            let dcp = aux_or_zero("Delta_Pressure").into_iter().map(|dp| dp / q_inf).collect();
            vec![
                NamedField::new("Delta_Pressure_Coefficient", dcp),
                NamedField::new("Cell_Size", cell_size(part)),
            ]
        }
    };
    Ok(fields)
}

/// 压力、密度、马赫数、压力系数
fn flow_state(dim: usize, sol: &LocalSolution, fs: &FreeStream, n: usize) -> IoResult<[Vec<f64>; 4]> {
    let needed = dim + 2;
    if sol.conserved.len() < needed {
        return Err(IoError::MissingVariable {
            name: format!("第 {} 个守恒变量（能量）", needed),
        });
    }
    let rho = &sol.conserved[0].values;
    let momentum: Vec<&[f64]> = sol.conserved[1..=dim].iter().map(|f| f.values.as_slice()).collect();
    let energy = &sol.conserved[dim + 1].values;

    if let Some(l) = rho.iter().position(|&r| r <= 0.0 || !r.is_finite()) {
        return Err(IoError::invalid_data(format!("本地节点 {} 密度非正: {}", l, rho[l])));
    }

    let gamma = fs.gamma;
    let q_inf = fs.dynamic_pressure();
    let rows: Vec<[f64; 3]> = (0..n)
        .into_par_iter()
        .map(|l| {
            let r = rho[l];
            let v2: f64 = momentum.iter().map(|m| (m[l] / r).powi(2)).sum();
            let p = (gamma - 1.0) * (energy[l] - 0.5 * r * v2);
            let a2 = gamma * p / r;
            let mach = if a2 > 0.0 { (v2 / a2).sqrt() } else { 0.0 };
            [p, mach, (p - fs.pressure) / q_inf]
        })
        .collect();

    let mut p = Vec::with_capacity(n);
    let mut mach = Vec::with_capacity(n);
    let mut cp = Vec::with_capacity(n);
    for [a, b, c] in rows {
        p.push(a);
        mach.push(b);
        cp.push(c);
    }
    Ok([p, rho.clone(), mach, cp])
}

/// 特征网格尺度 `vol^(1/dim)`；无体积时为 0
fn cell_size(part: &PartitionedMesh) -> Vec<f64> {
    match &part.volumes {
        Some(v) => {
            let exp = 1.0 / part.dim as f64;
            v.par_iter().map(|&x| x.max(0.0).powf(exp)).collect()
        }
        None => vec![0.0; part.n_local()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mh_mesh::generation::{analytic_flow_solution, rectangle_partitions, ANALYTIC_GAMMA};

    fn freestream() -> FreeStream {
        FreeStream {
            gamma: ANALYTIC_GAMMA,
            ..FreeStream::default()
        }
    }

    #[test]
    fn test_flow_diagnostics() {
        let part = &rectangle_partitions(2, 2, 1).unwrap()[0];
        let sol = analytic_flow_solution(part, 0.0);
        let fields = compute(SolverKind::Flow, part, &sol, &freestream()).unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, derived_names(SolverKind::Flow));

        // 节点 0 位于原点：ρ = 1, p = 1.05 / γ
        let p0 = fields[0].values[0];
        assert!((p0 - 1.05 / ANALYTIC_GAMMA).abs() < 1e-12);
        assert_eq!(fields[1].values[0], 1.0);
        let cp0 = fields[3].values[0];
        let fs = freestream();
        assert!((cp0 - (p0 - fs.pressure) / fs.dynamic_pressure()).abs() < 1e-12);
        assert!(fields[2].values.iter().all(|&m| m > 0.0));
        assert_eq!(fields[4].values, sol.auxiliary("Skin_Friction_Coefficient").unwrap());
        assert!(fields[5].values.iter().all(|&h| h == 0.0));
    }

    #[test]
    fn test_cell_size() {
        let part = &rectangle_partitions(2, 2, 1).unwrap()[0];
        let sizes = cell_size(part);
        let vols = part.volumes.as_ref().unwrap();
        assert!((sizes[0] - vols[0].sqrt()).abs() < 1e-14);

        let mut bare = part.clone();
        bare.volumes = None;
        assert!(cell_size(&bare).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_missing_energy() {
        let part = &rectangle_partitions(1, 1, 1).unwrap()[0];
        let mut sol = analytic_flow_solution(part, 0.0);
        sol.conserved.pop();
        let err = compute(SolverKind::Flow, part, &sol, &freestream()).unwrap_err();
        assert!(matches!(err, IoError::MissingVariable { .. }));
    }

    #[test]
    fn test_adjoint_and_linearized() {
        let part = &rectangle_partitions(1, 1, 1).unwrap()[0];
        let mut sol = LocalSolution::default();
        sol.auxiliary.push(NamedField::new("Delta_Pressure", vec![0.25; part.n_local()]));

        let adj = compute(SolverKind::Adjoint, part, &sol, &freestream()).unwrap();
        assert_eq!(adj[0].name, "Surface_Sensitivity");
        assert!(adj[0].values.iter().all(|&s| s == 0.0));

        let lin = compute(SolverKind::Linearized, part, &sol, &freestream()).unwrap();
        let q = freestream().dynamic_pressure();
        assert!((lin[0].values[0] - 0.25 / q).abs() < 1e-14);
    }
}
