//! DC optimal power flow dispatch followed by an AC power flow.
//!
//! Dispatch is a linear program over generator output and bus voltage
//! angles using the DC power flow approximation:
//!
//!  - costs are linearised into segments between Pmin and Pmax,
//!  - bus real power balance holds with `P = Bbus * Va + Pbusinj`,
//!  - flows on rated branches stay within `+/- rateA`,
//!  - the reference bus angle is fixed.
//!
//! Renewable units are not dispatched; they inject their set-point at zero
//! cost. The AC power flow at the resulting dispatch lets the slack machine
//! absorb losses.

use crate::bus_types::bus_types;
use crate::dc::make_b_dc;
use crate::error::EngineError;
use crate::mpc::{Gen, GenCost, MPC};
use crate::mpopt::{Alg, SolveOptions};
use crate::order::ext_to_int;
use crate::pf::runpf;
use crate::traits::LinearSolver;
use log::{debug, info, warn};
use minilp::{ComparisonOp, LinearExpr, OptimizationDirection, Problem, Variable};
use std::f64::consts::PI;

/// Breakpoints of the linearised cost of `g` on [Pmin, Pmax].
fn breakpoints(g: &Gen, segments: usize) -> Vec<f64> {
    let (pmin, pmax) = (g.pmin, g.pmax.max(g.pmin));
    if pmax == pmin {
        return vec![pmin];
    }
    match &g.cost {
        Some(GenCost::Polynomial { coeffs, .. }) if coeffs.len() > 2 => (0..=segments)
            .map(|k| pmin + (pmax - pmin) * k as f64 / segments as f64)
            .collect(),
        Some(GenCost::PwLinear { points, .. }) => {
            let mut p = vec![pmin];
            p.extend(points.iter().map(|&(x, _)| x).filter(|&x| x > pmin && x < pmax));
            p.push(pmax);
            p
        }
        _ => vec![pmin, pmax],
    }
}

/// Total generation cost of in-service generators ($/hr).
pub fn total_cost(gen: &[Gen]) -> f64 {
    gen.iter()
        .filter(|g| g.is_on())
        .filter_map(|g| g.cost.as_ref().map(|c| c.eval(g.pg)))
        .sum()
}

/// Solves the DC dispatch of an internally numbered case.
///
/// Returns the real power output (MW) of every generator in `mpc.gen`.
pub(crate) fn dc_dispatch(
    mpc: &MPC,
    refbus: &[usize],
    segments: usize,
) -> Result<Vec<f64>, minilp::Error> {
    let base_mva = mpc.base_mva;
    let nb = mpc.bus.len();
    let (b_bus, b_f, pbusinj, pfinj) = make_b_dc(nb, &mpc.branch);

    let mut problem = Problem::new(OptimizationDirection::Minimize);

    // bus voltage angles (radians), reference buses fixed
    let theta: Vec<Variable> = mpc
        .bus
        .iter()
        .enumerate()
        .map(|(i, b)| {
            if refbus.contains(&i) {
                let va = b.va * PI / 180.0;
                problem.add_var(0.0, (va, va))
            } else {
                problem.add_var(0.0, (f64::NEG_INFINITY, f64::INFINITY))
            }
        })
        .collect();

    // cost segments of dispatchable generators
    let mut fixed = vec![0.0; nb];
    let mut seg_vars: Vec<Vec<Variable>> = Vec::with_capacity(mpc.gen.len());
    for g in &mpc.gen {
        if g.is_off() {
            seg_vars.push(Vec::new());
            continue;
        }
        if g.kind.is_renewable() {
            fixed[g.gen_bus] += g.pg;
            seg_vars.push(Vec::new());
            continue;
        }
        let p = breakpoints(g, segments);
        fixed[g.gen_bus] += p[0];
        let vars = p
            .windows(2)
            .map(|w| {
                let width = w[1] - w[0];
                let slope = match &g.cost {
                    Some(cost) => (cost.eval(w[1]) - cost.eval(w[0])) / width,
                    None => 0.0,
                };
                problem.add_var(slope, (0.0, width))
            })
            .collect();
        seg_vars.push(vars);
    }

    let mut sto = vec![0.0; nb];
    for s in mpc.storage.iter().filter(|s| s.status) {
        sto[s.bus] += s.p_mw;
    }

    // nodal balance (MW): Pg - base * Bbus * Va = Pd + Gs + Psto + base * Pbusinj
    for i in 0..nb {
        let mut expr = LinearExpr::empty();
        for (g, vars) in mpc.gen.iter().zip(&seg_vars) {
            if g.gen_bus == i {
                vars.iter().for_each(|&v| expr.add(v, 1.0));
            }
        }
        if let Some(row) = b_bus.outer_view(i) {
            for (j, &b) in row.iter().filter(|(_, b)| **b != 0.0) {
                expr.add(theta[j], -base_mva * b);
            }
        }
        let b = &mpc.bus[i];
        let rhs = b.pd + b.gs + sto[i] + pbusinj[i] * base_mva - fixed[i];
        problem.add_constraint(expr, ComparisonOp::Eq, rhs);
    }

    // branch flow limits
    for (l, br) in mpc.branch.iter().enumerate() {
        let rate = match br.rating() {
            Some(rate) => rate,
            None => continue,
        };
        let flow = |problem: &mut Problem, op: ComparisonOp, rhs: f64| {
            let mut expr = LinearExpr::empty();
            if let Some(row) = b_f.outer_view(l) {
                for (j, &b) in row.iter() {
                    expr.add(theta[j], base_mva * b);
                }
            }
            problem.add_constraint(expr, op, rhs);
        };
        flow(&mut problem, ComparisonOp::Le, rate - pfinj[l] * base_mva);
        flow(&mut problem, ComparisonOp::Ge, -rate - pfinj[l] * base_mva);
    }

    let solution = problem.solve()?;
    debug!("dispatch objective {:.4}", solution.objective());

    let pg = mpc
        .gen
        .iter()
        .zip(&seg_vars)
        .map(|(g, vars)| {
            if g.is_off() {
                0.0
            } else if g.kind.is_renewable() {
                g.pg
            } else {
                g.pmin + vars.iter().map(|&v| solution[v]).sum::<f64>()
            }
        })
        .collect();
    Ok(pg)
}

/// Runs an optimal power flow.
///
/// Returns the solved case, a success flag, the number of AC power flow
/// iterations and the generation cost at the solution. An infeasible
/// dispatch is reported as an unsuccessful solve with the input case.
pub fn runopf(
    casedata: &MPC,
    options: &SolveOptions,
    linsol: &dyn LinearSolver,
) -> Result<(MPC, bool, usize, Option<f64>), EngineError> {
    let (mpc, order) = ext_to_int(casedata)?;
    let (ref_, _, _) = bus_types(&mpc.bus, &mpc.gen)?;

    let pg = match dc_dispatch(&mpc, &ref_, options.opf_segments) {
        Ok(pg) => pg,
        Err(err) => {
            warn!("OPF dispatch failed: {}", err);
            return Ok((casedata.clone(), false, 0, None));
        }
    };

    let mut dispatched = casedata.clone();
    for (i, &j) in order.gen_on.iter().enumerate() {
        dispatched.gen[j].pg = pg[i];
    }

    let pf_options = SolveOptions {
        algorithm: Alg::Newton,
        ..options.clone()
    };
    let (result, success, its) = runpf(&dispatched, &pf_options, linsol)?;
    let objective = total_cost(&result.gen);
    info!("OPF generation cost {:.2} $/hr", objective);

    Ok((result, success, its, Some(objective)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::case9;
    use crate::sparse::FaerLU;

    #[test]
    fn dispatch_respects_generator_limits() -> anyhow::Result<()> {
        let mut case = case9();
        case.gen[2].pmax = 40.0;
        let (mpc, _) = ext_to_int(&case)?;
        let pg = dc_dispatch(&mpc, &[0], 8)?;
        for (g, p) in mpc.gen.iter().zip(&pg) {
            assert!(*p >= g.pmin - 1e-6 && *p <= g.pmax + 1e-6, "{}", p);
        }
        // lossless balance
        let total: f64 = pg.iter().sum();
        assert!((total - 315.0).abs() < 1e-6);
        assert!((pg[2] - 40.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn dispatch_respects_branch_rating() -> anyhow::Result<()> {
        let mut case = case9();
        // the 1-4 transformer carries all of machine 1's output
        case.branch[0].rate_a = 50.0;
        let (mpc, _) = ext_to_int(&case)?;
        let pg = dc_dispatch(&mpc, &[0], 8)?;
        assert!(pg[0] <= 50.0 + 1e-6);
        Ok(())
    }

    #[test]
    fn infeasible_dispatch_is_not_converged() -> anyhow::Result<()> {
        let mut case = case9();
        case.gen.iter_mut().for_each(|g| g.pmax = 50.0);
        let (res, success, its, objective) =
            runopf(&case, &SolveOptions::default(), &FaerLU)?;
        assert!(!success);
        assert_eq!(its, 0);
        assert!(objective.is_none());
        assert_eq!(res, case);
        Ok(())
    }

    #[test]
    fn opf_is_cheaper_than_base_dispatch() -> anyhow::Result<()> {
        let solver = FaerLU;
        let (base, _, _) = runpf(&case9(), &SolveOptions::default(), &solver)?;
        let (res, success, _, objective) = runopf(&case9(), &SolveOptions::default(), &solver)?;
        assert!(success);
        let objective = objective.unwrap_or(f64::NAN);
        assert!(objective < total_cost(&base.gen));
        for g in &res.gen[1..] {
            assert!(g.pg >= g.pmin - 1e-6 && g.pg <= g.pmax + 1e-6);
        }
        Ok(())
    }
}
