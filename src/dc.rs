use crate::mpc::Branch;
use crate::sparse::{mul_vec, select};
use crate::traits::LinearSolver;
use sprs::{CsMat, TriMat};
use std::f64::consts::PI;

/// Solves a DC power flow.
///
/// Solves for the bus voltage angles at all but the reference bus,
/// given the full system B matrix and the vector of bus real power injections,
/// the initial vector of bus voltage angles (in radians), and the lists of
/// bus indices for the swing bus, PV buses, and PQ buses. Returns a vector
/// of bus voltage angles in radians and a success flag.
pub(crate) fn dc_pf(
    b_mat: &CsMat<f64>,
    p_bus: &[f64],
    va0: &[f64],
    ref_: &[usize],
    pv: &[usize],
    pq: &[usize],
    lin_solver: &dyn LinearSolver,
) -> Result<(Vec<f64>, bool), String> {
    let va_threshold = 1e5; // arbitrary threshold on |Va| for declaring failure

    let mut va = va0.to_vec();

    // Va([pv; pq]) = B([pv; pq], [pv; pq]) \ ...
    //                     (Pbus([pv; pq]) - B([pv; pq], ref) * Va0(ref));
    let pvpq = [pv, pq].concat();

    let b_pvpq = select(b_mat, &pvpq, &pvpq);
    let b_ref = select(b_mat, &pvpq, ref_);
    let va_ref: Vec<f64> = ref_.iter().map(|&i| va0[i]).collect();

    let rhs: Vec<f64> = pvpq
        .iter()
        .zip(mul_vec(&b_ref, &va_ref))
        .map(|(&i, p_ref)| p_bus[i] - p_ref)
        .collect();

    let va_pvpq = lin_solver.solve(b_pvpq, &rhs)?;

    pvpq.iter()
        .enumerate()
        .for_each(|(i, &j)| va[j] = va_pvpq[i]);

    let success = va.iter().all(|a| a.abs() <= va_threshold);

    Ok((va, success))
}

fn br_b(br: &Branch) -> f64 {
    let b = if br.is_on() { 1.0 / br.br_x } else { 0.0 }; // series susceptance
    let tap = if br.tap == 0.0 { 1.0 } else { br.tap }; // default tap ratio = 1
    b / tap
}

/// Builds the B matrices and phase shift injections for DC power flow.
///
/// The bus real power injections are related to bus voltage angles by
///     P = Bbus * Va + Pbusinj
/// The real power flows at the from end the lines are related to the bus
/// voltage angles by
///     Pf = Bf * Va + Pfinj
/// Expects internal bus numbering.
pub(crate) fn make_b_dc(
    nb: usize,
    branch: &[Branch],
) -> (CsMat<f64>, CsMat<f64>, Vec<f64>, Vec<f64>) {
    let nl = branch.len();

    let mut b_bus = TriMat::with_capacity((nb, nb), 4 * nl);
    let mut b_f = TriMat::with_capacity((nl, nb), 2 * nl);
    let mut pbusinj = vec![0.0; nb];
    let mut pfinj = vec![0.0; nl];

    for (i, br) in branch.iter().enumerate() {
        let b = br_b(br);
        let (f, t) = (br.f_bus, br.t_bus);

        b_f.add_triplet(i, f, b);
        b_f.add_triplet(i, t, -b);

        // Bbus = Cft' * Bf
        b_bus.add_triplet(f, f, b);
        b_bus.add_triplet(f, t, -b);
        b_bus.add_triplet(t, f, -b);
        b_bus.add_triplet(t, t, b);

        // injected at the from bus and extracted at the to bus
        pfinj[i] = b * -br.shift * PI / 180.0;
        pbusinj[f] += pfinj[i];
        pbusinj[t] -= pfinj[i];
    }

    (b_bus.to_csr(), b_f.to_csr(), pbusinj, pfinj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::Branch;
    use crate::sparse::FaerLU;

    fn line(f_bus: usize, t_bus: usize, x: f64) -> Branch {
        Branch {
            f_bus,
            t_bus,
            br_x: x,
            ..Default::default()
        }
    }

    #[test]
    fn two_parallel_paths_split_by_reactance() -> anyhow::Result<()> {
        // 0 -> 1 directly (x=0.1) and 0 -> 2 -> 1 (x=0.1+0.1)
        let branch = vec![line(0, 1, 0.1), line(0, 2, 0.1), line(2, 1, 0.1)];
        let (b_bus, b_f, _, pfinj) = make_b_dc(3, &branch);
        let p_bus = [0.0, -0.9, 0.0];
        let (va, success) = dc_pf(&b_bus, &p_bus, &[0.0; 3], &[0], &[], &[1, 2], &FaerLU)
            .map_err(anyhow::Error::msg)?;
        assert!(success);

        let pf: Vec<f64> = mul_vec(&b_f, &va)
            .iter()
            .zip(&pfinj)
            .map(|(p, inj)| p + inj)
            .collect();
        assert!((pf[0] - 0.6).abs() < 1e-12);
        assert!((pf[1] - 0.3).abs() < 1e-12);
        assert!((pf[2] - 0.3).abs() < 1e-12);
        Ok(())
    }
}
