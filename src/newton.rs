// Copyright (c) 1996-2016, Power Systems Engineering Research Center (PSERC)
// by Ray Zimmerman, PSERC Cornell
// Copyright (c) 2022-2024, Richard Lincoln. All rights reserved.

use crate::format::{format_f64_vec, format_polar_vec};
use crate::mpopt::SolveOptions;
use crate::sparse::mul_vec;
use crate::traits::LinearSolver;
use log::{debug, warn};
use num_complex::Complex64;
use sprs::{CsMat, TriMat};

/// Computes partial derivatives of power injection w.r.t. voltage.
///
/// Returns `(dSbus/dVa, dSbus/dVm)` for the polar coordinate formulation.
pub(crate) fn d_sbus_d_v(
    y_bus: &CsMat<Complex64>,
    v: &[Complex64],
) -> (CsMat<Complex64>, CsMat<Complex64>) {
    let n = v.len();
    let i_bus = mul_vec(y_bus, v);
    let v_norm: Vec<Complex64> = v.iter().map(|&vi| vi / vi.norm()).collect();
    let j = Complex64::new(0.0, 1.0);

    // dSbus/dVa = 1j * diagV * conj(diagIbus - Ybus * diagV)
    // dSbus/dVm = diagV * conj(Ybus * diagVnorm) + conj(diagIbus) * diagVnorm
    let nnz = y_bus.nnz() + n;
    let mut d_sbus_d_va = TriMat::with_capacity((n, n), nnz);
    let mut d_sbus_d_vm = TriMat::with_capacity((n, n), nnz);
    for (i, row) in y_bus.outer_iterator().enumerate() {
        for (k, &y_ik) in row.iter() {
            d_sbus_d_va.add_triplet(i, k, j * v[i] * (-y_ik * v[k]).conj());
            d_sbus_d_vm.add_triplet(i, k, v[i] * (y_ik * v_norm[k]).conj());
        }
        d_sbus_d_va.add_triplet(i, i, j * v[i] * i_bus[i].conj());
        d_sbus_d_vm.add_triplet(i, i, i_bus[i].conj() * v_norm[i]);
    }
    (d_sbus_d_va.to_csr(), d_sbus_d_vm.to_csr())
}

/// Assembles the reduced Jacobian
///
/// ```text
/// | dP/dVa(pv_pq, pv_pq)  dP/dVm(pv_pq, pq) |
/// | dQ/dVa(pq, pv_pq)     dQ/dVm(pq, pq)    |
/// ```
fn jacobian(
    d_sbus_d_va: &CsMat<Complex64>,
    d_sbus_d_vm: &CsMat<Complex64>,
    pv_pq: &[usize],
    pq: &[usize],
) -> CsMat<f64> {
    let nb = d_sbus_d_va.rows();
    let m = pv_pq.len();
    let n = m + pq.len();

    let mut p_pos = vec![None; nb];
    let mut q_pos = vec![None; nb];
    pv_pq.iter().enumerate().for_each(|(k, &i)| p_pos[i] = Some(k));
    pq.iter().enumerate().for_each(|(k, &i)| q_pos[i] = Some(m + k));

    let mut jac = TriMat::with_capacity((n, n), 2 * (d_sbus_d_va.nnz() + d_sbus_d_vm.nnz()));
    for (i, row) in d_sbus_d_va.outer_iterator().enumerate() {
        for (k, &d) in row.iter() {
            if let Some(c) = p_pos[k] {
                if let Some(r) = p_pos[i] {
                    jac.add_triplet(r, c, d.re);
                }
                if let Some(r) = q_pos[i] {
                    jac.add_triplet(r, c, d.im);
                }
            }
        }
    }
    for (i, row) in d_sbus_d_vm.outer_iterator().enumerate() {
        for (k, &d) in row.iter() {
            if let Some(c) = q_pos[k] {
                if let Some(r) = p_pos[i] {
                    jac.add_triplet(r, c, d.re);
                }
                if let Some(r) = q_pos[i] {
                    jac.add_triplet(r, c, d.im);
                }
            }
        }
    }
    jac.to_csr()
}

/// Evaluates the mismatch vector F = [dP(pv, pq); dQ(pq)].
fn mismatch(
    y_bus: &CsMat<Complex64>,
    s_bus: &[Complex64],
    v: &[Complex64],
    pv_pq: &[usize],
    pq: &[usize],
) -> Vec<f64> {
    let i_bus = mul_vec(y_bus, v);
    let mis: Vec<Complex64> = (0..v.len())
        .map(|i| v[i] * i_bus[i].conj() - s_bus[i])
        .collect();
    pv_pq
        .iter()
        .map(|&i| mis[i].re)
        .chain(pq.iter().map(|&i| mis[i].im))
        .collect()
}

fn norm_inf(f: &[f64]) -> f64 {
    f.iter().fold(0.0, |m, fi| fi.abs().max(m))
}

/// Solves power flow using full Newton's method (power/polar).
///
/// Returns the final complex voltages, a flag which indicates whether
/// it converged or not and the number of iterations performed.
pub(crate) fn newtonpf(
    y_bus: &CsMat<Complex64>,
    s_bus: &[Complex64],
    v0: &[Complex64],
    pv: &[usize],
    pq: &[usize],
    lin_solver: &dyn LinearSolver,
    options: &SolveOptions,
) -> Result<(Vec<Complex64>, bool, usize), String> {
    let pv_pq = [pv, pq].concat();

    let tol = options.tolerance;
    let max_it = options.max_it;

    let mut converged = false;
    let mut i = 0;
    let mut v = v0.to_vec();
    let mut va: Vec<f64> = v.iter().map(|vi| vi.arg()).collect();
    let mut vm: Vec<f64> = v.iter().map(|vi| vi.norm()).collect();

    // set up indexing for updating V
    let npv = pv.len();
    let npq = pq.len();
    let (j1, j2) = (0, npv); // j1:j2 - V angle of pv buses
    let (j3, j4) = (j2, j2 + npq); // j3:j4 - V angle of pq buses
    let (j5, j6) = (j4, j4 + npq); // j5:j6 - V mag of pq buses

    // evaluate F(x0)
    let mut f = mismatch(y_bus, s_bus, &v, &pv_pq, pq);

    // check tolerance
    let norm_f = norm_inf(&f);
    debug!("iteration {}: |F| = {:e}", i, norm_f);
    if norm_f < tol {
        converged = true;
    }

    // do Newton iterations
    while !converged && i < max_it {
        i += 1;

        // evaluate Jacobian
        let (d_sbus_d_va, d_sbus_d_vm) = d_sbus_d_v(y_bus, &v);

        let jac = jacobian(&d_sbus_d_va, &d_sbus_d_vm, &pv_pq, pq);

        // compute update step
        let neg_f: Vec<f64> = f.iter().map(|fi| -fi).collect();
        let dx = lin_solver.solve(jac, &neg_f)?;

        // update voltage
        pv.iter().zip(j1..j2).for_each(|(&k, j)| va[k] += dx[j]);
        pq.iter().zip(j3..j4).for_each(|(&k, j)| va[k] += dx[j]);
        pq.iter().zip(j5..j6).for_each(|(&k, j)| vm[k] += dx[j]);

        // update Vm and Va again in case we wrapped around with a negative Vm
        v = vm
            .iter()
            .zip(&va)
            .map(|(&m, &a)| Complex64::from_polar(m, a))
            .collect();
        va = v.iter().map(|vi| vi.arg()).collect();
        vm = v.iter().map(|vi| vi.norm()).collect();

        // evaluate F(x)
        f = mismatch(y_bus, s_bus, &v, &pv_pq, pq);

        // check for convergence
        let norm_f = norm_inf(&f);
        debug!("iteration {}: |F| = {:e}", i, norm_f);
        if norm_f < tol {
            converged = true;
        }
    }

    if converged {
        debug!(
            "Newton's method power flow (power balance, polar) converged in {} iterations.",
            i
        );
        debug!("V = {}", format_polar_vec(&v));
    } else {
        warn!(
            "Newton's method power flow (power balance, polar) did not converge in {} iterations.",
            i
        );
        debug!("F = {}", format_f64_vec(&f));
    }

    Ok((v, converged, i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus_types::bus_types;
    use crate::catalog::case9;
    use crate::order::ext_to_int;
    use crate::sbus::make_sbus;
    use crate::sparse::FaerLU;
    use crate::ybus::make_ybus;

    #[test]
    fn case9_converges_quadratically() -> anyhow::Result<()> {
        let (mpc, _) = ext_to_int(&case9())?;
        let (_, pv, pq) = bus_types(&mpc.bus, &mpc.gen)?;
        let (y_bus, _, _) = make_ybus(mpc.base_mva, &mpc.bus, &mpc.branch);
        let s_bus = make_sbus(mpc.base_mva, &mpc.bus, &mpc.gen, &mpc.storage);
        let v0 = vec![Complex64::new(1.0, 0.0); mpc.bus.len()];

        let (v, converged, its) = newtonpf(
            &y_bus,
            &s_bus,
            &v0,
            &pv,
            &pq,
            &FaerLU,
            &SolveOptions::default(),
        )
        .map_err(anyhow::Error::msg)?;

        assert!(converged);
        assert!(its <= 5, "{} iterations", its);
        // PV buses hold their set-point
        assert!((v[1].norm() - 1.0).abs() < 1e-9);
        assert!(v.iter().all(|vi| vi.norm() > 0.9 && vi.norm() < 1.1));
        Ok(())
    }

    #[test]
    fn iteration_limit_reports_failure() -> anyhow::Result<()> {
        let (mut mpc, _) = ext_to_int(&case9())?;
        mpc.bus.iter_mut().for_each(|b| b.pd *= 10.0);
        let (_, pv, pq) = bus_types(&mpc.bus, &mpc.gen)?;
        let (y_bus, _, _) = make_ybus(mpc.base_mva, &mpc.bus, &mpc.branch);
        let s_bus = make_sbus(mpc.base_mva, &mpc.bus, &mpc.gen, &mpc.storage);
        let v0 = vec![Complex64::new(1.0, 0.0); mpc.bus.len()];
        let options = SolveOptions {
            max_it: 1,
            ..Default::default()
        };
        let (_, converged, its) = newtonpf(&y_bus, &s_bus, &v0, &pv, &pq, &FaerLU, &options)
            .map_err(anyhow::Error::msg)?;
        assert!(!converged);
        assert_eq!(its, 1);
        Ok(())
    }

    #[test]
    fn jacobian_matches_finite_differences() -> anyhow::Result<()> {
        let (mpc, _) = ext_to_int(&case9())?;
        let (_, pv, pq) = bus_types(&mpc.bus, &mpc.gen)?;
        let pv_pq = [pv.as_slice(), pq.as_slice()].concat();
        let (y_bus, _, _) = make_ybus(mpc.base_mva, &mpc.bus, &mpc.branch);
        let s_bus = make_sbus(mpc.base_mva, &mpc.bus, &mpc.gen, &mpc.storage);
        let va: Vec<f64> = (0..mpc.bus.len()).map(|i| 0.01 * i as f64).collect();
        let vm = vec![1.02; mpc.bus.len()];
        let polar = |vm: &[f64], va: &[f64]| -> Vec<Complex64> {
            vm.iter()
                .zip(va)
                .map(|(&m, &a)| Complex64::from_polar(m, a))
                .collect()
        };

        let v = polar(&vm, &va);
        let (d_va, d_vm) = d_sbus_d_v(&y_bus, &v);
        let jac = jacobian(&d_va, &d_vm, &pv_pq, &pq);
        let f0 = mismatch(&y_bus, &s_bus, &v, &pv_pq, &pq);

        let h = 1e-7;
        let columns = pv_pq
            .iter()
            .map(|&k| (k, true))
            .chain(pq.iter().map(|&k| (k, false)));
        for (c, (k, angle)) in columns.enumerate() {
            let (mut va1, mut vm1) = (va.clone(), vm.clone());
            if angle {
                va1[k] += h;
            } else {
                vm1[k] += h;
            }
            let f1 = mismatch(&y_bus, &s_bus, &polar(&vm1, &va1), &pv_pq, &pq);
            for r in 0..f0.len() {
                let fd = (f1[r] - f0[r]) / h;
                let an = jac.get(r, c).copied().unwrap_or(0.0);
                assert!((fd - an).abs() < 1e-4, "J[{}, {}]: {} != {}", r, c, an, fd);
            }
        }
        Ok(())
    }
}
