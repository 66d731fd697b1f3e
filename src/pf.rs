use crate::bus_types::bus_types;
use crate::dc::{dc_pf, make_b_dc};
use crate::error::EngineError;
use crate::mpc::{Branch, Bus, Gen, Storage, MPC};
use crate::mpopt::{Alg, SolveOptions};
use crate::newton::newtonpf;
use crate::order::{ext_to_int, int_to_ext};
use crate::sbus::make_sbus;
use crate::sparse::mul_vec;
use crate::traits::LinearSolver;
use crate::ybus::make_ybus;
use log::{debug, info};
use num_complex::Complex64;
use sprs::CsMat;
use std::collections::HashMap;
use std::f64::consts::PI;

/// Runs a power flow.
///
/// Returns the solved case in external numbering, a success flag and the
/// number of iterations. Generator set-points of the input are the fixed
/// injections; the first voltage regulating generator at the reference bus
/// absorbs the mismatch.
pub fn runpf(
    casedata: &MPC,
    options: &SolveOptions,
    linsol: &dyn LinearSolver,
) -> Result<(MPC, bool, usize), EngineError> {
    // convert to internal indexing
    let (mut mpc, order) = ext_to_int(casedata)?;
    if mpc.bus.is_empty() {
        info!("Power flow not valid: case contains no connected buses");
        return Ok((int_to_ext(casedata, &mpc, &order), false, 0));
    }
    let base_mva = mpc.base_mva;

    // get bus index lists of each type of bus
    let (ref_, pv, pq) = bus_types(&mpc.bus, &mpc.gen)?;

    let (success, its) = match options.algorithm {
        Alg::Dc => {
            debug!(" -- DC Power Flow");
            let va0: Vec<f64> = mpc.bus.iter().map(|b| b.va * PI / 180.0).collect();

            // build B matrices and phase shift injections
            let (b_bus, b_f, pbusinj, pfinj) = make_b_dc(mpc.bus.len(), &mpc.branch);

            // compute complex bus power injections (generation - load)
            // adjusted for phase shifters and real shunts
            let s_bus = make_sbus(base_mva, &mpc.bus, &mpc.gen, &mpc.storage);
            let p_bus: Vec<f64> = (0..mpc.bus.len())
                .map(|i| s_bus[i].re - pbusinj[i] - mpc.bus[i].gs / base_mva)
                .collect();

            let (va, success) = dc_pf(&b_bus, &p_bus, &va0, &ref_, &pv, &pq, linsol)
                .map_err(EngineError::Numerical)?;

            // update data matrices with solution
            let pf = mul_vec(&b_f, &va);
            for (i, br) in mpc.branch.iter_mut().enumerate() {
                br.pf = (pf[i] + pfinj[i]) * base_mva;
                br.pt = -br.pf;
                br.qf = 0.0;
                br.qt = 0.0;
            }
            for (i, b) in mpc.bus.iter_mut().enumerate() {
                b.vm = 1.0;
                b.va = va[i] * 180.0 / PI;
            }
            // update Pg for slack generator (1st gen at ref bus)
            // (note: other gens at ref bus are accounted for in Pbus)
            //      newPg = oldPg + newPinj - oldPinj
            let p_inj = mul_vec(&b_bus, &va);
            for &r in &ref_ {
                if let Some(g) = slack_gen(&mut mpc.gen, r) {
                    g.pg += (p_inj[r] - p_bus[r]) * base_mva;
                }
            }
            mpc.gen.iter_mut().for_each(|g| g.qg = 0.0);

            (success, 1)
        }
        Alg::Newton => {
            // initial state
            let mut v0: Vec<Complex64> = mpc
                .bus
                .iter()
                .map(|b| Complex64::from_polar(b.vm, b.va * PI / 180.0))
                .collect();
            for g in mpc.gen.iter().filter(|g| g.kind.regulates_voltage()) {
                if !mpc.bus[g.gen_bus].is_pq() {
                    let vb = v0[g.gen_bus];
                    v0[g.gen_bus] = vb / vb.norm() * g.vg;
                }
            }

            // build admittance matrices
            let (y_bus, y_f, y_t) = make_ybus(base_mva, &mpc.bus, &mpc.branch);
            let s_bus = make_sbus(base_mva, &mpc.bus, &mpc.gen, &mpc.storage);

            let (v, success, its) = newtonpf(&y_bus, &s_bus, &v0, &pv, &pq, linsol, options)
                .map_err(EngineError::Numerical)?;

            pfsoln(
                base_mva,
                &mut mpc.bus,
                &mut mpc.gen,
                &mut mpc.branch,
                &mpc.storage,
                &y_bus,
                &y_f,
                &y_t,
                &v,
                &ref_,
            );

            (success, its)
        }
    };

    // convert back to original bus numbering
    Ok((int_to_ext(casedata, &mpc, &order), success, its))
}

/// First in-service voltage regulating generator at bus `r`.
fn slack_gen(gen: &mut [Gen], r: usize) -> Option<&mut Gen> {
    gen.iter_mut()
        .find(|g| g.gen_bus == r && g.is_on() && g.kind.regulates_voltage())
}

/// Updates bus, gen and branch data with the power flow solution.
#[allow(clippy::too_many_arguments)]
pub(crate) fn pfsoln(
    base_mva: f64,
    bus: &mut [Bus],
    gen: &mut [Gen],
    branch: &mut [Branch],
    storage: &[Storage],
    y_bus: &CsMat<Complex64>,
    y_f: &CsMat<Complex64>,
    y_t: &CsMat<Complex64>,
    v: &[Complex64],
    refbus: &[usize],
) {
    for (i, b) in bus.iter_mut().enumerate() {
        b.vm = v[i].norm();
        b.va = v[i].arg() * 180.0 / PI;
    }

    // compute total injected bus power
    let i_bus = mul_vec(y_bus, v);
    let s_inj: Vec<Complex64> = (0..v.len())
        .map(|i| v[i] * i_bus[i].conj() * base_mva)
        .collect();

    // storage draws at its set-point
    let mut p_sto = vec![0.0; bus.len()];
    for s in storage.iter().filter(|s| s.status) {
        p_sto[s.bus] += s.p_mw;
    }

    // generators that hold a PV or REF bus
    let regulating = |g: &Gen, bus: &[Bus]| {
        g.is_on() && g.kind.regulates_voltage() && !bus[g.gen_bus].is_pq()
    };

    // Buses with more than one generator have the total reactive power
    // dispatch for the bus divided in proportion to the reactive range of
    // each generator, or equally when the range is zero.
    let mut cg = HashMap::<usize, Vec<usize>>::new();
    for (i, g) in gen.iter().enumerate() {
        if regulating(g, bus) {
            cg.entry(g.gen_bus).or_default().push(i);
        }
    }
    for (&b, l) in cg.iter() {
        // fixed injections of non-regulating units at this bus
        let q_fixed: f64 = gen
            .iter()
            .filter(|g| g.gen_bus == b && g.is_on() && !regulating(g, bus))
            .map(|g| g.qg)
            .sum();
        let qg_tot = s_inj[b].im + bus[b].qd - q_fixed;

        let qg_min: f64 = l.iter().map(|&i| finite_or(gen[i].qmin, -qg_tot.abs())).sum();
        let qg_max: f64 = l.iter().map(|&i| finite_or(gen[i].qmax, qg_tot.abs())).sum();

        if l.len() > 1 && (qg_max - qg_min).abs() > 1e-13 {
            let q = (qg_tot - qg_min) / (qg_max - qg_min);
            for &i in l {
                let g = &mut gen[i];
                let (qmin, qmax) = (
                    finite_or(g.qmin, -qg_tot.abs()),
                    finite_or(g.qmax, qg_tot.abs()),
                );
                g.qg = qmin + q * (qmax - qmin);
            }
        } else {
            for &i in l {
                gen[i].qg = qg_tot / l.len() as f64;
            }
        }
    }
    for g in gen.iter_mut().filter(|g| g.is_off()) {
        g.qg = 0.0;
    }

    // update Pg for slack gen(s)
    for &r in refbus {
        let p_others: f64 = {
            let first = gen
                .iter()
                .position(|g| g.gen_bus == r && g.is_on() && g.kind.regulates_voltage());
            gen.iter()
                .enumerate()
                .filter(|&(i, g)| g.gen_bus == r && g.is_on() && Some(i) != first)
                .map(|(_, g)| g.pg)
                .sum()
        };
        let p_bus = s_inj[r].re + bus[r].pd + p_sto[r];
        if let Some(g) = slack_gen(gen, r) {
            g.pg = p_bus - p_others;
        }
    }

    // complex power at "from" and "to" bus ends
    let i_f = mul_vec(y_f, v);
    let i_t = mul_vec(y_t, v);
    for (l, br) in branch.iter_mut().enumerate() {
        let s_f = v[br.f_bus] * i_f[l].conj() * base_mva;
        let s_t = v[br.t_bus] * i_t[l].conj() * base_mva;
        br.pf = s_f.re;
        br.qf = s_f.im;
        br.pt = s_t.re;
        br.qt = s_t.im;
    }
}

fn finite_or(limit: f64, proxy: f64) -> f64 {
    if limit.is_finite() {
        limit
    } else if limit.is_sign_positive() {
        proxy.abs()
    } else {
        -proxy.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{case3, case9};
    use crate::mpc::{GenKind, Storage};
    use crate::sparse::FaerLU;

    fn losses(mpc: &MPC) -> f64 {
        mpc.branch.iter().map(|br| br.pf + br.pt).sum()
    }

    #[test]
    fn case9_slack_output() -> anyhow::Result<()> {
        let (mpc, success, its) = runpf(&case9(), &SolveOptions::default(), &FaerLU)?;
        assert!(success);
        assert!(its > 0);
        assert!((mpc.gen[0].pg - 71.64).abs() < 0.05, "Pg1 = {}", mpc.gen[0].pg);
        // PV machines keep their set-points
        assert_eq!(mpc.gen[1].pg, 163.0);
        assert!((mpc.bus[1].vm - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn generation_minus_load_equals_losses() -> anyhow::Result<()> {
        let (mpc, success, _) = runpf(&case9(), &SolveOptions::default(), &FaerLU)?;
        assert!(success);
        let gen: f64 = mpc.gen.iter().map(|g| g.pg).sum();
        let balance = gen - mpc.total_pd();
        assert!((balance - losses(&mpc)).abs() < 1e-6);
        assert!(losses(&mpc) > 0.0);
        Ok(())
    }

    #[test]
    fn dc_power_flow_is_lossless() -> anyhow::Result<()> {
        let options = SolveOptions {
            algorithm: Alg::Dc,
            ..Default::default()
        };
        let (mpc, success, its) = runpf(&case9(), &options, &FaerLU)?;
        assert!(success);
        assert_eq!(its, 1);
        assert!((mpc.gen[0].pg - 67.0).abs() < 1e-9);
        assert!(losses(&mpc).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn der_and_storage_shift_slack_output() -> anyhow::Result<()> {
        let mut mpc = case3();
        mpc.gen.push(Gen {
            gen_bus: 3,
            pg: 50.0,
            pmax: 50.0,
            kind: GenKind::Solar,
            ..Default::default()
        });
        mpc.storage.push(Storage {
            bus: 2,
            power_mw: 10.0,
            energy_mwh: 40.0,
            p_mw: 10.0,
            status: true,
        });
        let (res, success, _) = runpf(&mpc, &SolveOptions::default(), &FaerLU)?;
        assert!(success);
        // solar keeps its set-point, slack covers the rest plus losses
        assert_eq!(res.gen[1].pg, 50.0);
        let total: f64 = res.gen.iter().map(|g| g.pg).sum();
        assert!(total >= 110.0);
        let balance = total - res.total_pd() - 10.0;
        assert!((balance - losses(&res)).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn out_of_service_branch_has_no_flow() -> anyhow::Result<()> {
        let mut mpc = case9();
        mpc.branch[8].status = false;
        let (res, success, _) = runpf(&mpc, &SolveOptions::default(), &FaerLU)?;
        assert!(success);
        assert_eq!(res.branch[8].pf, 0.0);
        assert_eq!(res.branch[8].qt, 0.0);
        Ok(())
    }
}
