// Copyright (c) 1996-2016, Power Systems Engineering Research Center (PSERC)
// by Ray Zimmerman, PSERC Cornell
// Copyright (c) 2022-2024, Richard Lincoln. All rights reserved.

use crate::mpc::{Branch, Bus};
use num_complex::Complex64;
use sprs::{CsMat, TriMat};
use std::f64::consts::PI;

/// Builds the bus admittance matrix and branch admittance matrices.
///
/// Returns `(Ybus, Yf, Yt)` where `Yf * V` and `Yt * V` are the vectors of
/// complex branch currents injected at the "from" and "to" ends of each
/// branch. Expects internal bus numbering.
pub fn make_ybus(
    base_mva: f64,
    bus: &[Bus],
    branch: &[Branch],
) -> (CsMat<Complex64>, CsMat<Complex64>, CsMat<Complex64>) {
    let nb = bus.len();
    let nl = branch.len();

    // For each branch, compute the elements of the branch admittance matrix where:
    //
    //      | If |   | Yff  Yft |   | Vf |
    //      |    | = |          | * |    |
    //      | It |   | Ytf  Ytt |   | Vt |
    let mut y_bus = TriMat::with_capacity((nb, nb), 4 * nl + nb);
    let mut y_f = TriMat::with_capacity((nl, nb), 2 * nl);
    let mut y_t = TriMat::with_capacity((nl, nb), 2 * nl);

    for (i, br) in branch.iter().enumerate() {
        let y_s = if br.is_on() {
            Complex64::new(1.0, 0.0) / Complex64::new(br.br_r, br.br_x)
        } else {
            Complex64::default()
        }; // series admittance
        let b_c = if br.is_on() { br.br_b } else { 0.0 }; // line charging susceptance
        let t = if br.tap == 0.0 { 1.0 } else { br.tap }; // default tap ratio = 1
        let tap = Complex64::from_polar(t, br.shift * PI / 180.0); // add phase shifters

        let y_tt = y_s + Complex64::new(0.0, b_c / 2.0);
        let y_ff = y_tt / (tap * tap.conj());
        let y_ft = -y_s / tap.conj();
        let y_tf = -y_s / tap;

        let (f, t) = (br.f_bus, br.t_bus);

        y_f.add_triplet(i, f, y_ff);
        y_f.add_triplet(i, t, y_ft);

        y_t.add_triplet(i, f, y_tf);
        y_t.add_triplet(i, t, y_tt);

        y_bus.add_triplet(f, f, y_ff);
        y_bus.add_triplet(f, t, y_ft);
        y_bus.add_triplet(t, f, y_tf);
        y_bus.add_triplet(t, t, y_tt);
    }

    for (i, b) in bus.iter().enumerate() {
        y_bus.add_triplet(i, i, b.y_sh(base_mva));
    }

    (y_bus.to_csr(), y_f.to_csr(), y_t.to_csr())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::case9;
    use crate::order::ext_to_int;

    #[test]
    fn rows_of_lossless_network_sum_to_shunts() -> anyhow::Result<()> {
        let (mpc, _) = ext_to_int(&case9())?;
        let (y_bus, y_f, y_t) = make_ybus(mpc.base_mva, &mpc.bus, &mpc.branch);
        assert_eq!(y_bus.rows(), 9);
        assert_eq!(y_f.rows(), 9);

        // Bus 1 only connects to the 1-4 transformer: 1/j0.0576.
        let y11 = y_bus.get(0, 0).copied().unwrap_or_default();
        assert!(y11.re.abs() < 1e-12);
        assert!((y11.im + 1.0 / 0.0576).abs() < 1e-9);
        assert_eq!(y_bus.get(0, 3).copied(), Some(-y11));
        // unconnected buses store nothing
        assert_eq!(y_bus.get(0, 1), None);

        // With no shunts a row sums to half the line charging of attached branches.
        let s: Complex64 = y_bus
            .outer_view(4)
            .map(|row| row.iter().map(|(_, &v)| v).sum())
            .unwrap_or_default();
        assert!((s.im - (0.158 + 0.358) / 2.0).abs() < 1e-9);

        assert_eq!(y_t.get(0, 3).copied(), Some(y11));
        Ok(())
    }
}
