use crate::mpc::{Bus, Gen, Storage};
use num_complex::Complex64;

/// Builds the vector of complex bus power injections.
///
/// Returns generation minus load in per unit. Storage units are treated
/// as loads at their set-point, so a discharging unit injects power.
pub fn make_sbus(base_mva: f64, bus: &[Bus], gen: &[Gen], storage: &[Storage]) -> Vec<Complex64> {
    let mut s_bus: Vec<Complex64> = bus
        .iter()
        .map(|b| -Complex64::new(b.pd, b.qd))
        .collect();

    for g in gen.iter().filter(|g| g.is_on()) {
        s_bus[g.gen_bus] += Complex64::new(g.pg, g.qg);
    }
    for s in storage.iter().filter(|s| s.status) {
        s_bus[s.bus] -= Complex64::new(s.p_mw, 0.0);
    }

    s_bus.iter().map(|&s| s / base_mva).collect()
}
