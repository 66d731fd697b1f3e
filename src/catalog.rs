//! Cases available without a file.

use crate::error::CaseError;
use crate::mpc::{Branch, Bus, BusType, Gen, GenCost, MPC};

/// Names accepted by [`catalog_case`].
pub const CATALOG: &[&str] = &["case3", "case9"];

/// Looks up a catalog case by name.
pub fn catalog_case(name: &str) -> Result<MPC, CaseError> {
    match name {
        "case3" => Ok(case3()),
        "case9" => Ok(case9()),
        _ => Err(CaseError::UnknownCatalog(name.to_string())),
    }
}

fn bus(bus_i: usize, bus_type: BusType, pd: f64, qd: f64, base_kv: f64) -> Bus {
    Bus {
        bus_i,
        bus_type,
        pd,
        qd,
        base_kv,
        ..Default::default()
    }
}

fn branch(f_bus: usize, t_bus: usize, r: f64, x: f64, b: f64, rate: f64) -> Branch {
    Branch {
        f_bus,
        t_bus,
        br_r: r,
        br_x: x,
        br_b: b,
        rate_a: rate,
        rate_b: rate,
        rate_c: rate,
        ..Default::default()
    }
}

fn poly(coeffs: &[f64], startup: f64) -> Option<GenCost> {
    Some(GenCost::Polynomial {
        startup,
        shutdown: 0.0,
        coeffs: coeffs.to_vec(),
    })
}

/// Three bus meshed network with a single slack machine at bus 1 and a
/// 100 MW load at bus 2. The 2-3 line has no rating.
pub fn case3() -> MPC {
    MPC {
        name: "case3".to_string(),
        base_mva: 100.0,
        bus: vec![
            bus(1, BusType::REF, 0.0, 0.0, 138.0),
            bus(2, BusType::PQ, 100.0, 30.0, 138.0),
            bus(3, BusType::PQ, 0.0, 0.0, 138.0),
        ],
        gen: vec![Gen {
            gen_bus: 1,
            pg: 100.0,
            qmax: 200.0,
            qmin: -200.0,
            vg: 1.02,
            pmax: 250.0,
            pmin: 0.0,
            cost: poly(&[0.02, 20.0, 0.0], 0.0),
            ..Default::default()
        }],
        branch: vec![
            branch(1, 2, 0.01, 0.1, 0.02, 150.0),
            branch(2, 3, 0.01, 0.1, 0.02, 0.0),
            branch(1, 3, 0.01, 0.1, 0.02, 100.0),
        ],
        storage: Vec::new(),
    }
}

/// WSCC 9 bus, 3 machine system.
pub fn case9() -> MPC {
    let machine = |gen_bus: usize, pg: f64, vg: f64, pmax: f64, cost: Option<GenCost>| Gen {
        gen_bus,
        pg,
        qg: 0.0,
        qmax: 300.0,
        qmin: -300.0,
        vg,
        mbase: 100.0,
        status: true,
        pmax,
        pmin: 10.0,
        cost,
        ..Default::default()
    };
    MPC {
        name: "case9".to_string(),
        base_mva: 100.0,
        bus: vec![
            bus(1, BusType::REF, 0.0, 0.0, 345.0),
            bus(2, BusType::PV, 0.0, 0.0, 345.0),
            bus(3, BusType::PV, 0.0, 0.0, 345.0),
            bus(4, BusType::PQ, 0.0, 0.0, 345.0),
            bus(5, BusType::PQ, 90.0, 30.0, 345.0),
            bus(6, BusType::PQ, 0.0, 0.0, 345.0),
            bus(7, BusType::PQ, 100.0, 35.0, 345.0),
            bus(8, BusType::PQ, 0.0, 0.0, 345.0),
            bus(9, BusType::PQ, 125.0, 50.0, 345.0),
        ],
        gen: vec![
            machine(1, 72.3, 1.0, 250.0, poly(&[0.11, 5.0, 150.0], 1500.0)),
            machine(2, 163.0, 1.0, 300.0, poly(&[0.085, 1.2, 600.0], 2000.0)),
            machine(3, 85.0, 1.0, 270.0, poly(&[0.1225, 1.0, 335.0], 3000.0)),
        ],
        branch: vec![
            branch(1, 4, 0.0, 0.0576, 0.0, 250.0),
            branch(4, 5, 0.017, 0.092, 0.158, 250.0),
            branch(5, 6, 0.039, 0.17, 0.358, 150.0),
            branch(3, 6, 0.0, 0.0586, 0.0, 300.0),
            branch(6, 7, 0.0119, 0.1008, 0.209, 150.0),
            branch(7, 8, 0.0085, 0.072, 0.149, 250.0),
            branch(8, 2, 0.0, 0.0625, 0.0, 250.0),
            branch(8, 9, 0.032, 0.161, 0.306, 250.0),
            branch(9, 4, 0.01, 0.085, 0.176, 250.0),
        ],
        storage: Vec::new(),
    }
}
