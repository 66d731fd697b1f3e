use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// MPC is a MATPOWER case that models a power system as a directed graph
/// structure, extended with the generator categories and storage units
/// needed for DER studies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MPC {
    /// Case name (catalog name or file stem).
    pub name: String,

    /// System MVA base used for converting power into per-unit quantities.
    /// Default value is 100.
    pub base_mva: f64,

    /// Power system nodes, including static loads and shunts.
    pub bus: Vec<Bus>,

    /// Generators, including added renewable units.
    pub gen: Vec<Gen>,

    /// Transmission lines/cables and transformers.
    pub branch: Vec<Branch>,

    /// Storage units. Not part of the MATPOWER format.
    pub storage: Vec<Storage>,
}

impl Default for MPC {
    fn default() -> Self {
        Self {
            name: String::default(),
            base_mva: 100.0,
            bus: Vec::default(),
            gen: Vec::default(),
            branch: Vec::default(),
            storage: Vec::default(),
        }
    }
}

impl MPC {
    /// Total fixed real power demand of connected buses (MW).
    pub fn total_pd(&self) -> f64 {
        self.bus
            .iter()
            .filter(|b| b.bus_type != BusType::NONE)
            .map(|b| b.pd)
            .sum()
    }

    /// Bus ids in row order.
    pub fn bus_ids(&self) -> Vec<usize> {
        self.bus.iter().map(|b| b.bus_i).collect()
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum BusType {
    /// Fixed active and reactive power.
    PQ = 1,
    /// Fixed voltage magnitude and active power.
    PV = 2,
    /// Reference voltage angle. Slack active and reactive power.
    REF = 3,
    /// Isolated bus.
    NONE = 4,
}

impl BusType {
    pub fn from_code(code: f64) -> Option<Self> {
        match code as i64 {
            1 => Some(BusType::PQ),
            2 => Some(BusType::PV),
            3 => Some(BusType::REF),
            4 => Some(BusType::NONE),
            _ => None,
        }
    }

    pub fn code(&self) -> f64 {
        *self as i64 as f64
    }
}

/// Bus is a node in the power system graph structure.
/// Static loads and shunts are included in the Bus definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bus {
    /// Bus number.
    pub bus_i: usize,

    pub bus_type: BusType,

    /// Real power demand (MW).
    pub pd: f64,

    /// Reactive power demand (MVAr).
    pub qd: f64,

    /// Shunt conductance (MW at V = 1.0 p.u.).
    pub gs: f64,

    /// Shunt susceptance (MVAr at V = 1.0 p.u.).
    pub bs: f64,

    /// Area number, 1-100.
    pub area: usize,

    /// Voltage magnitude (p.u.).
    pub vm: f64,

    /// Voltage angle (degrees).
    pub va: f64,

    /// Base voltage (kV).
    pub base_kv: f64,

    /// Loss zone (1-999).
    pub zone: usize,

    /// Maximum voltage magnitude (p.u.).
    pub vmax: f64,

    /// Minimum voltage magnitude (p.u.).
    pub vmin: f64,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            bus_i: 0,
            bus_type: BusType::PQ,
            pd: 0.0,
            qd: 0.0,
            gs: 0.0,
            bs: 0.0,
            area: 1,
            vm: 1.0,
            va: 0.0,
            base_kv: 0.0,
            zone: 1,
            vmax: 1.1,
            vmin: 0.9,
        }
    }
}

impl Bus {
    pub fn is_pq(&self) -> bool {
        self.bus_type == BusType::PQ
    }
    pub fn is_pv(&self) -> bool {
        self.bus_type == BusType::PV
    }
    pub fn is_ref(&self) -> bool {
        self.bus_type == BusType::REF
    }
    pub fn is_isolated(&self) -> bool {
        self.bus_type == BusType::NONE
    }

    pub(crate) fn y_sh(&self, base_mva: f64) -> Complex64 {
        Complex64::new(self.gs, self.bs) / Complex64::new(base_mva, 0.0)
    }
}

/// Category of a generating unit.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenKind {
    /// Dispatchable machine from the base case. Regulates voltage.
    #[default]
    Conventional,
    /// Photovoltaic DER, fixed injection.
    Solar,
    /// Wind DER, fixed injection.
    Wind,
}

impl GenKind {
    pub fn is_renewable(&self) -> bool {
        matches!(self, GenKind::Solar | GenKind::Wind)
    }

    /// Renewable units are modelled as static injections and do not hold
    /// their bus voltage.
    pub fn regulates_voltage(&self) -> bool {
        !self.is_renewable()
    }
}

/// Gen is a generator or dispatchable load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gen {
    /// Bus number.
    pub gen_bus: usize,

    /// Real power output (MW).
    pub pg: f64,

    /// Reactive power output (MVAr).
    pub qg: f64,

    /// Maximum reactive power output (MVAr).
    pub qmax: f64,

    /// Minimum reactive power output (MVAr).
    pub qmin: f64,

    /// Voltage magnitude setpoint (p.u.).
    pub vg: f64,

    /// Total MVA base of this machine, defaults to base_mva.
    pub mbase: f64,

    pub status: bool,

    /// Maximum real power output (MW).
    pub pmax: f64,

    /// Minimum real power output (MW).
    pub pmin: f64,

    pub kind: GenKind,

    /// Real power cost function.
    pub cost: Option<GenCost>,
}

impl Default for Gen {
    fn default() -> Self {
        Self {
            gen_bus: 0,
            pg: 0.0,
            qg: 0.0,
            qmax: 0.0,
            qmin: 0.0,
            vg: 1.0,
            mbase: 100.0,
            status: true,
            pmax: 0.0,
            pmin: 0.0,
            kind: GenKind::Conventional,
            cost: None,
        }
    }
}

impl Gen {
    pub fn is_on(&self) -> bool {
        self.status
    }
    pub fn is_off(&self) -> bool {
        !self.status
    }
}

/// GenCost defines a generator cost function.
///
/// Units of f and p are $/hr and MW respectively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GenCost {
    /// Piecewise linear cost defined by the coordinates (p0,f0), (p1,f1), ...,
    /// (pn,fn) with p0 < p1 < ... < pn.
    PwLinear {
        startup: f64,
        shutdown: f64,
        points: Vec<(f64, f64)>,
    },
    /// Polynomial coefficients cn, ..., c1, c0, highest order first, where
    /// f(p) = cn*p^n + ... + c1*p + c0.
    Polynomial {
        startup: f64,
        shutdown: f64,
        coeffs: Vec<f64>,
    },
}

impl GenCost {
    /// Evaluates the total cost f(p) in $/hr.
    pub fn eval(&self, p: f64) -> f64 {
        match self {
            GenCost::Polynomial { coeffs, .. } => coeffs.iter().fold(0.0, |acc, c| acc * p + c),
            GenCost::PwLinear { points, .. } => {
                if points.is_empty() {
                    return 0.0;
                }
                if points.len() == 1 {
                    return points[0].1;
                }
                // Extrapolate with the end segments outside the breakpoints.
                let k = points
                    .windows(2)
                    .position(|w| p <= w[1].0)
                    .unwrap_or(points.len() - 2);
                let (p0, f0) = points[k];
                let (p1, f1) = points[k + 1];
                if p1 == p0 {
                    f0
                } else {
                    f0 + (p - p0) * (f1 - f0) / (p1 - p0)
                }
            }
        }
    }
}

/// Branch represents either a transmission line/cable or a two winding
/// transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// From bus number.
    pub f_bus: usize,

    /// To bus number.
    pub t_bus: usize,

    /// Resistance (p.u.).
    pub br_r: f64,

    /// Reactance (p.u.).
    pub br_x: f64,

    /// Total line charging susceptance (p.u.).
    pub br_b: f64,

    /// MVA rating A (long term rating). Zero means unlimited.
    pub rate_a: f64,

    /// MVA rating B (short term rating).
    pub rate_b: f64,

    /// MVA rating C (emergency rating).
    pub rate_c: f64,

    /// Transformer off nominal tap ratio.
    pub tap: f64,

    /// Transformer phase shift angle (degrees).
    pub shift: f64,

    /// Initial branch status.
    pub status: bool,

    /// Minimum angle difference, angle(Vf) - angle(Vt) (degrees).
    pub angmin: f64,

    /// Maximum angle difference, angle(Vf) - angle(Vt) (degrees).
    pub angmax: f64,

    /// Real power injected at "from" bus end (MW).
    pub pf: f64,

    /// Reactive power injected at "from" bus end (MVAr).
    pub qf: f64,

    /// Real power injected at "to" bus end (MW).
    pub pt: f64,

    /// Reactive power injected at "to" bus end (MVAr).
    pub qt: f64,
}

impl Default for Branch {
    fn default() -> Self {
        Self {
            f_bus: 0,
            t_bus: 0,
            br_r: 0.0,
            br_x: 0.0,
            br_b: 0.0,
            rate_a: 0.0,
            rate_b: 0.0,
            rate_c: 0.0,
            tap: 0.0,
            shift: 0.0,
            status: true,
            angmin: -360.0,
            angmax: 360.0,
            pf: 0.0,
            qf: 0.0,
            pt: 0.0,
            qt: 0.0,
        }
    }
}

impl Branch {
    pub fn is_on(&self) -> bool {
        self.status
    }

    /// Apparent power flow magnitude at the more loaded end (MVA).
    pub fn flow_mva(&self) -> f64 {
        let s_f = self.pf.hypot(self.qf);
        let s_t = self.pt.hypot(self.qt);
        s_f.max(s_t)
    }

    /// Rating used for congestion checks, if the branch has one.
    pub fn rating(&self) -> Option<f64> {
        if self.rate_a.is_finite() && self.rate_a > 0.0 {
            Some(self.rate_a)
        } else {
            None
        }
    }
}

/// Battery storage unit connected at a bus.
///
/// `p_mw` follows the load convention: positive while charging (drawing from
/// the grid), negative while discharging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    pub bus: usize,

    /// Charge/discharge power rating (MW).
    pub power_mw: f64,

    /// Energy capacity (MWh).
    pub energy_mwh: f64,

    /// Power set-point for the steady-state solve (MW).
    pub p_mw: f64,

    pub status: bool,
}

impl Storage {
    pub fn charging_mw(&self) -> f64 {
        if self.status {
            self.p_mw.max(0.0)
        } else {
            0.0
        }
    }

    pub fn discharging_mw(&self) -> f64 {
        if self.status {
            (-self.p_mw).max(0.0)
        } else {
            0.0
        }
    }
}
