//! Day-ahead operating schedule under net energy metering.
//!
//! A linear program chooses, for each hour of the horizon, grid import,
//! DER dispatch and battery charge/discharge so that load is met at
//! minimum cost. The optimal cost seeds the economics of a scenario.

use crate::error::OptimizeError;
use crate::mpc::GenKind;
use log::{debug, info};
use minilp::{ComparisonOp, LinearExpr, OptimizationDirection, Problem, Variable};
use serde::{Deserialize, Serialize};

/// Number of hourly slots.
pub const HORIZON: usize = 24;

/// Hourly availability factors in [0, 1] per renewable category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub solar: Vec<f64>,
    pub wind: Vec<f64>,
}

impl Availability {
    fn of(&self, kind: GenKind) -> Option<&[f64]> {
        match kind {
            GenKind::Solar => Some(self.solar.as_slice()),
            GenKind::Wind => Some(self.wind.as_slice()),
            GenKind::Conventional => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerUnit {
    pub kind: GenKind,
    pub capacity_mw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub power_mw: f64,
    pub energy_mwh: f64,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,

    /// State of charge before the first hour, as a fraction of capacity.
    pub initial_soc: f64,
}

/// Hourly profiles and resources of the compensation optimizer. The DER
/// operating cost comes from the scenario economics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompensationInputs {
    /// Demand per hour (MW).
    pub load: Vec<f64>,

    /// Grid import price per hour ($/MWh).
    pub price: Vec<f64>,

    pub availability: Availability,

    #[serde(default)]
    pub ders: Vec<DerUnit>,

    #[serde(default)]
    pub batteries: Vec<Battery>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatterySchedule {
    pub charge: Vec<f64>,
    pub discharge: Vec<f64>,
    pub soc: Vec<f64>,
}

/// Optimal hourly schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub grid: Vec<f64>,
    /// Dispatch per DER unit, then per hour.
    pub der: Vec<Vec<f64>>,
    pub batteries: Vec<BatterySchedule>,
    pub objective: f64,
}

fn check_profile(name: &str, values: &[f64]) -> Result<(), OptimizeError> {
    if values.len() != HORIZON {
        return Err(OptimizeError::InvalidProfile {
            name: name.to_string(),
            expected: HORIZON,
            found: values.len(),
        });
    }
    if let Some(v) = values.iter().find(|v| !v.is_finite()) {
        return Err(OptimizeError::InvalidParameter(format!(
            "profile {:?} contains {}",
            name, v
        )));
    }
    Ok(())
}

fn check_inputs(inputs: &CompensationInputs, der_cost: f64) -> Result<(), OptimizeError> {
    check_profile("load", &inputs.load)?;
    check_profile("price", &inputs.price)?;
    check_profile("solar", &inputs.availability.solar)?;
    check_profile("wind", &inputs.availability.wind)?;

    let mut factors = inputs
        .availability
        .solar
        .iter()
        .chain(&inputs.availability.wind);
    if factors.any(|a| !(0.0..=1.0).contains(a)) {
        return Err(OptimizeError::InvalidParameter(
            "availability factors must lie in [0, 1]".to_string(),
        ));
    }
    if !der_cost.is_finite() {
        return Err(OptimizeError::InvalidParameter(format!(
            "DER cost {}",
            der_cost
        )));
    }
    for (i, d) in inputs.ders.iter().enumerate() {
        if d.kind == GenKind::Conventional {
            return Err(OptimizeError::InvalidParameter(format!(
                "DER {} is not renewable",
                i
            )));
        }
        if !d.capacity_mw.is_finite() || d.capacity_mw < 0.0 {
            return Err(OptimizeError::InvalidParameter(format!(
                "DER {} capacity {}",
                i, d.capacity_mw
            )));
        }
    }
    for (i, b) in inputs.batteries.iter().enumerate() {
        let efficiency = |e: f64| e > 0.0 && e <= 1.0;
        let ok = b.power_mw.is_finite()
            && b.power_mw >= 0.0
            && b.energy_mwh.is_finite()
            && b.energy_mwh >= 0.0
            && efficiency(b.charge_efficiency)
            && efficiency(b.discharge_efficiency)
            && (0.0..=1.0).contains(&b.initial_soc);
        if !ok {
            return Err(OptimizeError::InvalidParameter(format!(
                "battery {}: {:?}",
                i, b
            )));
        }
    }
    Ok(())
}

struct BatteryVars {
    charge: Vec<Variable>,
    discharge: Vec<Variable>,
    soc: Vec<Variable>,
}

/// Solves the compensation LP over [`HORIZON`] hours, with DER output
/// priced at `der_cost` ($/MWh).
///
/// Any termination other than optimal is an error.
pub fn optimize(inputs: &CompensationInputs, der_cost: f64) -> Result<Schedule, OptimizeError> {
    check_inputs(inputs, der_cost)?;

    let mut problem = Problem::new(OptimizationDirection::Minimize);

    let grid: Vec<Variable> = (0..HORIZON)
        .map(|t| problem.add_var(inputs.price[t], (0.0, f64::INFINITY)))
        .collect();

    let mut der: Vec<Vec<Variable>> = Vec::with_capacity(inputs.ders.len());
    for d in &inputs.ders {
        let avail = inputs.availability.of(d.kind).ok_or_else(|| {
            OptimizeError::InvalidParameter("DER is not renewable".to_string())
        })?;
        der.push(
            (0..HORIZON)
                .map(|t| problem.add_var(der_cost, (0.0, d.capacity_mw * avail[t])))
                .collect(),
        );
    }

    let mut storage: Vec<BatteryVars> = Vec::with_capacity(inputs.batteries.len());
    for b in &inputs.batteries {
        let vars = BatteryVars {
            charge: (0..HORIZON)
                .map(|_| problem.add_var(0.0, (0.0, b.power_mw)))
                .collect(),
            discharge: (0..HORIZON)
                .map(|_| problem.add_var(0.0, (0.0, b.power_mw)))
                .collect(),
            soc: (0..HORIZON)
                .map(|_| problem.add_var(0.0, (0.0, b.energy_mwh)))
                .collect(),
        };

        // soc[t] - soc[t-1] - eff_c ch[t] + dis[t] / eff_d = 0
        for t in 0..HORIZON {
            let mut expr = LinearExpr::empty();
            expr.add(vars.soc[t], 1.0);
            expr.add(vars.charge[t], -b.charge_efficiency);
            expr.add(vars.discharge[t], 1.0 / b.discharge_efficiency);
            let rhs = if t == 0 {
                b.initial_soc * b.energy_mwh
            } else {
                expr.add(vars.soc[t - 1], -1.0);
                0.0
            };
            problem.add_constraint(expr, ComparisonOp::Eq, rhs);
        }
        storage.push(vars);
    }

    // grid + DER + discharge - charge = load
    for t in 0..HORIZON {
        let mut expr = LinearExpr::empty();
        expr.add(grid[t], 1.0);
        for d in &der {
            expr.add(d[t], 1.0);
        }
        for b in &storage {
            expr.add(b.discharge[t], 1.0);
            expr.add(b.charge[t], -1.0);
        }
        problem.add_constraint(expr, ComparisonOp::Eq, inputs.load[t]);
    }

    debug!(
        "compensation LP: {} DERs, {} batteries over {} hours",
        inputs.ders.len(),
        inputs.batteries.len(),
        HORIZON
    );
    let solution = problem.solve()?;

    let values = |vars: &[Variable]| vars.iter().map(|&v| solution[v]).collect::<Vec<f64>>();
    let schedule = Schedule {
        grid: values(&grid[..]),
        der: der.iter().map(|d| values(d.as_slice())).collect(),
        batteries: storage
            .iter()
            .map(|b| BatterySchedule {
                charge: values(&b.charge[..]),
                discharge: values(&b.discharge[..]),
                soc: values(&b.soc[..]),
            })
            .collect(),
        objective: solution.objective(),
    };
    info!("optimal compensation cost {:.2} $/day", schedule.objective);
    Ok(schedule)
}

impl Schedule {
    pub fn render(&self) -> String {
        let mut out = format!("Optimal operating cost: {:.2} $/day\n", self.objective);
        out.push_str(&format!("{:>4}{:>12}{:>12}", "hour", "grid", "der"));
        for i in 0..self.batteries.len() {
            out.push_str(&format!("{:>12}{:>12}", format!("net{}", i), format!("soc{}", i)));
        }
        out.push('\n');
        for t in 0..self.grid.len() {
            let der: f64 = self.der.iter().map(|d| d[t]).sum();
            out.push_str(&format!("{:>4}{:>12.3}{:>12.3}", t, self.grid[t], der));
            for b in &self.batteries {
                out.push_str(&format!(
                    "{:>12.3}{:>12.3}",
                    b.discharge[t] - b.charge[t],
                    b.soc[t]
                ));
            }
            out.push('\n');
        }
        out
    }
}
