use crate::adapter::{add_generator, add_storage};
use crate::error::{CaseError, ScenarioError};
use crate::mpc::{GenKind, MPC};
use crate::order::BusIndex;
use log::info;
use serde::{Deserialize, Serialize};

/// Category of a unit added by a scenario.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Solar,
    Wind,
    Storage,
}

/// A unit to add to the base case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Bus id in the case file.
    pub bus: usize,

    /// Nameplate capacity (MW). Power rating for storage.
    pub capacity_mw: f64,

    pub kind: UnitKind,

    /// Output set-point (MW). Renewable units default to capacity and
    /// storage to idle. Storage is positive while charging.
    #[serde(default)]
    pub dispatch_mw: Option<f64>,

    /// Energy capacity (MWh), storage only.
    #[serde(default)]
    pub energy_mwh: Option<f64>,
}

/// Tariffs and costs used by the economic indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Economics {
    /// Retail price paid by consumers ($/MWh).
    pub retail_tariff: f64,

    /// Credit paid for energy injected by DERs ($/MWh). Net energy
    /// metering credits at the retail tariff.
    pub nem_credit: f64,

    /// DER operating cost ($/MWh).
    pub der_cost: f64,

    /// Daily cost of the optimal compensation schedule, when computed.
    #[serde(default)]
    pub optimal_operating_cost: Option<f64>,
}

impl Default for Economics {
    fn default() -> Self {
        Self {
            retail_tariff: 150.0,
            nem_credit: 150.0,
            der_cost: 0.0,
            optimal_operating_cost: None,
        }
    }
}

/// Validated set of units and economics for one study case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    case_name: String,
    units: Vec<UnitSpec>,
    economics: Economics,
}

fn check_unit(index: usize, u: &UnitSpec) -> Result<(), ScenarioError> {
    let invalid = |message: String| ScenarioError::InvalidUnit {
        index,
        bus: u.bus,
        message,
    };
    if !u.capacity_mw.is_finite() || u.capacity_mw < 0.0 {
        return Err(invalid(format!("capacity {} MW", u.capacity_mw)));
    }
    match u.kind {
        UnitKind::Solar | UnitKind::Wind => {
            if let Some(p) = u.dispatch_mw {
                if !(0.0..=u.capacity_mw).contains(&p) {
                    return Err(invalid(format!(
                        "dispatch {} MW outside [0, {}]",
                        p, u.capacity_mw
                    )));
                }
            }
            if u.energy_mwh.is_some() {
                return Err(invalid("energy capacity given for a generator".to_string()));
            }
        }
        UnitKind::Storage => {
            match u.energy_mwh {
                Some(e) if e.is_finite() && e > 0.0 => {}
                Some(e) => return Err(invalid(format!("energy capacity {} MWh", e))),
                None => return Err(invalid("storage needs an energy capacity".to_string())),
            }
            if let Some(p) = u.dispatch_mw {
                if !p.is_finite() || p.abs() > u.capacity_mw {
                    return Err(invalid(format!(
                        "set-point {} MW exceeds power rating {}",
                        p, u.capacity_mw
                    )));
                }
            }
        }
    }
    Ok(())
}

impl Scenario {
    /// Validates `units` against the bus ids of `case`.
    ///
    /// Every missing bus id is reported, not only the first.
    pub fn build(
        case: &MPC,
        units: Vec<UnitSpec>,
        economics: Economics,
    ) -> Result<Self, ScenarioError> {
        let index = BusIndex::new(&case.bus)?;

        let mut missing: Vec<usize> = Vec::new();
        for u in &units {
            if !index.contains(u.bus) && !missing.contains(&u.bus) {
                missing.push(u.bus);
            }
        }
        if !missing.is_empty() {
            return Err(ScenarioError::BusNotFound {
                case: case.name.clone(),
                missing,
            });
        }

        for (i, u) in units.iter().enumerate() {
            check_unit(i, u)?;
        }

        Ok(Self {
            case_name: case.name.clone(),
            units,
            economics,
        })
    }

    pub fn case_name(&self) -> &str {
        &self.case_name
    }

    pub fn units(&self) -> &[UnitSpec] {
        &self.units
    }

    pub fn economics(&self) -> &Economics {
        &self.economics
    }

    /// Seeds the economics with the cost of an optimal compensation schedule.
    pub fn with_optimal_cost(mut self, cost: f64) -> Self {
        self.economics.optimal_operating_cost = Some(cost);
        self
    }

    /// Returns a copy of `case` with every unit added.
    pub fn apply(&self, case: &MPC) -> Result<MPC, CaseError> {
        let mut augmented = case.clone();
        for u in &self.units {
            match u.kind {
                UnitKind::Solar | UnitKind::Wind => {
                    let kind = if u.kind == UnitKind::Solar {
                        GenKind::Solar
                    } else {
                        GenKind::Wind
                    };
                    let i = add_generator(&mut augmented, u.bus, u.capacity_mw, kind)?;
                    if let Some(p) = u.dispatch_mw {
                        augmented.gen[i].pg = p;
                    }
                }
                UnitKind::Storage => {
                    let energy = u.energy_mwh.unwrap_or_default();
                    let i = add_storage(&mut augmented, u.bus, u.capacity_mw, energy)?;
                    augmented.storage[i].p_mw = u.dispatch_mw.unwrap_or_default();
                }
            }
        }
        info!(
            "scenario adds {} units to {}",
            self.units.len(),
            self.case_name
        );
        Ok(augmented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::case3;

    fn solar(bus: usize, mw: f64) -> UnitSpec {
        UnitSpec {
            bus,
            capacity_mw: mw,
            kind: UnitKind::Solar,
            dispatch_mw: None,
            energy_mwh: None,
        }
    }

    #[test]
    fn all_missing_buses_are_reported() {
        let case = case3();
        let units = vec![solar(1, 10.0), solar(7, 10.0), solar(4, 5.0), solar(7, 1.0)];
        match Scenario::build(&case, units, Economics::default()) {
            Err(ScenarioError::BusNotFound { case, missing }) => {
                assert_eq!(case, "case3");
                assert_eq!(missing, vec![7, 4]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn invalid_units() {
        let case = case3();
        let mut storage = UnitSpec {
            bus: 2,
            capacity_mw: 10.0,
            kind: UnitKind::Storage,
            dispatch_mw: None,
            energy_mwh: None,
        };
        assert!(matches!(
            Scenario::build(&case, vec![storage.clone()], Economics::default()),
            Err(ScenarioError::InvalidUnit { index: 0, bus: 2, .. })
        ));
        storage.energy_mwh = Some(40.0);
        storage.dispatch_mw = Some(-12.0);
        assert!(Scenario::build(&case, vec![storage], Economics::default()).is_err());

        assert!(Scenario::build(&case, vec![solar(1, f64::NAN)], Economics::default()).is_err());
        assert!(Scenario::build(&case, vec![solar(1, -1.0)], Economics::default()).is_err());
    }

    #[test]
    fn apply_adds_units_to_a_copy() -> anyhow::Result<()> {
        let case = case3();
        let units = vec![
            solar(1, 50.0),
            UnitSpec {
                bus: 3,
                capacity_mw: 20.0,
                kind: UnitKind::Storage,
                dispatch_mw: Some(-5.0),
                energy_mwh: Some(80.0),
            },
        ];
        let scenario = Scenario::build(&case, units, Economics::default())?;
        let augmented = scenario.apply(&case)?;

        assert_eq!(case.gen.len(), 1);
        assert_eq!(augmented.gen.len(), 2);
        assert_eq!(augmented.gen[1].kind, GenKind::Solar);
        assert_eq!(augmented.gen[1].pg, 50.0);
        assert_eq!(augmented.storage.len(), 1);
        assert_eq!(augmented.storage[0].p_mw, -5.0);
        assert_eq!(augmented.storage[0].energy_mwh, 80.0);
        Ok(())
    }
}
