//! Binary files passed between the prepare, solve and report phases.

use crate::adapter::CaseSource;
use crate::error::HandoffError;
use crate::indicators::IndicatorSet;
use crate::scenario::{Economics, UnitKind, UnitSpec};
use crate::solve::{SolveMode, SolveResult};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bumped whenever either handoff layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// Identifier tying a result file to the scenario file it was solved from.
pub fn new_run_id() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    nanos ^ ((std::process::id() as u64) << 32)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorEntry {
    pub bus: usize,
    pub capacity_mw: f64,
    pub kind: UnitKind,
    pub dispatch_mw: Option<f64>,
}

/// Inputs of the solve phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioHandoff {
    pub version: u32,
    pub run_id: u64,
    pub case: CaseSource,
    pub mode: SolveMode,
    pub generators: Vec<GeneratorEntry>,

    /// (bus, power rating) per storage unit.
    pub storage_power: Vec<(usize, f64)>,
    /// (bus, energy capacity) per storage unit.
    pub storage_energy: Vec<(usize, f64)>,
    pub storage_setpoint: Vec<Option<f64>>,

    pub economics: Economics,
}

impl ScenarioHandoff {
    pub fn new(
        run_id: u64,
        case: CaseSource,
        mode: SolveMode,
        units: &[UnitSpec],
        economics: Economics,
    ) -> Self {
        let mut handoff = ScenarioHandoff {
            version: FORMAT_VERSION,
            run_id,
            case,
            mode,
            generators: Vec::new(),
            storage_power: Vec::new(),
            storage_energy: Vec::new(),
            storage_setpoint: Vec::new(),
            economics,
        };
        for u in units {
            match u.kind {
                UnitKind::Storage => {
                    handoff.storage_power.push((u.bus, u.capacity_mw));
                    handoff
                        .storage_energy
                        .push((u.bus, u.energy_mwh.unwrap_or_default()));
                    handoff.storage_setpoint.push(u.dispatch_mw);
                }
                kind => handoff.generators.push(GeneratorEntry {
                    bus: u.bus,
                    capacity_mw: u.capacity_mw,
                    kind,
                    dispatch_mw: u.dispatch_mw,
                }),
            }
        }
        handoff
    }

    /// Rebuilds the unit list, generators first.
    pub fn units(&self) -> Result<Vec<UnitSpec>, HandoffError> {
        let n = self.storage_power.len();
        if self.storage_energy.len() != n || self.storage_setpoint.len() != n {
            return Err(HandoffError::Inconsistent(format!(
                "storage arrays have {}, {} and {} entries",
                n,
                self.storage_energy.len(),
                self.storage_setpoint.len()
            )));
        }

        let mut units: Vec<UnitSpec> = Vec::with_capacity(self.generators.len() + n);
        for g in &self.generators {
            if g.kind == UnitKind::Storage {
                return Err(HandoffError::Inconsistent(format!(
                    "storage listed as generator at bus {}",
                    g.bus
                )));
            }
            units.push(UnitSpec {
                bus: g.bus,
                capacity_mw: g.capacity_mw,
                kind: g.kind,
                dispatch_mw: g.dispatch_mw,
                energy_mwh: None,
            });
        }
        for ((&(bus, power), &(energy_bus, energy)), &setpoint) in self
            .storage_power
            .iter()
            .zip(&self.storage_energy)
            .zip(&self.storage_setpoint)
        {
            if bus != energy_bus {
                return Err(HandoffError::Inconsistent(format!(
                    "storage power at bus {} but energy at bus {}",
                    bus, energy_bus
                )));
            }
            units.push(UnitSpec {
                bus,
                capacity_mw: power,
                kind: UnitKind::Storage,
                dispatch_mw: setpoint,
                energy_mwh: Some(energy),
            });
        }
        Ok(units)
    }
}

/// Outputs of the solve phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultHandoff {
    pub version: u32,
    pub run_id: u64,
    pub case_name: String,
    pub base: Option<IndicatorSet>,
    pub result: SolveResult,
    pub indicators: IndicatorSet,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> HandoffError + '_ {
    move |source| HandoffError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

fn write<T: Serialize>(path: &Path, value: &T) -> Result<(), HandoffError> {
    let bytes = bincode::serialize(value)?;
    let tmp = temp_sibling(path);
    fs::write(&tmp, bytes).map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(io_err(path))?;
    debug!("wrote {}", path.display());
    Ok(())
}

fn read<T: DeserializeOwned>(path: &Path) -> Result<T, HandoffError> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    // the version leads every layout
    let found: u32 = bincode::deserialize(&bytes)?;
    if found != FORMAT_VERSION {
        return Err(HandoffError::Version {
            found,
            expected: FORMAT_VERSION,
        });
    }
    Ok(bincode::deserialize(&bytes)?)
}

pub fn write_scenario(path: &Path, handoff: &ScenarioHandoff) -> Result<(), HandoffError> {
    write(path, handoff)
}

pub fn read_scenario(path: &Path) -> Result<ScenarioHandoff, HandoffError> {
    read(path)
}

pub fn write_result(path: &Path, handoff: &ResultHandoff) -> Result<(), HandoffError> {
    write(path, handoff)
}

/// Reads a result file, rejecting one left over from a different run when
/// `run_id` is given.
pub fn read_result(path: &Path, run_id: Option<u64>) -> Result<ResultHandoff, HandoffError> {
    let handoff: ResultHandoff = read(path)?;
    if let Some(expected) = run_id {
        if handoff.run_id != expected {
            return Err(HandoffError::StaleRun {
                found: handoff.run_id,
                expected,
            });
        }
    }
    if handoff.indicators.is_empty() {
        return Err(HandoffError::MissingField("indicators".to_string()));
    }
    Ok(handoff)
}
