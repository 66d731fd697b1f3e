use crate::catalog::{catalog_case, CATALOG};
use crate::error::CaseError;
use crate::matpower::read_case_file;
use crate::mpc::{Gen, GenCost, GenKind, Storage, MPC};
use crate::order::BusIndex;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Where a base case comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSource {
    /// MATPOWER `.m` file.
    File(PathBuf),
    /// Named in-process case.
    Catalog(String),
}

impl CaseSource {
    /// Interprets `s` as a catalog name when it is one, otherwise as a path.
    pub fn parse(s: &str) -> Self {
        if CATALOG.contains(&s) {
            CaseSource::Catalog(s.to_string())
        } else {
            CaseSource::File(PathBuf::from(s))
        }
    }
}

impl fmt::Display for CaseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseSource::File(path) => write!(f, "{}", path.display()),
            CaseSource::Catalog(name) => write!(f, "{}", name),
        }
    }
}

pub fn load_case(source: &CaseSource) -> Result<MPC, CaseError> {
    let mpc = match source {
        CaseSource::File(path) => read_case_file(path)?,
        CaseSource::Catalog(name) => catalog_case(name)?,
    };
    // reject duplicate ids up front
    BusIndex::new(&mpc.bus)?;
    info!(
        "loaded {} ({} buses, {} generators, {} branches)",
        source,
        mpc.bus.len(),
        mpc.gen.len(),
        mpc.branch.len()
    );
    Ok(mpc)
}

/// Appends a generating unit at bus `bus` and returns its row.
///
/// Renewable units inject `capacity` MW at unity power factor without
/// voltage control and have zero generation cost. The case is not modified
/// when the bus does not exist.
pub fn add_generator(
    case: &mut MPC,
    bus: usize,
    capacity: f64,
    kind: GenKind,
) -> Result<usize, CaseError> {
    let index = BusIndex::new(&case.bus)?;
    let row = index.resolve(bus)?;

    case.gen.push(Gen {
        gen_bus: bus,
        pg: capacity,
        qg: 0.0,
        qmax: 0.0,
        qmin: 0.0,
        vg: case.bus[row].vm,
        mbase: case.base_mva,
        status: true,
        pmax: capacity,
        pmin: 0.0,
        kind,
        cost: Some(GenCost::Polynomial {
            startup: 0.0,
            shutdown: 0.0,
            coeffs: vec![0.0, 0.0],
        }),
    });
    debug!("added {:?} unit of {} MW at bus {}", kind, capacity, bus);
    Ok(case.gen.len() - 1)
}

/// Appends an idle storage unit at bus `bus` and returns its row.
pub fn add_storage(
    case: &mut MPC,
    bus: usize,
    power: f64,
    energy: f64,
) -> Result<usize, CaseError> {
    let index = BusIndex::new(&case.bus)?;
    index.resolve(bus)?;

    case.storage.push(Storage {
        bus,
        power_mw: power,
        energy_mwh: energy,
        p_mw: 0.0,
        status: true,
    });
    debug!("added storage of {} MW / {} MWh at bus {}", power, energy, bus);
    Ok(case.storage.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::case9;
    use crate::matpower::write_case_file;

    #[test]
    fn source_parsing() {
        assert_eq!(
            CaseSource::parse("case9"),
            CaseSource::Catalog("case9".to_string())
        );
        assert_eq!(
            CaseSource::parse("grids/case9.m"),
            CaseSource::File(PathBuf::from("grids/case9.m"))
        );
    }

    #[test]
    fn load_from_file_and_catalog() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mycase.m");
        write_case_file(&path, &case9())?;

        let from_file = load_case(&CaseSource::File(path))?;
        let from_catalog = load_case(&CaseSource::Catalog("case9".to_string()))?;
        assert_eq!(from_file.bus, from_catalog.bus);
        assert_eq!(from_file.gen, from_catalog.gen);
        Ok(())
    }

    #[test]
    fn missing_file() {
        let source = CaseSource::File(PathBuf::from("/nonexistent/case.m"));
        assert!(matches!(load_case(&source), Err(CaseError::Io { .. })));
    }

    #[test]
    fn adding_at_missing_bus_leaves_case_untouched() {
        let mut case = case9();
        let before = case.clone();
        assert!(matches!(
            add_generator(&mut case, 10, 50.0, GenKind::Solar),
            Err(CaseError::BusNotFound(10))
        ));
        assert!(matches!(
            add_storage(&mut case, 0, 5.0, 10.0),
            Err(CaseError::BusNotFound(0))
        ));
        assert_eq!(case, before);
    }

    #[test]
    fn ids_are_resolved_not_used_as_rows() -> anyhow::Result<()> {
        let mut case = case9();
        // bus 7 sits at row 0 after relabelling
        case.bus[0].bus_i = 70;
        case.bus[6].bus_i = 1;
        case.bus[0].vm = 1.03;
        let i = add_generator(&mut case, 70, 50.0, GenKind::Wind)?;
        assert_eq!(case.gen[i].gen_bus, 70);
        assert_eq!(case.gen[i].vg, 1.03);
        assert!(matches!(
            add_generator(&mut case, 7, 50.0, GenKind::Wind),
            Err(CaseError::BusNotFound(7))
        ));
        Ok(())
    }
}
