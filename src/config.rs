use crate::adapter::CaseSource;
use crate::engine::ExternalEngine;
use crate::error::StudyError;
use crate::mpopt::SolveOptions;
use crate::nem::CompensationInputs;
use crate::report::ReportTarget;
use crate::scenario::{Economics, UnitSpec};
use crate::solve::{Engine, NativeEngine, SolveMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_octave() -> PathBuf {
    PathBuf::from("octave")
}

/// Which engine solves the cases.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineConfig {
    #[default]
    Native,
    Octave {
        #[serde(default = "default_octave")]
        program: PathBuf,
        #[serde(default)]
        matpower_path: Option<PathBuf>,
    },
}

impl EngineConfig {
    pub fn build(&self, options: &SolveOptions) -> Box<dyn Engine> {
        match self {
            EngineConfig::Native => Box::new(NativeEngine::new(options.clone())),
            EngineConfig::Octave {
                program,
                matpower_path,
            } => Box::new(ExternalEngine::octave(
                program.clone(),
                matpower_path.clone(),
            )),
        }
    }
}

/// One study, as read from a TOML file.
///
/// ```toml
/// case = "case9"
/// mode = "power_flow"
///
/// [[units]]
/// bus = 5
/// capacity_mw = 50.0
/// kind = "solar"
///
/// [economics]
/// retail_tariff = 150.0
/// nem_credit = 150.0
/// der_cost = 20.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    /// Catalog name or path to a MATPOWER file.
    pub case: String,

    #[serde(default)]
    pub mode: SolveMode,

    #[serde(default)]
    pub units: Vec<UnitSpec>,

    #[serde(default)]
    pub economics: Economics,

    /// Runs the compensation optimizer before the scenario is built.
    #[serde(default)]
    pub compensation: Option<CompensationInputs>,

    #[serde(default)]
    pub report: Option<ReportTarget>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub solver: SolveOptions,
}

impl StudyConfig {
    pub fn new(case: &str) -> Self {
        Self {
            case: case.to_string(),
            mode: SolveMode::default(),
            units: Vec::new(),
            economics: Economics::default(),
            compensation: None,
            report: None,
            engine: EngineConfig::default(),
            solver: SolveOptions::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, StudyError> {
        let text = fs::read_to_string(path)
            .map_err(|err| StudyError::Config(format!("{}: {}", path.display(), err)))?;
        Self::from_toml(&text)
            .map_err(|err| StudyError::Config(format!("{}: {}", path.display(), err)))
    }

    pub fn from_toml(text: &str) -> Result<Self, StudyError> {
        let config: StudyConfig =
            toml::from_str(text).map_err(|err| StudyError::Config(err.to_string()))?;
        config.validated()
    }

    /// Checks values serde cannot.
    pub fn validated(mut self) -> Result<Self, StudyError> {
        self.solver = self.solver.validated().map_err(StudyError::Config)?;
        let e = &self.economics;
        for (name, value) in [
            ("retail_tariff", e.retail_tariff),
            ("nem_credit", e.nem_credit),
            ("der_cost", e.der_cost),
        ] {
            if !value.is_finite() {
                return Err(StudyError::Config(format!("{} is {}", name, value)));
            }
        }
        if self.case.trim().is_empty() {
            return Err(StudyError::Config("case is empty".to_string()));
        }
        Ok(self)
    }

    pub fn source(&self) -> CaseSource {
        CaseSource::parse(&self.case)
    }

    pub fn engine(&self) -> Box<dyn Engine> {
        self.engine.build(&self.solver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpopt::Alg;
    use crate::report::WriteMode;
    use crate::scenario::UnitKind;

    const STUDY: &str = r#"
case = "case9"
mode = "optimal_power_flow"

[[units]]
bus = 5
capacity_mw = 50.0
kind = "solar"

[[units]]
bus = 9
capacity_mw = 20.0
kind = "storage"
energy_mwh = 80.0
dispatch_mw = -10.0

[economics]
retail_tariff = 120.0
nem_credit = 120.0
der_cost = 15.0

[report]
path = "out/report.txt"

[engine]
kind = "octave"
matpower_path = "/opt/matpower"

[solver]
algorithm = "dc"
"#;

    #[test]
    fn full_study() -> anyhow::Result<()> {
        let config = StudyConfig::from_toml(STUDY)?;
        assert_eq!(config.source(), CaseSource::Catalog("case9".to_string()));
        assert_eq!(config.mode, SolveMode::OptimalPowerFlow);
        assert_eq!(config.units.len(), 2);
        assert_eq!(config.units[1].kind, UnitKind::Storage);
        assert_eq!(config.units[1].dispatch_mw, Some(-10.0));
        assert_eq!(config.economics.der_cost, 15.0);
        assert_eq!(
            config.report.as_ref().map(|r| r.mode),
            Some(WriteMode::Append)
        );
        assert_eq!(
            config.engine,
            EngineConfig::Octave {
                program: PathBuf::from("octave"),
                matpower_path: Some(PathBuf::from("/opt/matpower")),
            }
        );
        assert_eq!(config.solver.algorithm, Alg::Dc);
        assert_eq!(config.solver.max_it, 10);
        assert!(config.compensation.is_none());
        Ok(())
    }

    #[test]
    fn defaults() -> anyhow::Result<()> {
        let config = StudyConfig::from_toml("case = \"grids/case30.m\"")?;
        assert_eq!(config, StudyConfig::new("grids/case30.m"));
        assert_eq!(
            config.source(),
            CaseSource::File(PathBuf::from("grids/case30.m"))
        );
        assert_eq!(config.engine().name(), "native");
        Ok(())
    }

    #[test]
    fn invalid_values() {
        assert!(matches!(
            StudyConfig::from_toml("case = \"case9\"\n[solver]\nmax_it = 0\n"),
            Err(StudyError::Config(_))
        ));
        assert!(matches!(
            StudyConfig::from_toml("mode = \"power_flow\""),
            Err(StudyError::Config(_))
        ));
        assert!(matches!(
            StudyConfig::from_toml("case = \"case9\"\nmode = \"transient\""),
            Err(StudyError::Config(_))
        ));
    }

    #[test]
    fn compensation_takes_der_cost_from_economics() {
        let text = r#"
case = "case9"

[compensation]
load = [1.0]
price = [1.0]
der_cost = 5.0

[compensation.availability]
solar = [0.0]
wind = [0.0]
"#;
        assert!(matches!(
            StudyConfig::from_toml(text),
            Err(StudyError::Config(_))
        ));
    }
}
