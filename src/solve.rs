use crate::error::{EngineError, StudyError};
use crate::mpc::MPC;
use crate::mpopt::{Alg, SolveOptions};
use crate::opf::runopf;
use crate::pf::runpf;
use crate::sparse::FaerLU;
use clap::ValueEnum;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of steady-state solve.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SolveMode {
    #[default]
    PowerFlow,
    OptimalPowerFlow,
}

impl fmt::Display for SolveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveMode::PowerFlow => write!(f, "power flow"),
            SolveMode::OptimalPowerFlow => write!(f, "optimal power flow"),
        }
    }
}

/// Outcome of a solve. A result that did not converge is still returned
/// so callers can inspect it; use [`SolveResult::ensure_converged`] before
/// reading indicators from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
    pub mode: SolveMode,

    /// Solved case in the numbering of the input case.
    pub case: MPC,

    pub converged: bool,
    pub iterations: usize,

    /// Generation cost at the solution ($/hr), optimal power flow only.
    pub objective: Option<f64>,
}

impl SolveResult {
    pub fn ensure_converged(self) -> Result<Self, StudyError> {
        if self.converged {
            Ok(self)
        } else {
            Err(StudyError::NotConverged {
                mode: self.mode.to_string(),
                iterations: self.iterations,
            })
        }
    }
}

/// A steady-state solver reachable through a call boundary.
pub trait Engine {
    fn name(&self) -> &str;

    /// Solves `case` without modifying it.
    fn solve(&mut self, case: &MPC, mode: SolveMode) -> Result<SolveResult, EngineError>;
}

/// In-process engine.
#[derive(Debug, Clone, Default)]
pub struct NativeEngine {
    pub options: SolveOptions,
}

impl NativeEngine {
    pub fn new(options: SolveOptions) -> Self {
        Self { options }
    }
}

impl Engine for NativeEngine {
    fn name(&self) -> &str {
        "native"
    }

    fn solve(&mut self, case: &MPC, mode: SolveMode) -> Result<SolveResult, EngineError> {
        let solver = FaerLU;
        info!("running {} on {} ({:?})", mode, case.name, self.options.algorithm);

        let result = match mode {
            SolveMode::PowerFlow => {
                let (solved, converged, iterations) = runpf(case, &self.options, &solver)?;
                SolveResult {
                    mode,
                    case: solved,
                    converged,
                    iterations,
                    objective: None,
                }
            }
            SolveMode::OptimalPowerFlow => {
                if self.options.algorithm == Alg::Dc {
                    warn!("optimal power flow always finishes with an AC power flow");
                }
                let (solved, converged, iterations, objective) =
                    runopf(case, &self.options, &solver)?;
                SolveResult {
                    mode,
                    case: solved,
                    converged,
                    iterations,
                    objective,
                }
            }
        };

        if !result.converged {
            warn!("{} did not converge on {}", mode, case.name);
        }
        Ok(result)
    }
}
