use clap::ValueEnum;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Power flow formulation used by the native engine.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Alg {
    /// Newton's method (power balance, polar).
    #[default]
    Newton,
    /// Linearized DC power flow that assumes lossless branches,
    /// 1pu voltages and small voltage angle differences.
    Dc,
}

/// Options for the native engine.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default, build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct SolveOptions {
    /// Power flow algorithm.
    pub algorithm: Alg,

    /// Termination tolerance on per unit P & Q mismatch. Default value is 1e-8.
    pub tolerance: f64,

    /// Maximum number of Newton iterations. Default value is 10.
    pub max_it: usize,

    /// Number of linear segments used to approximate polynomial costs in
    /// the OPF dispatch. Default value is 8.
    pub opf_segments: usize,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            algorithm: Alg::Newton,
            tolerance: 1e-8,
            max_it: 10,
            opf_segments: 8,
        }
    }
}

impl SolveOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(tol) = self.tolerance {
            if !(tol > 0.0) {
                return Err(format!("tolerance must be positive ({})", tol));
            }
        }
        if let Some(max_it) = self.max_it {
            if max_it == 0 {
                return Err("max_it must be at least 1".to_string());
            }
        }
        if let Some(n) = self.opf_segments {
            if n == 0 {
                return Err("opf_segments must be at least 1".to_string());
            }
        }
        Ok(())
    }
}

impl SolveOptions {
    pub fn builder() -> SolveOptionsBuilder {
        SolveOptionsBuilder::default()
    }

    /// Checks values that arrived without going through the builder,
    /// e.g. from a configuration file.
    pub fn validated(self) -> Result<Self, String> {
        SolveOptionsBuilder::default()
            .algorithm(self.algorithm)
            .tolerance(self.tolerance)
            .max_it(self.max_it)
            .opf_segments(self.opf_segments)
            .build()
            .map_err(|err| err.to_string())
    }
}
