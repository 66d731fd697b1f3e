//! Study pipeline: prepare, solve, report.
//!
//! Each phase can also run on its own, exchanging handoff files, which is
//! how the `prepare`, `solve` and `report` subcommands work.

use crate::adapter::load_case;
use crate::compare::Comparison;
use crate::config::StudyConfig;
use crate::error::StudyError;
use crate::handoff::{ResultHandoff, ScenarioHandoff, FORMAT_VERSION};
use crate::indicators::{compute, IndicatorSet};
use crate::mpc::MPC;
use crate::nem::{optimize, Schedule};
use crate::report::{publish, render, ReportTarget};
use crate::scenario::Scenario;
use crate::solve::Engine;
use log::{error, info};

/// Output of the prepare phase.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub case: MPC,
    pub scenario: Scenario,
    pub schedule: Option<Schedule>,
    pub handoff: ScenarioHandoff,
}

/// Loads the case, runs the compensation optimizer when configured and
/// validates the scenario against the case.
///
/// An optimizer failure aborts the phase before any scenario is built.
pub fn prepare(config: &StudyConfig, run_id: u64) -> Result<Prepared, StudyError> {
    let source = config.source();
    let case = load_case(&source)?;

    let mut economics = config.economics.clone();
    let schedule = match &config.compensation {
        Some(inputs) => {
            let schedule = optimize(inputs, economics.der_cost)?;
            economics.optimal_operating_cost = Some(schedule.objective);
            Some(schedule)
        }
        None => None,
    };

    let scenario = Scenario::build(&case, config.units.clone(), economics)?;
    let handoff = ScenarioHandoff::new(
        run_id,
        source,
        config.mode,
        scenario.units(),
        scenario.economics().clone(),
    );
    info!(
        "prepared run {} on {} with {} units",
        run_id,
        case.name,
        scenario.units().len()
    );
    Ok(Prepared {
        case,
        scenario,
        schedule,
        handoff,
    })
}

/// Solves the base case and the scenario and reduces both to indicators.
pub fn solve(handoff: &ScenarioHandoff, engine: &mut dyn Engine) -> Result<ResultHandoff, StudyError> {
    let case = load_case(&handoff.case)?;
    let scenario = Scenario::build(&case, handoff.units()?, handoff.economics.clone())?;
    let augmented = scenario.apply(&case)?;

    info!("solving base case with the {} engine", engine.name());
    let base = engine.solve(&case, handoff.mode)?.ensure_converged()?;
    let base_indicators = compute(&case, &base, scenario.economics());

    info!("solving scenario with the {} engine", engine.name());
    let result = engine.solve(&augmented, handoff.mode)?.ensure_converged()?;
    let indicators = compute(&augmented, &result, scenario.economics());

    Ok(ResultHandoff {
        version: FORMAT_VERSION,
        run_id: handoff.run_id,
        case_name: case.name,
        base: Some(base_indicators),
        result,
        indicators,
    })
}

/// Renders the indicators, the comparison with the base case when present,
/// and publishes the text.
pub fn report(result: &ResultHandoff, target: Option<&ReportTarget>) -> Result<String, StudyError> {
    let title = format!("{} ({})", result.case_name, result.result.mode);
    let mut text = render(&title, &result.indicators)?;
    if let Some(base) = &result.base {
        text.push_str(&Comparison::between(base, &result.indicators)?.render());
    }
    publish(&text, target)?;
    Ok(text)
}

/// Result of a full run.
#[derive(Debug, Clone)]
pub struct StudyOutcome {
    pub run_id: u64,
    pub schedule: Option<Schedule>,
    pub base: Option<IndicatorSet>,
    pub indicators: IndicatorSet,
    pub report: String,
}

/// Runs every phase in order and logs a pass/fail summary.
pub fn run(config: &StudyConfig, run_id: u64) -> Result<StudyOutcome, StudyError> {
    let outcome = run_phases(config, run_id);
    match &outcome {
        Ok(_) => info!("study {} on {}: passed", run_id, config.case),
        Err(err) => error!("study {} on {}: failed: {}", run_id, config.case, err),
    }
    outcome
}

fn run_phases(config: &StudyConfig, run_id: u64) -> Result<StudyOutcome, StudyError> {
    let prepared = prepare(config, run_id)?;
    let mut engine = config.engine();
    let result = solve(&prepared.handoff, engine.as_mut())?;
    let text = report(&result, config.report.as_ref())?;
    Ok(StudyOutcome {
        run_id,
        schedule: prepared.schedule,
        base: result.base,
        indicators: result.indicators,
        report: text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, OptimizeError, ScenarioError};
    use crate::indicators::Indicator;
    use crate::mpc::GenKind;
    use crate::nem::{Availability, CompensationInputs, DerUnit, HORIZON};
    use crate::report::WriteMode;
    use crate::scenario::{UnitKind, UnitSpec};
    use crate::solve::{SolveMode, SolveResult};

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
    fn three_bus_study() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = StudyConfig::new("case3");
        config.units = vec![solar(1, 50.0)];
        config.report = Some(ReportTarget {
            path: dir.path().join("report.txt"),
            mode: WriteMode::Append,
        });

        let outcome = run(&config, 1)?;
        assert!(outcome.indicators.require(Indicator::TotalGeneration)? >= 100.0);
        assert!(outcome.indicators.require(Indicator::ActiveLosses)? >= 0.0);
        let base = outcome.base.unwrap_or_default();
        assert_eq!(base.require(Indicator::RenewableGeneration)?, 0.0);

        run(&config, 2)?;
        let saved = std::fs::read_to_string(dir.path().join("report.txt"))?;
        assert_eq!(saved.matches("Technical indicators").count(), 2);
        assert!(saved.contains("Base case vs. scenario"));
        Ok(())
    }

    #[test]
    fn missing_bus_aborts_prepare() {
        let mut config = StudyConfig::new("case3");
        config.units = vec![solar(8, 5.0)];
        assert!(matches!(
            prepare(&config, 1),
            Err(StudyError::Scenario(ScenarioError::BusNotFound { .. }))
        ));
    }

    #[test]
    fn optimizer_seeds_economics() -> anyhow::Result<()> {
        let mut config = StudyConfig::new("case9");
        config.compensation = Some(CompensationInputs {
            load: vec![100.0; HORIZON],
            price: vec![30.0; HORIZON],
            availability: Availability {
                solar: vec![0.0; HORIZON],
                wind: vec![0.0; HORIZON],
            },
            ders: Vec::new(),
            batteries: Vec::new(),
        });
        let prepared = prepare(&config, 3)?;
        let cost = prepared.handoff.economics.optimal_operating_cost;
        assert!(matches!(cost, Some(c) if (c - 72_000.0).abs() < 1e-6));

        if let Some(inputs) = config.compensation.as_mut() {
            inputs.load.truncate(12);
        }
        assert!(matches!(
            prepare(&config, 4),
            Err(StudyError::Optimize(OptimizeError::InvalidProfile { .. }))
        ));
        Ok(())
    }

    #[test]
    fn optimizer_prices_der_at_scenario_cost() -> anyhow::Result<()> {
        let mut config = StudyConfig::new("case9");
        config.economics.der_cost = 20.0;
        config.compensation = Some(CompensationInputs {
            load: vec![100.0; HORIZON],
            price: vec![30.0; HORIZON],
            availability: Availability {
                solar: vec![1.0; HORIZON],
                wind: vec![0.0; HORIZON],
            },
            ders: vec![DerUnit {
                kind: GenKind::Solar,
                capacity_mw: 50.0,
            }],
            batteries: Vec::new(),
        });
        let prepared = prepare(&config, 6)?;
        // 50 MW from the DER at 20 $/MWh and 50 MW from the grid at 30 $/MWh
        let expected = 24.0 * (50.0 * 20.0 + 50.0 * 30.0);
        let cost = prepared.handoff.economics.optimal_operating_cost;
        assert!(matches!(cost, Some(c) if (c - expected).abs() < 1e-6), "{:?}", cost);
        Ok(())
    }

    struct Diverging;

    impl Engine for Diverging {
        fn name(&self) -> &str {
            "diverging"
        }

        fn solve(&mut self, case: &MPC, mode: SolveMode) -> Result<SolveResult, EngineError> {
            Ok(SolveResult {
                mode,
                case: case.clone(),
                converged: false,
                iterations: 10,
                objective: None,
            })
        }
    }

    #[test]
    fn non_convergence_stops_before_indicators() -> anyhow::Result<()> {
        let prepared = prepare(&StudyConfig::new("case9"), 5)?;
        assert!(matches!(
            solve(&prepared.handoff, &mut Diverging),
            Err(StudyError::NotConverged { iterations: 10, .. })
        ));
        Ok(())
    }
}
