use crate::error::ReportError;
use crate::indicators::{Indicator, IndicatorSet};

/// Indicators shown side by side.
const COMPARED: [Indicator; 4] = [
    Indicator::TotalGeneration,
    Indicator::ActiveLosses,
    Indicator::VoltageMin,
    Indicator::VoltageMax,
];

/// Base case and scenario values of the headline indicators.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    rows: Vec<(Indicator, f64, f64)>,
}

impl Comparison {
    pub fn between(base: &IndicatorSet, scenario: &IndicatorSet) -> Result<Self, ReportError> {
        let rows = COMPARED
            .iter()
            .map(|&ind| Ok((ind, base.require(ind)?, scenario.require(ind)?)))
            .collect::<Result<Vec<_>, ReportError>>()?;
        Ok(Self { rows })
    }

    /// Scenario value minus base value.
    pub fn delta(&self, indicator: Indicator) -> Option<f64> {
        self.rows
            .iter()
            .find(|(ind, _, _)| *ind == indicator)
            .map(|(_, base, scenario)| scenario - base)
    }

    pub fn render(&self) -> String {
        let mut out = String::from("=== Base case vs. scenario ===\n");
        out.push_str(&format!(
            "  {:<34}{:>12}{:>12}{:>12}\n",
            "", "base", "scenario", "change"
        ));
        for (ind, base, scenario) in &self.rows {
            out.push_str(&format!(
                "  {:<34}{:>12.3}{:>12.3}{:>+12.3} {}\n",
                ind.label(),
                base,
                scenario,
                scenario - base,
                ind.unit()
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(gen: f64, losses: f64, vmin: f64, vmax: f64) -> IndicatorSet {
        let mut s = IndicatorSet::default();
        s.insert(Indicator::TotalGeneration, gen);
        s.insert(Indicator::ActiveLosses, losses);
        s.insert(Indicator::VoltageMin, vmin);
        s.insert(Indicator::VoltageMax, vmax);
        s
    }

    #[test]
    fn deltas_and_rendering() -> anyhow::Result<()> {
        let cmp = Comparison::between(&set(320.0, 5.0, 0.97, 1.04), &set(318.0, 3.0, 0.98, 1.05))?;
        assert_eq!(cmp.delta(Indicator::ActiveLosses), Some(-2.0));
        assert_eq!(cmp.delta(Indicator::Congestion), None);

        let text = cmp.render();
        assert!(text.contains("Active power losses"));
        assert!(text.contains("-2.000 MW"));
        Ok(())
    }

    #[test]
    fn incomplete_set_is_rejected() {
        let mut partial = IndicatorSet::default();
        partial.insert(Indicator::TotalGeneration, 1.0);
        partial.insert(Indicator::ActiveLosses, 0.0);
        partial.insert(Indicator::VoltageMin, 1.0);
        assert!(matches!(
            Comparison::between(&set(1.0, 0.0, 1.0, 1.0), &partial),
            Err(ReportError::MissingIndicator(name)) if name == "voltage_max"
        ));
    }
}
