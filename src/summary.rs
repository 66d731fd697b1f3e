//! Static description of a case before any solve.

use crate::error::CaseError;
use crate::mpc::MPC;
use crate::order::BusIndex;

/// Quantile of bus demand above which a load counts as a large centre.
pub const LARGE_LOAD_QUANTILE: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadClass {
    pub count: usize,
    pub total_mw: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSummary {
    pub name: String,
    pub buses: usize,

    /// In-service conventional units away from reference buses.
    pub internal_units: usize,
    pub internal_capacity_mw: f64,

    /// In-service conventional units at reference buses, standing for the
    /// connection to the external grid.
    pub external_units: usize,
    pub external_capacity_mw: f64,

    pub der_capacity_mw: f64,

    pub total_demand_mw: f64,
    pub loads: usize,
    pub threshold_mw: f64,
    pub large_centres: LoadClass,
    pub interior: LoadClass,
}

/// Quantile with linear interpolation between closest ranks.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

impl NetworkSummary {
    pub fn of(case: &MPC) -> Result<Self, CaseError> {
        let index = BusIndex::new(&case.bus)?;

        let mut summary = NetworkSummary {
            name: case.name.clone(),
            buses: case.bus.len(),
            internal_units: 0,
            internal_capacity_mw: 0.0,
            external_units: 0,
            external_capacity_mw: 0.0,
            der_capacity_mw: 0.0,
            total_demand_mw: 0.0,
            loads: 0,
            threshold_mw: 0.0,
            large_centres: LoadClass::default(),
            interior: LoadClass::default(),
        };

        for g in case.gen.iter().filter(|g| g.is_on()) {
            if g.kind.is_renewable() {
                summary.der_capacity_mw += g.pmax;
            } else if case.bus[index.resolve(g.gen_bus)?].is_ref() {
                summary.external_units += 1;
                summary.external_capacity_mw += g.pmax;
            } else {
                summary.internal_units += 1;
                summary.internal_capacity_mw += g.pmax;
            }
        }

        let demand: Vec<f64> = case.bus.iter().map(|b| b.pd).filter(|&pd| pd > 0.0).collect();
        summary.loads = demand.len();
        summary.total_demand_mw = demand.iter().sum();
        if let Some(threshold) = quantile(&demand, LARGE_LOAD_QUANTILE) {
            summary.threshold_mw = threshold;
            for &pd in &demand {
                let class = if pd >= threshold {
                    &mut summary.large_centres
                } else {
                    &mut summary.interior
                };
                class.count += 1;
                class.total_mw += pd;
            }
        }
        Ok(summary)
    }

    pub fn render(&self) -> String {
        let mut out = format!("=== Network {} ({} buses) ===\n", self.name, self.buses);
        out.push_str(&format!(
            "Installed conventional capacity: {:.2} MW\n",
            self.internal_capacity_mw + self.external_capacity_mw
        ));
        out.push_str(&format!(
            "  internal generators: {:.2} MW ({} units)\n",
            self.internal_capacity_mw, self.internal_units
        ));
        out.push_str(&format!(
            "  external connections: {:.2} MW ({} units)\n",
            self.external_capacity_mw, self.external_units
        ));
        if self.der_capacity_mw > 0.0 {
            out.push_str(&format!("DER capacity: {:.2} MW\n", self.der_capacity_mw));
        }
        out.push_str(&format!("Total demand: {:.2} MW\n", self.total_demand_mw));
        out.push_str(&format!("Loads: {}\n", self.loads));
        out.push_str(&format!(
            "Load classes (threshold {:.2} MW):\n",
            self.threshold_mw
        ));
        out.push_str(&format!(
            "  large centres: {} loads, {:.2} MW\n",
            self.large_centres.count, self.large_centres.total_mw
        ));
        out.push_str(&format!(
            "  interior: {} loads, {:.2} MW\n",
            self.interior.count, self.interior.total_mw
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::case9;

    #[test]
    fn linear_quantile() {
        assert_eq!(quantile(&[], 0.8), None);
        assert_eq!(quantile(&[4.0], 0.8), Some(4.0));
        let q = quantile(&[5.0, 1.0, 3.0, 2.0, 4.0], 0.8).unwrap_or_default();
        assert!((q - 4.2).abs() < 1e-12);
    }

    #[test]
    fn case9_summary() -> anyhow::Result<()> {
        let s = NetworkSummary::of(&case9())?;
        assert_eq!(s.external_units, 1);
        assert_eq!(s.external_capacity_mw, 250.0);
        assert_eq!(s.internal_units, 2);
        assert_eq!(s.internal_capacity_mw, 570.0);
        assert_eq!(s.loads, 3);
        assert_eq!(s.total_demand_mw, 315.0);
        assert!((s.threshold_mw - 115.0).abs() < 1e-9);
        assert_eq!(s.large_centres, LoadClass { count: 1, total_mw: 125.0 });
        assert_eq!(s.interior, LoadClass { count: 2, total_mw: 190.0 });
        assert!(s.render().contains("interior: 2 loads, 190.00 MW"));
        Ok(())
    }
}
