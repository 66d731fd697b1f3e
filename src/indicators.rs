//! Reduction of a solved case into named scalar indicators.

use crate::error::ReportError;
use crate::mpc::{GenKind, MPC};
use crate::scenario::Economics;
use crate::solve::SolveResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Category {
    Technical,
    Economic,
}

/// Every indicator, in report order.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Indicator {
    VoltageMin,
    VoltageMax,
    VoltageMean,
    VoltageViolations,
    Congestion,
    ActiveLosses,
    ReactiveLosses,
    Utilization,
    TotalGeneration,
    ConventionalGeneration,
    RenewableGeneration,
    TotalDemand,
    RenewablePenetration,
    SystemCost,
    ProducerRevenue,
    ConsumerBill,
    BillImpact,
    OptimalCompensationCost,
}

impl Indicator {
    pub const ALL: [Indicator; 18] = [
        Indicator::VoltageMin,
        Indicator::VoltageMax,
        Indicator::VoltageMean,
        Indicator::VoltageViolations,
        Indicator::Congestion,
        Indicator::ActiveLosses,
        Indicator::ReactiveLosses,
        Indicator::Utilization,
        Indicator::TotalGeneration,
        Indicator::ConventionalGeneration,
        Indicator::RenewableGeneration,
        Indicator::TotalDemand,
        Indicator::RenewablePenetration,
        Indicator::SystemCost,
        Indicator::ProducerRevenue,
        Indicator::ConsumerBill,
        Indicator::BillImpact,
        Indicator::OptimalCompensationCost,
    ];

    /// Key in an [`IndicatorSet`].
    pub fn key(&self) -> &'static str {
        match self {
            Indicator::VoltageMin => "voltage_min",
            Indicator::VoltageMax => "voltage_max",
            Indicator::VoltageMean => "voltage_mean",
            Indicator::VoltageViolations => "voltage_violations",
            Indicator::Congestion => "congestion",
            Indicator::ActiveLosses => "active_losses",
            Indicator::ReactiveLosses => "reactive_losses",
            Indicator::Utilization => "utilization",
            Indicator::TotalGeneration => "total_generation",
            Indicator::ConventionalGeneration => "conventional_generation",
            Indicator::RenewableGeneration => "renewable_generation",
            Indicator::TotalDemand => "total_demand",
            Indicator::RenewablePenetration => "renewable_penetration",
            Indicator::SystemCost => "system_cost",
            Indicator::ProducerRevenue => "producer_revenue",
            Indicator::ConsumerBill => "consumer_bill",
            Indicator::BillImpact => "bill_impact",
            Indicator::OptimalCompensationCost => "optimal_compensation_cost",
        }
    }

    /// Human readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Indicator::VoltageMin => "Minimum voltage",
            Indicator::VoltageMax => "Maximum voltage",
            Indicator::VoltageMean => "Mean voltage",
            Indicator::VoltageViolations => "Buses outside voltage limits",
            Indicator::Congestion => "Congested branches",
            Indicator::ActiveLosses => "Active power losses",
            Indicator::ReactiveLosses => "Reactive power losses",
            Indicator::Utilization => "Average branch utilization",
            Indicator::TotalGeneration => "Total generation",
            Indicator::ConventionalGeneration => "Conventional generation",
            Indicator::RenewableGeneration => "Renewable generation",
            Indicator::TotalDemand => "Total demand",
            Indicator::RenewablePenetration => "Renewable penetration",
            Indicator::SystemCost => "Total system cost",
            Indicator::ProducerRevenue => "DER producer revenue",
            Indicator::ConsumerBill => "Consumer bill",
            Indicator::BillImpact => "Consumer bill impact",
            Indicator::OptimalCompensationCost => "Optimal compensation cost",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Indicator::VoltageMin | Indicator::VoltageMax | Indicator::VoltageMean => "p.u.",
            Indicator::VoltageViolations => "buses",
            Indicator::Congestion
            | Indicator::Utilization
            | Indicator::RenewablePenetration
            | Indicator::BillImpact => "%",
            Indicator::ActiveLosses
            | Indicator::TotalGeneration
            | Indicator::ConventionalGeneration
            | Indicator::RenewableGeneration
            | Indicator::TotalDemand => "MW",
            Indicator::ReactiveLosses => "MVAr",
            Indicator::SystemCost | Indicator::ProducerRevenue | Indicator::ConsumerBill => "$/h",
            Indicator::OptimalCompensationCost => "$/day",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Indicator::SystemCost
            | Indicator::ProducerRevenue
            | Indicator::ConsumerBill
            | Indicator::BillImpact
            | Indicator::OptimalCompensationCost => Category::Economic,
            _ => Category::Technical,
        }
    }

    /// Only present when the compensation optimizer ran.
    pub fn is_optional(&self) -> bool {
        matches!(self, Indicator::OptimalCompensationCost)
    }
}

/// Named scalar indicators of one solved scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet(BTreeMap<String, f64>);

impl IndicatorSet {
    pub fn insert(&mut self, indicator: Indicator, value: f64) {
        self.0.insert(indicator.key().to_string(), value);
    }

    pub fn get(&self, indicator: Indicator) -> Option<f64> {
        self.0.get(indicator.key()).copied()
    }

    /// Value of `indicator`, or an error naming it.
    pub fn require(&self, indicator: Indicator) -> Result<f64, ReportError> {
        self.get(indicator)
            .ok_or_else(|| ReportError::MissingIndicator(indicator.key().to_string()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

/// Computes every indicator of a solved case.
///
/// `case` is the augmented case that was solved and supplies limits,
/// ratings and unit categories; `result` supplies the solution. Both list
/// elements in the same order.
pub fn compute(case: &MPC, result: &SolveResult, economics: &Economics) -> IndicatorSet {
    let solved = &result.case;
    let mut set = IndicatorSet::default();

    // voltages of connected buses
    let buses: Vec<_> = case
        .bus
        .iter()
        .zip(&solved.bus)
        .filter(|(b, _)| !b.is_isolated())
        .collect();
    let vm: Vec<f64> = buses.iter().map(|(_, s)| s.vm).collect();
    let (v_min, v_max, v_mean) = if vm.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        (
            vm.iter().copied().fold(f64::INFINITY, f64::min),
            vm.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            vm.iter().sum::<f64>() / vm.len() as f64,
        )
    };
    let violations = buses
        .iter()
        .filter(|(b, s)| s.vm < b.vmin || s.vm > b.vmax)
        .count();
    set.insert(Indicator::VoltageMin, v_min);
    set.insert(Indicator::VoltageMax, v_max);
    set.insert(Indicator::VoltageMean, v_mean);
    set.insert(Indicator::VoltageViolations, violations as f64);

    // loading of in-service branches with a rating
    let loading: Vec<f64> = case
        .branch
        .iter()
        .zip(&solved.branch)
        .filter(|(br, _)| br.is_on())
        .filter_map(|(br, s)| br.rating().map(|rate| s.flow_mva() / rate))
        .collect();
    let congested = loading.iter().filter(|&&l| l >= 1.0).count();
    set.insert(
        Indicator::Congestion,
        percent(congested as f64, loading.len() as f64),
    );
    set.insert(
        Indicator::Utilization,
        percent(loading.iter().sum::<f64>(), loading.len() as f64),
    );

    set.insert(
        Indicator::ActiveLosses,
        solved.branch.iter().map(|br| br.pf + br.pt).sum(),
    );
    set.insert(
        Indicator::ReactiveLosses,
        solved.branch.iter().map(|br| br.qf + br.qt).sum(),
    );

    // generation by category
    let mut conventional = 0.0;
    let mut renewable = 0.0;
    let mut cost = 0.0;
    for (g, s) in case.gen.iter().zip(&solved.gen) {
        if g.is_off() {
            continue;
        }
        match g.kind {
            GenKind::Conventional => {
                conventional += s.pg;
                if let Some(c) = &g.cost {
                    cost += c.eval(s.pg);
                }
            }
            GenKind::Solar | GenKind::Wind => renewable += s.pg,
        }
    }
    // storage at an isolated bus takes no part in the solve
    let connected: HashSet<usize> = case
        .bus
        .iter()
        .filter(|b| !b.is_isolated())
        .map(|b| b.bus_i)
        .collect();
    let storage_net: f64 = case
        .storage
        .iter()
        .filter(|s| connected.contains(&s.bus))
        .map(|s| s.charging_mw() - s.discharging_mw())
        .sum();
    let demand = case.total_pd() + storage_net;

    set.insert(Indicator::TotalGeneration, conventional + renewable);
    set.insert(Indicator::ConventionalGeneration, conventional);
    set.insert(Indicator::RenewableGeneration, renewable);
    set.insert(Indicator::TotalDemand, demand);
    set.insert(Indicator::RenewablePenetration, percent(renewable, demand));

    // economics
    let revenue = renewable * economics.nem_credit;
    let baseline_bill = demand.max(0.0) * economics.retail_tariff;
    let bill = baseline_bill - revenue;
    set.insert(
        Indicator::SystemCost,
        cost + renewable * economics.der_cost,
    );
    set.insert(Indicator::ProducerRevenue, revenue);
    set.insert(Indicator::ConsumerBill, bill);
    set.insert(
        Indicator::BillImpact,
        if baseline_bill > 0.0 {
            (bill - baseline_bill) / baseline_bill * 100.0
        } else {
            0.0
        },
    );
    if let Some(c) = economics.optimal_operating_cost {
        set.insert(Indicator::OptimalCompensationCost, c);
    }

    set
}
