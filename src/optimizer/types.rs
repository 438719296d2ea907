use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use super::{BatteryParams, SocBounds};
use crate::domain::{
    Allocation, AnnualizedCost, IncrementCost, Market, MarketMap, MarketState, RevenueBreakdown,
};

/// LP backend used to solve a dispatch problem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SolverBackend {
    /// microlp simplex solver (pure Rust).
    ///
    /// Returns a vertex of the optimal set, so a channel whose two sides are
    /// equally profitable ends up on one side only.
    #[default]
    Microlp,
    /// Clarabel interior-point solver (pure Rust). On degenerate optima it
    /// returns an interior point that can split a channel across both sides.
    Clarabel,
    /// HiGHS simplex/IPM solver
    #[cfg(feature = "highs")]
    Highs,
}

/// Dispatch optimizer errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("Empty horizon: no timesteps to dispatch")]
    EmptyHorizon,

    #[error("Size mismatch: series '{series}' has {actual} timesteps, expected {expected}")]
    Shape {
        series: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("{backend} solver failed: {reason}")]
    Solver {
        backend: SolverBackend,
        reason: String,
    },
}

/// Starting SoC of an increment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InitialSoc {
    /// First increment of a scenario: start at half of SoC_max
    Fresh,
    /// Ending SoC carried over from the previous increment (MWh)
    Carried(f64),
}

/// Everything the optimizer needs to allocate one capacity increment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchProblem {
    /// Current price per market and timestep (€/MWh)
    pub prices: MarketMap<Vec<f64>>,
    /// Remaining tradable volume per timestep; `None` means unbounded
    pub ceilings: MarketMap<Option<Vec<f64>>>,
    /// Power rating of the marginal slice (MW)
    pub increment_mw: f64,
    pub battery: BatteryParams,
    pub initial_soc: InitialSoc,
    pub cost: AnnualizedCost,
}

impl DispatchProblem {
    /// Snapshot the current market state into a problem for one increment
    pub fn from_market(
        state: &MarketState,
        increment_mw: f64,
        battery: BatteryParams,
        initial_soc: InitialSoc,
        cost: AnnualizedCost,
    ) -> Self {
        Self {
            prices: state.all_prices().clone(),
            ceilings: MarketMap::from_fn(|market| state.remaining(market)),
            increment_mw,
            battery,
            initial_soc,
            cost,
        }
    }

    pub fn horizon(&self) -> usize {
        self.prices.day_ahead.len()
    }

    pub fn soc_bounds(&self) -> SocBounds {
        self.battery.soc_bounds(self.increment_mw)
    }

    /// Resolved starting SoC (MWh).
    ///
    /// A carried value is clamped into the bounds so that solver tolerance on
    /// the previous increment cannot make this one infeasible.
    pub fn initial_soc_mwh(&self) -> f64 {
        let bounds = self.soc_bounds();
        match self.initial_soc {
            InitialSoc::Fresh => bounds.fresh_start(),
            InitialSoc::Carried(soc) => bounds.clamp(soc),
        }
    }

    pub fn increment_cost(&self) -> IncrementCost {
        self.cost.for_increment(self.increment_mw)
    }

    /// Validate shapes and scalar parameters before formulating the LP
    pub fn validate(&self) -> Result<(), DispatchError> {
        let horizon = self.horizon();
        if horizon == 0 {
            return Err(DispatchError::EmptyHorizon);
        }

        for (market, series) in self.prices.iter() {
            check_len(format!("{market}.price"), series.len(), horizon)?;
        }
        for (market, ceiling) in self.ceilings.iter() {
            if let Some(series) = ceiling {
                check_len(format!("{market}.volume"), series.len(), horizon)?;
            }
        }

        if !(self.increment_mw.is_finite() && self.increment_mw > 0.0) {
            return Err(DispatchError::InvalidParameter {
                name: "increment_mw",
                reason: format!("must be positive, got {}", self.increment_mw),
            });
        }
        self.battery
            .validate()
            .map_err(|reason| DispatchError::InvalidParameter {
                name: "battery",
                reason,
            })?;
        if let InitialSoc::Carried(soc) = self.initial_soc {
            if !soc.is_finite() {
                return Err(DispatchError::InvalidParameter {
                    name: "initial_soc",
                    reason: format!("carried SoC must be finite, got {soc}"),
                });
            }
        }
        Ok(())
    }

    /// Ceiling for `market` at `t`, clamped at zero
    pub fn ceiling(&self, market: Market, t: usize) -> f64 {
        self.ceilings[market]
            .as_ref()
            .map_or(f64::INFINITY, |series| series[t].max(0.0))
    }
}

fn check_len(series: String, actual: usize, expected: usize) -> Result<(), DispatchError> {
    if actual != expected {
        return Err(DispatchError::Shape {
            series,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Result of allocating one increment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    /// Post-processed (channel-exclusive) allocation
    pub allocation: Allocation,
    /// Revenue per channel as valued by the LP objective
    pub revenue: RevenueBreakdown,
    pub cost: IncrementCost,
    /// SoC after the last timestep (MWh)
    pub ending_soc: f64,
    /// SoC at the start of every timestep plus the ending SoC (H + 1 values)
    pub soc_trajectory: Vec<f64>,
}

impl DispatchOutcome {
    pub fn total_revenue(&self) -> f64 {
        self.revenue.total()
    }

    /// Revenue net of the increment's annualized capacity cost
    pub fn net_revenue(&self) -> f64 {
        self.total_revenue() - self.cost.total()
    }
}

/// Capability seam for the dispatch optimizer.
///
/// Implementations solve one increment's allocation problem. Failures are
/// fatal for the increment; callers must not retry.
#[cfg_attr(test, mockall::automock)]
pub trait DispatchStrategy: Send + Sync {
    fn dispatch(&self, problem: &DispatchProblem) -> Result<DispatchOutcome, DispatchError>;

    /// Short identifier used in logs
    fn name(&self) -> &'static str;
}

impl<S: DispatchStrategy + ?Sized> DispatchStrategy for Box<S> {
    fn dispatch(&self, problem: &DispatchProblem) -> Result<DispatchOutcome, DispatchError> {
        (**self).dispatch(problem)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market_state::tests::flat_state;

    fn problem(horizon: usize) -> DispatchProblem {
        DispatchProblem::from_market(
            &flat_state(horizon, 20.0, 10.0),
            100.0,
            BatteryParams {
                duration_hours: 1.0,
                ..Default::default()
            },
            InitialSoc::Fresh,
            AnnualizedCost::default(),
        )
    }

    #[test]
    fn test_fresh_start_is_half_of_max() {
        let p = problem(3);
        assert!((p.initial_soc_mwh() - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_carried_soc_is_clamped_into_bounds() {
        let mut p = problem(3);
        p.initial_soc = InitialSoc::Carried(90.000_001);
        assert_eq!(p.initial_soc_mwh(), 90.0);
        p.initial_soc = InitialSoc::Carried(3.0);
        assert_eq!(p.initial_soc_mwh(), 10.0);
    }

    #[test]
    fn test_validate_reports_offending_series() {
        let mut p = problem(4);
        p.prices.imbalance_shortage.push(1.0);
        assert_eq!(
            p.validate().unwrap_err(),
            DispatchError::Shape {
                series: "imbalance_shortage.price".to_string(),
                expected: 4,
                actual: 5,
            }
        );

        let mut p = problem(4);
        p.ceilings.afrr_down = Some(vec![1.0; 2]);
        assert!(matches!(
            p.validate().unwrap_err(),
            DispatchError::Shape { ref series, .. } if series == "afrr_down.volume"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_scalars() {
        let mut p = problem(2);
        p.increment_mw = 0.0;
        assert!(matches!(
            p.validate(),
            Err(DispatchError::InvalidParameter { name: "increment_mw", .. })
        ));

        let mut p = problem(2);
        p.initial_soc = InitialSoc::Carried(f64::NAN);
        assert!(p.validate().is_err());

        let mut p = problem(2);
        p.prices = MarketMap::default();
        assert_eq!(p.validate(), Err(DispatchError::EmptyHorizon));
    }

    #[test]
    fn test_ceiling_is_unbounded_for_day_ahead() {
        let p = problem(2);
        assert_eq!(p.ceiling(Market::DayAhead, 0), f64::INFINITY);
        assert_eq!(p.ceiling(Market::AfrrUp, 1), 10.0);
    }
}
