//! LP dispatch of one capacity increment
//!
//! The marginal slice is allocated across three trading channels per timestep:
//! day-ahead (charge/discharge), imbalance (surplus charge / shortage
//! discharge) and aFRR reserve (down/up). The formulation considers:
//! - Channel prices for every timestep of the horizon
//! - SoC recursion with per-direction efficiency `sqrt(eta)`
//! - SoC bounds at 10-90% of the slice's energy
//! - Rolling reserve blocks: offered aFRR must stay deliverable for the block
//! - A shared power limit on each of the charge and discharge sides
//! - Remaining market volume for imbalance and aFRR
//!
//! Charge and discharge inside one channel are only bounded jointly, which
//! keeps the problem linear. The solution is made exclusive afterwards, see
//! [`ChannelDispatch::exclusive`].

use std::time::Instant;

use good_lp::solvers::clarabel::clarabel;
use good_lp::solvers::microlp::microlp;
use good_lp::solvers::Solver;
use good_lp::{
    constraint, variable, Constraint, Expression, ProblemVariables, ResolutionError, Solution,
    SolverModel, Variable,
};
use tracing::{debug, error};

use crate::domain::{Allocation, ChannelDispatch, Market, RevenueBreakdown};
use crate::optimizer::{
    reserve_windows, DispatchError, DispatchOutcome, DispatchProblem, DispatchStrategy,
    SolverBackend,
};

/// Dispatch optimizer backed by a linear program
#[derive(Debug, Clone, Copy, Default)]
pub struct LpDispatcher {
    backend: SolverBackend,
}

impl LpDispatcher {
    pub fn new(backend: SolverBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> SolverBackend {
        self.backend
    }

    fn solve(&self, formulation: Formulation) -> Result<RawSolution, ResolutionError> {
        match self.backend {
            SolverBackend::Microlp => solve_with(microlp, formulation),
            SolverBackend::Clarabel => solve_with(clarabel, formulation),
            #[cfg(feature = "highs")]
            SolverBackend::Highs => solve_with(good_lp::solvers::highs::highs, formulation),
        }
    }
}

impl DispatchStrategy for LpDispatcher {
    fn dispatch(&self, problem: &DispatchProblem) -> Result<DispatchOutcome, DispatchError> {
        problem.validate()?;

        let horizon = problem.horizon();
        let started = Instant::now();
        let formulation = formulate(problem);
        debug!(
            horizon,
            increment_mw = problem.increment_mw,
            constraints = formulation.constraints.len(),
            backend = %self.backend,
            "solving dispatch LP"
        );

        let raw = self.solve(formulation).map_err(|e| {
            error!(backend = %self.backend, error = %e, "dispatch LP failed");
            DispatchError::Solver {
                backend: self.backend,
                reason: e.to_string(),
            }
        })?;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(elapsed_ms, "dispatch LP solved");

        Ok(raw.into_outcome(problem))
    }

    fn name(&self) -> &'static str {
        "lp"
    }
}

/// Decision variables, one entry per timestep (SoC has H + 1)
struct DispatchVariables {
    da_charge: Vec<Variable>,
    da_discharge: Vec<Variable>,
    imb_charge: Vec<Variable>,
    imb_discharge: Vec<Variable>,
    afrr_down: Vec<Variable>,
    afrr_up: Vec<Variable>,
    soc: Vec<Variable>,
}

impl DispatchVariables {
    fn read(&self, solution: &impl Solution) -> RawSolution {
        let values = |vars: &[Variable]| vars.iter().map(|&v| solution.value(v)).collect();
        RawSolution {
            da_charge: values(&self.da_charge),
            da_discharge: values(&self.da_discharge),
            imb_charge: values(&self.imb_charge),
            imb_discharge: values(&self.imb_discharge),
            afrr_down: values(&self.afrr_down),
            afrr_up: values(&self.afrr_up),
            soc: values(&self.soc),
        }
    }
}

struct Formulation {
    vars: ProblemVariables,
    objective: Expression,
    constraints: Vec<Constraint>,
    handles: DispatchVariables,
}

fn formulate(problem: &DispatchProblem) -> Formulation {
    let horizon = problem.horizon();
    let power = problem.increment_mw;
    let bounds = problem.soc_bounds();
    let sqrt_eta = problem.battery.one_way_efficiency();
    let inv_sqrt_eta = 1.0 / sqrt_eta;
    let prices = &problem.prices;

    let mut vars = ProblemVariables::new();

    // Each variable is capped by the slice's power and, for the volume-limited
    // markets, by what the earlier increments left in the market.
    let mut bounded = |market: Market| -> Vec<Variable> {
        (0..horizon)
            .map(|t| {
                let upper = problem.ceiling(market, t).min(power);
                vars.add(variable().min(0.0).max(upper))
            })
            .collect()
    };
    let da_charge = bounded(Market::DayAhead);
    let da_discharge = bounded(Market::DayAhead);
    let imb_charge = bounded(Market::ImbalanceSurplus);
    let imb_discharge = bounded(Market::ImbalanceShortage);
    let afrr_down = bounded(Market::AfrrDown);
    let afrr_up = bounded(Market::AfrrUp);
    let soc = vars.add_vector(variable().min(bounds.min).max(bounds.max), horizon + 1);

    let objective: Expression = (0..horizon)
        .map(|t| {
            prices.day_ahead[t] * (da_discharge[t] - da_charge[t])
                + prices.imbalance_shortage[t] * imb_discharge[t]
                - prices.imbalance_surplus[t] * imb_charge[t]
                + prices.afrr_up[t] * afrr_up[t]
                + prices.afrr_down[t] * afrr_down[t]
        })
        .sum();

    let windows = reserve_windows(horizon, problem.battery.reserve_block_hours);
    let mut constraints = Vec::with_capacity(6 * horizon + 2 * windows.len() + 1);

    constraints.push(constraint!(soc[0] == problem.initial_soc_mwh()));

    for t in 0..horizon {
        // SoC recursion; aFRR is reserved capacity and moves no energy
        constraints.push(constraint!(
            soc[t + 1]
                == soc[t] + sqrt_eta * (da_charge[t] + imb_charge[t])
                    - inv_sqrt_eta * (da_discharge[t] + imb_discharge[t])
        ));

        // Shared power limit per direction
        constraints.push(constraint!(
            da_discharge[t] + imb_discharge[t] + afrr_up[t] <= power
        ));
        constraints.push(constraint!(
            da_charge[t] + imb_charge[t] + afrr_down[t] <= power
        ));

        // Relaxed exclusivity inside each channel
        constraints.push(constraint!(da_charge[t] + da_discharge[t] <= power));
        constraints.push(constraint!(imb_charge[t] + imb_discharge[t] <= power));
        constraints.push(constraint!(afrr_down[t] + afrr_up[t] <= power));
    }

    let block = problem.battery.reserve_block_hours;
    for t in windows {
        let down: Expression = afrr_down[t..t + block].iter().map(|&v| Expression::from(v)).sum();
        let up: Expression = afrr_up[t..t + block].iter().map(|&v| Expression::from(v)).sum();
        constraints.push(constraint!(soc[t] + sqrt_eta * down <= bounds.max));
        constraints.push(constraint!(soc[t] - sqrt_eta * up >= bounds.min));
    }

    Formulation {
        vars,
        objective,
        constraints,
        handles: DispatchVariables {
            da_charge,
            da_discharge,
            imb_charge,
            imb_discharge,
            afrr_down,
            afrr_up,
            soc,
        },
    }
}

fn solve_with<S>(solver: S, formulation: Formulation) -> Result<RawSolution, ResolutionError>
where
    S: Solver,
    S::Model: SolverModel<Error = ResolutionError>,
{
    let Formulation {
        vars,
        objective,
        constraints,
        handles,
    } = formulation;

    let mut model = vars.maximise(objective).using(solver);
    for c in constraints {
        model = model.with(c);
    }
    let solution = model.solve()?;
    Ok(handles.read(&solution))
}

/// Variable values exactly as returned by the solver
struct RawSolution {
    da_charge: Vec<f64>,
    da_discharge: Vec<f64>,
    imb_charge: Vec<f64>,
    imb_discharge: Vec<f64>,
    afrr_down: Vec<f64>,
    afrr_up: Vec<f64>,
    soc: Vec<f64>,
}

impl RawSolution {
    /// Value each channel at the LP solution, then make the allocation
    /// exclusive per channel.
    fn into_outcome(self, problem: &DispatchProblem) -> DispatchOutcome {
        let p = &problem.prices;
        let horizon = problem.horizon();
        let bounds = problem.soc_bounds();

        let mut revenue = RevenueBreakdown::default();
        for t in 0..horizon {
            revenue.day_ahead += p.day_ahead[t] * (self.da_discharge[t] - self.da_charge[t]);
            revenue.imbalance += p.imbalance_shortage[t] * self.imb_discharge[t]
                - p.imbalance_surplus[t] * self.imb_charge[t];
            revenue.afrr += p.afrr_up[t] * self.afrr_up[t] + p.afrr_down[t] * self.afrr_down[t];
        }

        let overlap = |a: &[f64], b: &[f64]| -> f64 {
            a.iter().zip(b).map(|(x, y)| x.min(*y).max(0.0)).sum()
        };
        let dropped_mwh = overlap(&self.da_charge, &self.da_discharge)
            + overlap(&self.imb_charge, &self.imb_discharge)
            + overlap(&self.afrr_down, &self.afrr_up);
        if dropped_mwh > 1e-6 {
            debug!(dropped_mwh, "exclusive allocation dropped the smaller side of split channels");
        }

        let soc_trajectory: Vec<f64> = self.soc.iter().map(|&s| bounds.clamp(s)).collect();
        let ending_soc = soc_trajectory[horizon];

        DispatchOutcome {
            allocation: Allocation {
                day_ahead: ChannelDispatch::exclusive(&self.da_charge, &self.da_discharge),
                imbalance: ChannelDispatch::exclusive(&self.imb_charge, &self.imb_discharge),
                afrr: ChannelDispatch::exclusive(&self.afrr_down, &self.afrr_up),
            },
            revenue,
            cost: problem.increment_cost(),
            ending_soc,
            soc_trajectory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market_state::tests::flat_state;
    use crate::domain::{AnnualizedCost, MarketMap};
    use crate::optimizer::{BatteryParams, InitialSoc};

    const TOL: f64 = 1e-4;

    fn battery(block: usize) -> BatteryParams {
        BatteryParams {
            duration_hours: 1.0,
            efficiency: 0.85,
            soc_min_fraction: 0.1,
            soc_max_fraction: 0.9,
            reserve_block_hours: block,
        }
    }

    /// Day-ahead only: the other markets carry no tradable volume
    fn day_ahead_problem(prices: Vec<f64>) -> DispatchProblem {
        let horizon = prices.len();
        let mut all = MarketMap::from_fn(|_| vec![0.0; horizon]);
        all.day_ahead = prices;
        DispatchProblem {
            prices: all,
            ceilings: MarketMap::from_fn(|m| m.is_volume_limited().then(|| vec![0.0; horizon])),
            increment_mw: 100.0,
            battery: battery(4),
            initial_soc: InitialSoc::Fresh,
            cost: AnnualizedCost::default(),
        }
    }

    fn assert_exclusive(allocation: &Allocation) {
        for (channel, dispatch) in allocation.channels() {
            for t in 0..dispatch.len() {
                assert!(
                    dispatch.charge[t] == 0.0 || dispatch.discharge[t] == 0.0,
                    "{channel}: both sides non-zero at t={t}"
                );
            }
        }
    }

    #[test]
    fn test_day_ahead_arbitrage_buys_low_sells_high() {
        let problem = day_ahead_problem(vec![10.0, 50.0, 10.0]);
        let outcome = LpDispatcher::default().dispatch(&problem).unwrap();

        let da = &outcome.allocation.day_ahead;
        assert!(da.charge[0] > 1.0, "should charge in the cheap first hour");
        assert!(da.discharge[1] > 1.0, "should discharge in the expensive hour");
        assert!(da.discharge[1] <= 100.0 + TOL);
        assert!(outcome.revenue.day_ahead > 0.0);
        assert!(outcome.revenue.imbalance.abs() < TOL);
        assert!(outcome.revenue.afrr.abs() < TOL);
        assert_exclusive(&outcome.allocation);
    }

    #[test]
    fn test_efficiency_losses_limit_discharge() {
        // Start at 45 MWh; charging can reach 90, discharging can go to 10.
        let problem = day_ahead_problem(vec![10.0, 50.0, 10.0]);
        let outcome = LpDispatcher::default().dispatch(&problem).unwrap();

        let sqrt_eta = 0.85f64.sqrt();
        let expected_charge = 45.0 / sqrt_eta;
        let expected_discharge = 80.0 * sqrt_eta;
        let da = &outcome.allocation.day_ahead;
        assert!((da.charge[0] - expected_charge).abs() < 1e-2);
        assert!((da.discharge[1] - expected_discharge).abs() < 1e-2);
        assert!(
            (outcome.revenue.day_ahead - (50.0 * expected_discharge - 10.0 * expected_charge))
                .abs()
                < 1e-1
        );
    }

    #[test]
    fn test_soc_trajectory_stays_within_bounds() {
        let prices = vec![5.0, 80.0, 3.0, 90.0, 1.0, 70.0, 2.0, 60.0];
        let problem = day_ahead_problem(prices);
        let outcome = LpDispatcher::default().dispatch(&problem).unwrap();

        let bounds = problem.soc_bounds();
        assert_eq!(outcome.soc_trajectory.len(), problem.horizon() + 1);
        assert!((outcome.soc_trajectory[0] - 45.0).abs() < TOL);
        for soc in &outcome.soc_trajectory {
            assert!(bounds.contains(*soc, 0.0));
        }
        assert_eq!(outcome.ending_soc, outcome.soc_trajectory[problem.horizon()]);
    }

    #[test]
    fn test_reserve_respects_remaining_volume() {
        let horizon = 6;
        let mut problem = day_ahead_problem(vec![30.0; horizon]);
        problem.prices.afrr_up = vec![20.0; horizon];
        problem.ceilings.afrr_up = Some(vec![15.0; horizon]);

        let outcome = LpDispatcher::default().dispatch(&problem).unwrap();
        for t in 0..horizon {
            assert!(outcome.allocation.afrr.discharge[t] <= 15.0 + TOL);
        }
        assert!(outcome.revenue.afrr > 0.0);
    }

    #[test]
    fn test_rolling_block_limits_upward_reserve() {
        // 4 h block at 100 MW: SoC_min + sqrt(eta) * sum(up) <= SoC at block start,
        // so the block can hold at most (45 - 10) / sqrt(eta) MWh of upward reserve.
        let horizon = 4;
        let mut problem = day_ahead_problem(vec![0.0; horizon]);
        problem.prices.afrr_up = vec![50.0; horizon];
        problem.ceilings.afrr_up = Some(vec![1_000.0; horizon]);

        let outcome = LpDispatcher::default().dispatch(&problem).unwrap();
        let offered: f64 = outcome.allocation.afrr.discharge.iter().sum();
        let cap = 35.0 / 0.85f64.sqrt();
        assert!(offered <= cap + 1e-2, "offered {offered} exceeds block cap {cap}");
    }

    #[test]
    fn test_rolling_block_limits_downward_reserve() {
        // SoC[t] + sqrt(eta) * sum(down) <= SoC_max caps the block at
        // (90 - 45) / sqrt(eta) MWh of downward reserve.
        let horizon = 4;
        let mut problem = day_ahead_problem(vec![0.0; horizon]);
        problem.prices.afrr_down = vec![50.0; horizon];
        problem.ceilings.afrr_down = Some(vec![1_000.0; horizon]);

        let outcome = LpDispatcher::default().dispatch(&problem).unwrap();
        let offered: f64 = outcome.allocation.afrr.charge.iter().sum();
        let cap = 45.0 / 0.85f64.sqrt();
        assert!(offered <= cap + 1e-2, "offered {offered} exceeds block cap {cap}");
        assert!(offered > cap - 1e-2, "block cap {cap} should bind, offered {offered}");
    }

    #[test]
    fn test_equal_reserve_prices_book_what_is_traded() {
        let horizon = 6;
        let mut state = flat_state(horizon, 0.0, 1_000.0);
        let mut problem = DispatchProblem::from_market(
            &state,
            100.0,
            BatteryParams {
                duration_hours: 4.0,
                reserve_block_hours: 0,
                ..Default::default()
            },
            InitialSoc::Fresh,
            AnnualizedCost::default(),
        );
        problem.prices.afrr_up = vec![15.0; horizon];
        problem.prices.afrr_down = vec![15.0; horizon];

        let outcome = LpDispatcher::default().dispatch(&problem).unwrap();
        let afrr = &outcome.allocation.afrr;
        let kept: f64 = (0..horizon)
            .map(|t| 15.0 * (afrr.charge[t] + afrr.discharge[t]))
            .sum();
        assert!((outcome.revenue.afrr - 9_000.0).abs() < 1e-3);
        assert!(
            (outcome.revenue.afrr - kept).abs() < 1e-3,
            "booked {} but the allocation trades {kept}",
            outcome.revenue.afrr
        );

        state.consume_allocation(&outcome.allocation).unwrap();
        let consumed: f64 = [Market::AfrrUp, Market::AfrrDown]
            .into_iter()
            .map(|m| state.ledger(m).unwrap().consumed().iter().sum::<f64>())
            .sum();
        assert!((consumed - 600.0).abs() < 1e-3, "consumed {consumed}");
    }

    #[test]
    fn test_zero_volume_blocks_market() {
        let horizon = 3;
        let mut problem = day_ahead_problem(vec![0.0; horizon]);
        problem.prices.imbalance_shortage = vec![500.0; horizon];

        let outcome = LpDispatcher::default().dispatch(&problem).unwrap();
        assert!(outcome.allocation.imbalance.total_discharge() < TOL);
    }

    #[test]
    fn test_carried_soc_is_used() {
        let mut problem = day_ahead_problem(vec![10.0, 50.0]);
        problem.initial_soc = InitialSoc::Carried(90.0);
        let outcome = LpDispatcher::default().dispatch(&problem).unwrap();
        assert!((outcome.soc_trajectory[0] - 90.0).abs() < TOL);
    }

    #[test]
    fn test_shape_error_is_reported_before_solving() {
        let mut problem = day_ahead_problem(vec![10.0, 50.0, 10.0]);
        problem.prices.afrr_down.pop();
        let err = LpDispatcher::default().dispatch(&problem).unwrap_err();
        assert!(matches!(err, DispatchError::Shape { .. }));
    }

    #[test]
    fn test_net_revenue_subtracts_increment_cost() {
        let mut problem = day_ahead_problem(vec![10.0, 50.0, 10.0]);
        problem.cost = AnnualizedCost {
            capex_per_mw: 10.0,
            opex_per_mw: 5.0,
        };
        let outcome = LpDispatcher::default().dispatch(&problem).unwrap();
        assert!((outcome.cost.total() - 1_500.0).abs() < 1e-9);
        assert!((outcome.net_revenue() - (outcome.total_revenue() - 1_500.0)).abs() < 1e-9);
    }
}
