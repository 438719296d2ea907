//! Capacity Sweep
//!
//! Adds storage capacity one fixed increment at a time. Every increment is
//! dispatched against the market as left behind by all earlier increments:
//! the volume it trades is deducted from the market and its dispatch moves
//! prices before the next one is optimized. The sweep stops at the maximum
//! capacity or once it has run a configurable margin past saturation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::saturation::{detect_saturation, Saturation};
use crate::domain::{
    Allocation, AnnualizedCost, MarketDataError, MarketMap, MarketState, RevenueRecord,
};
use crate::forecast::PriceFeedback;
use crate::optimizer::{BatteryParams, DispatchError, DispatchProblem, DispatchStrategy, InitialSoc};

/// Slack for float capacity comparisons (MW)
const CAPACITY_EPSILON: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Invalid sweep settings: {0}")]
    InvalidSettings(String),

    #[error("Market data error: {0}")]
    Market(#[from] MarketDataError),

    #[error("Dispatch failed at {capacity_mw} MW: {source}")]
    Dispatch {
        capacity_mw: f64,
        #[source]
        source: DispatchError,
        /// Market state the failing increment was dispatched against
        market: Box<MarketState>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Capacity added per iteration (MW)
    pub increment_mw: f64,
    /// Upper bound on installed capacity (MW)
    pub max_capacity_mw: f64,
    /// Capacity to keep adding after saturation is detected (MW)
    pub saturation_margin_mw: f64,
    /// Keep per-increment prices and allocations in the report
    pub keep_history: bool,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            increment_mw: 100.0,
            max_capacity_mw: 15_000.0,
            saturation_margin_mw: 400.0,
            keep_history: true,
        }
    }
}

impl SweepSettings {
    pub fn validate(&self) -> Result<(), SweepError> {
        if !(self.increment_mw.is_finite() && self.increment_mw > 0.0) {
            return Err(SweepError::InvalidSettings(format!(
                "increment_mw must be positive, got {}",
                self.increment_mw
            )));
        }
        if !(self.max_capacity_mw.is_finite() && self.max_capacity_mw >= 0.0) {
            return Err(SweepError::InvalidSettings(format!(
                "max_capacity_mw must be non-negative, got {}",
                self.max_capacity_mw
            )));
        }
        if !(self.saturation_margin_mw.is_finite() && self.saturation_margin_mw >= 0.0) {
            return Err(SweepError::InvalidSettings(format!(
                "saturation_margin_mw must be non-negative, got {}",
                self.saturation_margin_mw
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The next increment would exceed the maximum capacity
    MaxCapacity,
    /// Capacity advanced the configured margin past saturation
    SaturationMargin,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SweepPhase {
    Running,
    Saturated { threshold_mw: f64 },
    Terminated(TerminationReason),
}

impl SweepPhase {
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

/// Prices an increment was dispatched against, and what it did with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementSnapshot {
    pub iteration: usize,
    pub capacity_mw: f64,
    pub prices: MarketMap<Vec<f64>>,
    pub allocation: Allocation,
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub run_id: Uuid,
    pub strategy: &'static str,
    pub settings: SweepSettings,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: Vec<RevenueRecord>,
    /// Empty unless `keep_history` is set
    pub history: Vec<IncrementSnapshot>,
    pub saturation: Saturation,
    pub termination: TerminationReason,
    /// SoC carried out of the last increment (MWh)
    pub final_soc: Option<f64>,
    pub final_market: MarketState,
}

impl SweepReport {
    pub fn final_capacity_mw(&self) -> f64 {
        self.records.last().map_or(0.0, |r| r.capacity_mw)
    }
}

/// One scenario run. Owns the market it mutates.
pub struct CapacitySweep<S> {
    strategy: S,
    market: MarketState,
    feedback: PriceFeedback,
    battery: BatteryParams,
    cost: AnnualizedCost,
    settings: SweepSettings,
    phase: SweepPhase,
    carried_soc: Option<f64>,
    records: Vec<RevenueRecord>,
    history: Vec<IncrementSnapshot>,
}

impl<S: DispatchStrategy> CapacitySweep<S> {
    pub fn new(
        strategy: S,
        market: MarketState,
        feedback: PriceFeedback,
        battery: BatteryParams,
        cost: AnnualizedCost,
        settings: SweepSettings,
    ) -> Result<Self, SweepError> {
        settings.validate()?;
        battery.validate().map_err(SweepError::InvalidSettings)?;
        Ok(Self {
            strategy,
            market,
            feedback,
            battery,
            cost,
            settings,
            phase: SweepPhase::Running,
            carried_soc: None,
            records: Vec::new(),
            history: Vec::new(),
        })
    }

    pub fn phase(&self) -> SweepPhase {
        self.phase
    }

    pub fn market(&self) -> &MarketState {
        &self.market
    }

    pub fn records(&self) -> &[RevenueRecord] {
        &self.records
    }

    pub fn installed_capacity_mw(&self) -> f64 {
        self.records.len() as f64 * self.settings.increment_mw
    }

    /// Advance by one increment, or terminate if no increment fits.
    ///
    /// Calling `step` after termination is a no-op.
    pub fn step(&mut self) -> Result<SweepPhase, SweepError> {
        if self.phase.is_terminated() {
            return Ok(self.phase);
        }

        let increment = self.settings.increment_mw;
        let iteration = self.records.len() + 1;
        let capacity_mw = iteration as f64 * increment;
        if capacity_mw > self.settings.max_capacity_mw + CAPACITY_EPSILON {
            info!(
                capacity_mw = self.installed_capacity_mw(),
                max_capacity_mw = self.settings.max_capacity_mw,
                "maximum capacity reached"
            );
            self.phase = SweepPhase::Terminated(TerminationReason::MaxCapacity);
            return Ok(self.phase);
        }

        let initial_soc = self.carried_soc.map_or(InitialSoc::Fresh, InitialSoc::Carried);
        let problem = DispatchProblem::from_market(
            &self.market,
            increment,
            self.battery,
            initial_soc,
            self.cost,
        );
        let outcome = match self.strategy.dispatch(&problem) {
            Ok(outcome) => outcome,
            Err(source) => {
                error!(
                    capacity_mw,
                    strategy = self.strategy.name(),
                    error = %source,
                    "increment dispatch failed"
                );
                return Err(SweepError::Dispatch {
                    capacity_mw,
                    source,
                    market: Box::new(self.market.clone()),
                });
            }
        };

        self.market.consume_allocation(&outcome.allocation)?;
        let shift = self.feedback.apply(&mut self.market, &outcome.allocation)?;
        debug!(capacity_mw, day_ahead_shift = shift.day_ahead, "market updated");

        let bounds = self.battery.soc_bounds(increment);
        if !bounds.contains(outcome.ending_soc, 1e-6) {
            warn!(
                capacity_mw,
                ending_soc = outcome.ending_soc,
                "ending SoC outside bounds, clamping"
            );
        }
        let ending_soc = bounds.clamp(outcome.ending_soc);
        self.carried_soc = Some(ending_soc);

        let record = RevenueRecord::next(
            self.records.last(),
            increment,
            capacity_mw,
            outcome.revenue,
            outcome.cost,
            ending_soc,
        );
        info!(
            iteration,
            capacity_mw,
            day_ahead = record.marginal_day_ahead_revenue,
            imbalance = record.marginal_imbalance_revenue,
            afrr = record.marginal_afrr_revenue,
            net = record.marginal_net_revenue,
            ending_soc,
            "increment dispatched"
        );
        let net = record.marginal_net_revenue;
        self.records.push(record);

        if self.settings.keep_history {
            self.history.push(IncrementSnapshot {
                iteration,
                capacity_mw,
                prices: problem.prices,
                allocation: outcome.allocation,
            });
        }

        self.advance_phase(capacity_mw, net);
        Ok(self.phase)
    }

    fn advance_phase(&mut self, capacity_mw: f64, net_revenue: f64) {
        if self.phase == SweepPhase::Running && net_revenue <= 0.0 {
            info!(threshold_mw = capacity_mw, net_revenue, "saturation detected");
            self.phase = SweepPhase::Saturated {
                threshold_mw: capacity_mw,
            };
        }
        if let SweepPhase::Saturated { threshold_mw } = self.phase {
            if capacity_mw + CAPACITY_EPSILON >= threshold_mw + self.settings.saturation_margin_mw {
                info!(
                    capacity_mw,
                    threshold_mw,
                    margin_mw = self.settings.saturation_margin_mw,
                    "saturation margin reached"
                );
                self.phase = SweepPhase::Terminated(TerminationReason::SaturationMargin);
            }
        }
    }

    /// Run to termination and hand back the report.
    pub fn run(mut self) -> Result<SweepReport, SweepError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %run_id,
            strategy = self.strategy.name(),
            horizon = self.market.horizon(),
            increment_mw = self.settings.increment_mw,
            max_capacity_mw = self.settings.max_capacity_mw,
            "starting capacity sweep"
        );

        let termination = loop {
            if let SweepPhase::Terminated(reason) = self.step()? {
                break reason;
            }
        };

        let saturation = detect_saturation(&self.records);
        match saturation.best_estimate_mw() {
            Some(mw) => info!(%run_id, saturation_mw = mw, ?termination, "sweep finished"),
            None => info!(%run_id, ?termination, "sweep finished without saturation"),
        }

        Ok(SweepReport {
            run_id,
            strategy: self.strategy.name(),
            settings: self.settings,
            started_at,
            finished_at: Utc::now(),
            records: self.records,
            history: self.history,
            saturation,
            termination,
            final_soc: self.carried_soc,
            final_market: self.market,
        })
    }
}
