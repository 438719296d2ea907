use serde::{Deserialize, Serialize};

/// Revenue of one increment split by trading channel (€/year).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RevenueBreakdown {
    pub day_ahead: f64,
    pub imbalance: f64,
    pub afrr: f64,
}

impl RevenueBreakdown {
    pub fn total(&self) -> f64 {
        self.day_ahead + self.imbalance + self.afrr
    }
}

impl std::ops::Add for RevenueBreakdown {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            day_ahead: self.day_ahead + rhs.day_ahead,
            imbalance: self.imbalance + rhs.imbalance,
            afrr: self.afrr + rhs.afrr,
        }
    }
}

/// Annualized cost attributed to one increment (€/year).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IncrementCost {
    pub capex: f64,
    pub opex: f64,
}

impl IncrementCost {
    pub fn total(&self) -> f64 {
        self.capex + self.opex
    }
}

/// Annualized capacity cost rates (€/MW/year).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnualizedCost {
    pub capex_per_mw: f64,
    pub opex_per_mw: f64,
}

impl AnnualizedCost {
    pub fn per_mw(&self) -> f64 {
        self.capex_per_mw + self.opex_per_mw
    }

    pub fn for_increment(&self, increment_mw: f64) -> IncrementCost {
        IncrementCost {
            capex: self.capex_per_mw * increment_mw,
            opex: self.opex_per_mw * increment_mw,
        }
    }
}

/// One row of the sweep ledger. Created once per increment and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueRecord {
    /// 1-based position of the increment in the sweep
    pub iteration: usize,
    pub increment_mw: f64,
    /// Installed capacity after this increment
    pub capacity_mw: f64,
    pub marginal_day_ahead_revenue: f64,
    pub marginal_imbalance_revenue: f64,
    pub marginal_afrr_revenue: f64,
    pub marginal_total_revenue: f64,
    pub marginal_capex_cost: f64,
    pub marginal_opex_cost: f64,
    pub marginal_cost: f64,
    pub marginal_net_revenue: f64,
    pub cumulative_day_ahead_revenue: f64,
    pub cumulative_imbalance_revenue: f64,
    pub cumulative_afrr_revenue: f64,
    pub cumulative_total_revenue: f64,
    pub cumulative_net_revenue: f64,
    pub ending_soc_mwh: f64,
}

impl RevenueRecord {
    /// Build the next record, accumulating on top of `previous`
    pub fn next(
        previous: Option<&RevenueRecord>,
        increment_mw: f64,
        capacity_mw: f64,
        revenue: RevenueBreakdown,
        cost: IncrementCost,
        ending_soc_mwh: f64,
    ) -> Self {
        let total = revenue.total();
        let net = total - cost.total();
        let (iteration, base) = match previous {
            Some(p) => (
                p.iteration + 1,
                (
                    RevenueBreakdown {
                        day_ahead: p.cumulative_day_ahead_revenue,
                        imbalance: p.cumulative_imbalance_revenue,
                        afrr: p.cumulative_afrr_revenue,
                    },
                    p.cumulative_total_revenue,
                    p.cumulative_net_revenue,
                ),
            ),
            None => (1, (RevenueBreakdown::default(), 0.0, 0.0)),
        };
        let (cum_breakdown, cum_total, cum_net) = base;
        let cumulative = cum_breakdown + revenue;

        Self {
            iteration,
            increment_mw,
            capacity_mw,
            marginal_day_ahead_revenue: revenue.day_ahead,
            marginal_imbalance_revenue: revenue.imbalance,
            marginal_afrr_revenue: revenue.afrr,
            marginal_total_revenue: total,
            marginal_capex_cost: cost.capex,
            marginal_opex_cost: cost.opex,
            marginal_cost: cost.total(),
            marginal_net_revenue: net,
            cumulative_day_ahead_revenue: cumulative.day_ahead,
            cumulative_imbalance_revenue: cumulative.imbalance,
            cumulative_afrr_revenue: cumulative.afrr,
            cumulative_total_revenue: cum_total + total,
            cumulative_net_revenue: cum_net + net,
            ending_soc_mwh,
        }
    }
}
