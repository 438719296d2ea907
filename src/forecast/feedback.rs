//! Price Feedback
//!
//! After each increment every market price moves linearly with the
//! increment's own dispatch in that market:
//!
//! | market             | driver                    |
//! |--------------------|---------------------------|
//! | day-ahead          | charge - discharge        |
//! | imbalance surplus  | imbalance charge          |
//! | imbalance shortage | imbalance discharge       |
//! | aFRR up            | aFRR discharge (offered)  |
//! | aFRR down          | aFRR charge (offered)     |

use tracing::debug;

use crate::domain::{
    Allocation, Market, MarketDataError, MarketMap, MarketState, PriceImpactCoefficients,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PriceFeedback {
    coefficients: PriceImpactCoefficients,
}

impl PriceFeedback {
    pub fn new(coefficients: PriceImpactCoefficients) -> Self {
        Self { coefficients }
    }

    pub fn coefficients(&self) -> &PriceImpactCoefficients {
        &self.coefficients
    }

    /// Move the prices in `state` by the impact of `allocation`.
    ///
    /// Returns the mean price shift per market (€/MWh).
    pub fn apply(
        &self,
        state: &mut MarketState,
        allocation: &Allocation,
    ) -> Result<MarketMap<f64>, MarketDataError> {
        let horizon = state.horizon();
        allocation.validate(horizon)?;

        let mut mean_shift: MarketMap<f64> = MarketMap::default();
        for (market, &coefficient) in self.coefficients.iter() {
            let prices = state.prices_mut(market);
            let mut total = 0.0;
            for (t, price) in prices.iter_mut().enumerate() {
                let shift = coefficient * driver(allocation, market, t);
                *price += shift;
                total += shift;
            }
            mean_shift[market] = total / horizon as f64;
        }

        debug!(
            day_ahead = mean_shift.day_ahead,
            imbalance_shortage = mean_shift.imbalance_shortage,
            imbalance_surplus = mean_shift.imbalance_surplus,
            afrr_up = mean_shift.afrr_up,
            afrr_down = mean_shift.afrr_down,
            "applied price feedback"
        );
        Ok(mean_shift)
    }
}

/// Signed dispatch that moves `market`'s price at `t`
fn driver(allocation: &Allocation, market: Market, t: usize) -> f64 {
    match market {
        Market::DayAhead => -allocation.day_ahead.net_discharge(t),
        Market::ImbalanceShortage => allocation.imbalance.discharge[t],
        Market::ImbalanceSurplus => allocation.imbalance.charge[t],
        Market::AfrrUp => allocation.afrr.discharge[t],
        Market::AfrrDown => allocation.afrr.charge[t],
    }
}
