//! Renewable-share price extrapolation
//!
//! Shifts historical prices toward a future renewable-energy share before the
//! sweep starts. The coefficients are €/MWh per percentage point of RES share.

use serde::{Deserialize, Serialize};

use crate::domain::{MarketMap, RenewableCoefficients};

/// Current and target renewable share, both as fractions in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenewableShift {
    pub current_share: f64,
    pub future_share: f64,
}

impl RenewableShift {
    pub fn new(current_share: f64, future_share: f64) -> Self {
        Self {
            current_share,
            future_share,
        }
    }

    /// Change in renewable share in percentage points
    pub fn delta_points(&self) -> f64 {
        (self.future_share - self.current_share) * 100.0
    }
}

/// Apply the one-time renewable shift to every market's price series.
pub fn extrapolate_prices(
    historical: &MarketMap<Vec<f64>>,
    coefficients: &RenewableCoefficients,
    shift: RenewableShift,
) -> MarketMap<Vec<f64>> {
    let delta = shift.delta_points();
    historical.as_ref().map(|market, series| {
        let offset = coefficients[market] * delta;
        series.iter().map(|p| p + offset).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Market;
    use approx::assert_relative_eq;

    fn history() -> MarketMap<Vec<f64>> {
        MarketMap::from_fn(|_| vec![50.0, 60.0, 70.0])
    }

    #[test]
    fn test_zero_delta_leaves_prices_unchanged() {
        let coefficients = MarketMap::from_fn(|_| -1.5);
        let out = extrapolate_prices(&history(), &coefficients, RenewableShift::new(0.4, 0.4));
        assert_eq!(out, history());
    }

    #[test]
    fn test_shift_is_per_percentage_point() {
        let mut coefficients = MarketMap::from_fn(|_| 0.0);
        coefficients.day_ahead = -0.5;
        coefficients.afrr_up = 0.25;

        let out = extrapolate_prices(&history(), &coefficients, RenewableShift::new(0.3, 0.5));
        // 20 points: day-ahead -10 €/MWh, aFRR up +5 €/MWh
        assert_relative_eq!(out.day_ahead[0], 40.0, epsilon = 1e-9);
        assert_relative_eq!(out.day_ahead[2], 60.0, epsilon = 1e-9);
        assert_relative_eq!(out.afrr_up[1], 65.0, epsilon = 1e-9);
        assert_eq!(out[Market::ImbalanceSurplus], history().imbalance_surplus);
    }
}
