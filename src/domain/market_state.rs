//! Market State
//!
//! Holds the current (feedback-adjusted) price series for the five markets and
//! the tradable-volume ledgers of the four volume-limited ones. A single
//! capacity sweep owns its `MarketState` and mutates it after every increment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Allocation, Market, MarketMap};

/// Market data validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketDataError {
    #[error("Empty horizon: series '{series}' has no timesteps")]
    EmptyHorizon { series: String },

    #[error("Length mismatch: series '{series}' has {actual} timesteps, expected {expected}")]
    LengthMismatch {
        series: String,
        expected: usize,
        actual: usize,
    },

    #[error("Non-finite value in series '{series}' at timestep {index}")]
    NonFinite { series: String, index: usize },
}

/// Hourly tradable volumes of the four volume-limited markets.
///
/// aFRR volumes are contracted reserve (MW); imbalance volumes are settled
/// system imbalance (MWh).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradableVolumes {
    pub imbalance_shortage: Vec<f64>,
    pub imbalance_surplus: Vec<f64>,
    pub afrr_up: Vec<f64>,
    pub afrr_down: Vec<f64>,
}

impl TradableVolumes {
    fn take(&mut self, market: Market) -> Option<Vec<f64>> {
        match market {
            Market::DayAhead => None,
            Market::ImbalanceShortage => Some(std::mem::take(&mut self.imbalance_shortage)),
            Market::ImbalanceSurplus => Some(std::mem::take(&mut self.imbalance_surplus)),
            Market::AfrrUp => Some(std::mem::take(&mut self.afrr_up)),
            Market::AfrrDown => Some(std::mem::take(&mut self.afrr_down)),
        }
    }
}

/// Original and consumed volume for one market.
///
/// `consumed` never exceeds `original`, so the remaining volume is
/// non-increasing across increments and never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeLedger {
    original: Vec<f64>,
    consumed: Vec<f64>,
}

impl VolumeLedger {
    /// Negative input volumes are clamped to zero.
    pub fn new(original: Vec<f64>) -> Self {
        let original: Vec<f64> = original.into_iter().map(|v| v.max(0.0)).collect();
        let consumed = vec![0.0; original.len()];
        Self { original, consumed }
    }

    pub fn len(&self) -> usize {
        self.original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    pub fn original(&self) -> &[f64] {
        &self.original
    }

    pub fn consumed(&self) -> &[f64] {
        &self.consumed
    }

    pub fn remaining_at(&self, t: usize) -> f64 {
        (self.original[t] - self.consumed[t]).max(0.0)
    }

    pub fn remaining(&self) -> Vec<f64> {
        (0..self.len()).map(|t| self.remaining_at(t)).collect()
    }

    /// Book `used` volume against the ledger.
    ///
    /// Negative and non-finite entries are ignored; consumption saturates at
    /// the original volume.
    pub fn consume(&mut self, used: &[f64]) {
        for ((consumed, &original), &u) in self.consumed.iter_mut().zip(&self.original).zip(used) {
            if u.is_finite() && u > 0.0 {
                *consumed = (*consumed + u).min(original);
            }
        }
    }

    /// Total volume still tradable over the horizon
    pub fn total_remaining(&self) -> f64 {
        (0..self.len()).map(|t| self.remaining_at(t)).sum()
    }
}

/// Current prices and remaining volumes of all markets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    horizon: usize,
    prices: MarketMap<Vec<f64>>,
    volumes: MarketMap<Option<VolumeLedger>>,
}

impl MarketState {
    /// Validate and assemble the market state.
    ///
    /// Every series must have the same length as the day-ahead price series
    /// and contain only finite values.
    pub fn new(
        prices: MarketMap<Vec<f64>>,
        mut volumes: TradableVolumes,
    ) -> Result<Self, MarketDataError> {
        let horizon = prices.day_ahead.len();
        if horizon == 0 {
            return Err(MarketDataError::EmptyHorizon {
                series: format!("{}.price", Market::DayAhead),
            });
        }

        for (market, series) in prices.iter() {
            check_series(&format!("{market}.price"), series, horizon)?;
        }

        let volumes = MarketMap::from_fn(|market| volumes.take(market)).try_map(|market, v| {
            v.map(|series| {
                check_series(&format!("{market}.volume"), &series, horizon)?;
                Ok::<_, MarketDataError>(VolumeLedger::new(series))
            })
            .transpose()
        })?;

        Ok(Self {
            horizon,
            prices,
            volumes,
        })
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn prices(&self, market: Market) -> &[f64] {
        &self.prices[market]
    }

    pub fn prices_mut(&mut self, market: Market) -> &mut [f64] {
        &mut self.prices[market]
    }

    pub fn all_prices(&self) -> &MarketMap<Vec<f64>> {
        &self.prices
    }

    pub fn ledger(&self, market: Market) -> Option<&VolumeLedger> {
        self.volumes[market].as_ref()
    }

    /// Remaining tradable volume per timestep; `None` for unbounded markets
    pub fn remaining(&self, market: Market) -> Option<Vec<f64>> {
        self.ledger(market).map(VolumeLedger::remaining)
    }

    /// Upper bound on what one increment may trade in `market` at `t`
    pub fn ceiling(&self, market: Market, t: usize) -> f64 {
        self.ledger(market)
            .map_or(f64::INFINITY, |ledger| ledger.remaining_at(t))
    }

    /// Irreversibly deduct an increment's reserve and imbalance participation
    /// from the tradable volumes.
    pub fn consume_allocation(&mut self, allocation: &Allocation) -> Result<(), MarketDataError> {
        allocation.validate(self.horizon)?;
        for market in Market::volume_limited() {
            if let (Some(ledger), Some(used)) =
                (self.volumes[market].as_mut(), allocation.usage(market))
            {
                ledger.consume(used);
            }
        }
        Ok(())
    }
}

fn check_series(name: &str, series: &[f64], horizon: usize) -> Result<(), MarketDataError> {
    if series.len() != horizon {
        return Err(MarketDataError::LengthMismatch {
            series: name.to_string(),
            expected: horizon,
            actual: series.len(),
        });
    }
    if let Some(index) = series.iter().position(|v| !v.is_finite()) {
        return Err(MarketDataError::NonFinite {
            series: name.to_string(),
            index,
        });
    }
    Ok(())
}
