use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

// ============================================================================
// Markets and Trading Channels
// ============================================================================

/// Electricity markets the storage asset can trade in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumIter, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Market {
    /// Wholesale day-ahead energy market
    DayAhead,
    /// Imbalance settlement, system short (battery discharges)
    ImbalanceShortage,
    /// Imbalance settlement, system long (battery charges)
    ImbalanceSurplus,
    /// aFRR upward reserve capacity (discharge-capable)
    AfrrUp,
    /// aFRR downward reserve capacity (charge-capable)
    AfrrDown,
}

impl Market {
    /// Markets that carry a finite tradable volume per timestep.
    ///
    /// The day-ahead market is treated as infinitely deep.
    pub fn is_volume_limited(&self) -> bool {
        !matches!(self, Self::DayAhead)
    }

    /// Iterate the four volume-limited markets
    pub fn volume_limited() -> impl Iterator<Item = Market> {
        Self::iter().filter(Market::is_volume_limited)
    }
}

/// Trading channels of the dispatch model. Each channel pairs a charge-side
/// and a discharge-side market.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
    DayAhead,
    Imbalance,
    Afrr,
}

impl Channel {
    /// Market that is traded when this channel charges the battery
    pub fn charge_market(&self) -> Market {
        match self {
            Self::DayAhead => Market::DayAhead,
            Self::Imbalance => Market::ImbalanceSurplus,
            Self::Afrr => Market::AfrrDown,
        }
    }

    /// Market that is traded when this channel discharges the battery
    pub fn discharge_market(&self) -> Market {
        match self {
            Self::DayAhead => Market::DayAhead,
            Self::Imbalance => Market::ImbalanceShortage,
            Self::Afrr => Market::AfrrUp,
        }
    }
}

// ============================================================================
// Per-market container
// ============================================================================

/// Fixed container holding one value per [`Market`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketMap<T> {
    pub day_ahead: T,
    pub imbalance_shortage: T,
    pub imbalance_surplus: T,
    pub afrr_up: T,
    pub afrr_down: T,
}

impl<T> MarketMap<T> {
    /// Build a map by evaluating `f` for every market
    pub fn from_fn(mut f: impl FnMut(Market) -> T) -> Self {
        Self {
            day_ahead: f(Market::DayAhead),
            imbalance_shortage: f(Market::ImbalanceShortage),
            imbalance_surplus: f(Market::ImbalanceSurplus),
            afrr_up: f(Market::AfrrUp),
            afrr_down: f(Market::AfrrDown),
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(Market, T) -> U) -> MarketMap<U> {
        MarketMap {
            day_ahead: f(Market::DayAhead, self.day_ahead),
            imbalance_shortage: f(Market::ImbalanceShortage, self.imbalance_shortage),
            imbalance_surplus: f(Market::ImbalanceSurplus, self.imbalance_surplus),
            afrr_up: f(Market::AfrrUp, self.afrr_up),
            afrr_down: f(Market::AfrrDown, self.afrr_down),
        }
    }

    /// Fallible variant of [`MarketMap::map`], stopping at the first error
    pub fn try_map<U, E>(
        self,
        mut f: impl FnMut(Market, T) -> Result<U, E>,
    ) -> Result<MarketMap<U>, E> {
        Ok(MarketMap {
            day_ahead: f(Market::DayAhead, self.day_ahead)?,
            imbalance_shortage: f(Market::ImbalanceShortage, self.imbalance_shortage)?,
            imbalance_surplus: f(Market::ImbalanceSurplus, self.imbalance_surplus)?,
            afrr_up: f(Market::AfrrUp, self.afrr_up)?,
            afrr_down: f(Market::AfrrDown, self.afrr_down)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (Market, &T)> {
        Market::iter().map(move |m| (m, &self[m]))
    }

    pub fn as_ref(&self) -> MarketMap<&T> {
        MarketMap {
            day_ahead: &self.day_ahead,
            imbalance_shortage: &self.imbalance_shortage,
            imbalance_surplus: &self.imbalance_surplus,
            afrr_up: &self.afrr_up,
            afrr_down: &self.afrr_down,
        }
    }
}

impl<T> Index<Market> for MarketMap<T> {
    type Output = T;

    fn index(&self, market: Market) -> &T {
        match market {
            Market::DayAhead => &self.day_ahead,
            Market::ImbalanceShortage => &self.imbalance_shortage,
            Market::ImbalanceSurplus => &self.imbalance_surplus,
            Market::AfrrUp => &self.afrr_up,
            Market::AfrrDown => &self.afrr_down,
        }
    }
}

impl<T> IndexMut<Market> for MarketMap<T> {
    fn index_mut(&mut self, market: Market) -> &mut T {
        match market {
            Market::DayAhead => &mut self.day_ahead,
            Market::ImbalanceShortage => &mut self.imbalance_shortage,
            Market::ImbalanceSurplus => &mut self.imbalance_surplus,
            Market::AfrrUp => &mut self.afrr_up,
            Market::AfrrDown => &mut self.afrr_down,
        }
    }
}

/// Price-impact coefficients from the capacity regressions
/// (€/MWh per MW of marginal dispatch). Read-only during a sweep.
pub type PriceImpactCoefficients = MarketMap<f64>;

/// Renewable-share elasticities (€/MWh per percentage point of RES share).
pub type RenewableCoefficients = MarketMap<f64>;
