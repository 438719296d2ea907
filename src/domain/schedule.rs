use serde::{Deserialize, Serialize};

use strum::IntoEnumIterator;

use super::{Channel, Market, MarketDataError};

/// Charge/discharge energy per timestep for one trading channel (MWh).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelDispatch {
    pub charge: Vec<f64>,
    pub discharge: Vec<f64>,
}

impl ChannelDispatch {
    pub fn idle(horizon: usize) -> Self {
        Self {
            charge: vec![0.0; horizon],
            discharge: vec![0.0; horizon],
        }
    }

    /// Resolve a relaxed LP solution into an exclusive schedule.
    ///
    /// The LP only bounds `charge + discharge` per channel, so both sides can
    /// be non-zero in the same step. Keep the larger side and zero the other;
    /// equal values resolve to discharge. Solver noise below zero is dropped.
    pub fn exclusive(charge: &[f64], discharge: &[f64]) -> Self {
        let (charge, discharge) = charge
            .iter()
            .zip(discharge)
            .map(|(&c, &d)| {
                let (c, d) = (c.max(0.0), d.max(0.0));
                if c > d {
                    (c, 0.0)
                } else {
                    (0.0, d)
                }
            })
            .unzip();
        Self { charge, discharge }
    }

    pub fn len(&self) -> usize {
        self.charge.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charge.is_empty()
    }

    /// Net energy sold at timestep `t` (discharge minus charge)
    pub fn net_discharge(&self, t: usize) -> f64 {
        self.discharge[t] - self.charge[t]
    }

    pub fn total_discharge(&self) -> f64 {
        self.discharge.iter().sum()
    }
}

/// Allocation of one capacity increment across the three trading channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub day_ahead: ChannelDispatch,
    pub imbalance: ChannelDispatch,
    pub afrr: ChannelDispatch,
}

impl Allocation {
    pub fn idle(horizon: usize) -> Self {
        Self {
            day_ahead: ChannelDispatch::idle(horizon),
            imbalance: ChannelDispatch::idle(horizon),
            afrr: ChannelDispatch::idle(horizon),
        }
    }

    pub fn channel(&self, channel: Channel) -> &ChannelDispatch {
        match channel {
            Channel::DayAhead => &self.day_ahead,
            Channel::Imbalance => &self.imbalance,
            Channel::Afrr => &self.afrr,
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = (Channel, &ChannelDispatch)> {
        Channel::iter().map(move |c| (c, self.channel(c)))
    }

    pub fn horizon(&self) -> usize {
        self.day_ahead.len()
    }

    /// Check that all six series cover exactly `horizon` timesteps
    pub fn validate(&self, horizon: usize) -> Result<(), MarketDataError> {
        for (channel, dispatch) in self.channels() {
            for (side, series) in [("charge", &dispatch.charge), ("discharge", &dispatch.discharge)] {
                if series.len() != horizon {
                    return Err(MarketDataError::LengthMismatch {
                        series: format!("{channel}.{side}"),
                        expected: horizon,
                        actual: series.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Volume taken out of a volume-limited market by this allocation.
    ///
    /// Returns `None` for the day-ahead market, which has no volume ceiling.
    pub fn usage(&self, market: Market) -> Option<&[f64]> {
        if !market.is_volume_limited() {
            return None;
        }
        self.channels().find_map(|(channel, dispatch)| {
            if channel.charge_market() == market {
                Some(dispatch.charge.as_slice())
            } else if channel.discharge_market() == market {
                Some(dispatch.discharge.as_slice())
            } else {
                None
            }
        })
    }
}
