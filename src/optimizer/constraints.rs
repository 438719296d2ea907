use serde::{Deserialize, Serialize};

/// Physical parameters of the storage asset shared by every increment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryParams {
    /// Energy-to-power ratio (h)
    pub duration_hours: f64,
    /// Round-trip efficiency; charge and discharge each lose `sqrt(efficiency)`
    pub efficiency: f64,
    /// Lower SoC bound as a fraction of energy capacity
    pub soc_min_fraction: f64,
    /// Upper SoC bound as a fraction of energy capacity
    pub soc_max_fraction: f64,
    /// Length of the rolling aFRR delivery block (timesteps). Zero disables
    /// the block constraints.
    pub reserve_block_hours: usize,
}

impl Default for BatteryParams {
    fn default() -> Self {
        Self {
            duration_hours: 4.0,
            efficiency: 0.85,
            soc_min_fraction: 0.1,
            soc_max_fraction: 0.9,
            reserve_block_hours: 4,
        }
    }
}

impl BatteryParams {
    /// Validate that the parameters describe a physically possible battery
    pub fn validate(&self) -> Result<(), String> {
        if !(self.duration_hours.is_finite() && self.duration_hours > 0.0) {
            return Err(format!("duration_hours must be positive, got {}", self.duration_hours));
        }
        if !(self.efficiency > 0.0 && self.efficiency <= 1.0) {
            return Err(format!("efficiency must be in (0, 1], got {}", self.efficiency));
        }
        if !(0.0..=1.0).contains(&self.soc_min_fraction)
            || !(0.0..=1.0).contains(&self.soc_max_fraction)
        {
            return Err("SoC fractions must be between 0 and 1".to_string());
        }
        if self.soc_min_fraction >= self.soc_max_fraction {
            return Err(format!(
                "soc_min_fraction ({}) must be below soc_max_fraction ({})",
                self.soc_min_fraction, self.soc_max_fraction
            ));
        }
        Ok(())
    }

    /// SoC bounds (MWh) of a slice with the given power rating
    pub fn soc_bounds(&self, power_mw: f64) -> SocBounds {
        let energy_mwh = power_mw * self.duration_hours;
        SocBounds {
            min: self.soc_min_fraction * energy_mwh,
            max: self.soc_max_fraction * energy_mwh,
        }
    }

    /// Per-direction efficiency factor applied to charged and discharged energy
    pub fn one_way_efficiency(&self) -> f64 {
        self.efficiency.sqrt()
    }
}

/// Admissible SoC interval (MWh)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SocBounds {
    pub min: f64,
    pub max: f64,
}

impl SocBounds {
    pub fn contains(&self, soc: f64, tolerance: f64) -> bool {
        soc >= self.min - tolerance && soc <= self.max + tolerance
    }

    pub fn clamp(&self, soc: f64) -> f64 {
        soc.clamp(self.min, self.max)
    }

    /// Starting SoC of a fresh scenario: half of the upper bound
    pub fn fresh_start(&self) -> f64 {
        self.max / 2.0
    }
}

/// Start windows of the rolling reserve constraints.
///
/// Every window of `block` consecutive timesteps that fits inside the horizon
/// gets one constraint pair; a zero or over-long block yields none.
pub fn reserve_windows(horizon: usize, block: usize) -> std::ops::Range<usize> {
    if block == 0 || block > horizon {
        0..0
    } else {
        0..horizon - block + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_soc_bounds_scale_with_capacity_and_duration() {
        let params = BatteryParams {
            duration_hours: 4.0,
            ..Default::default()
        };
        let bounds = params.soc_bounds(100.0);
        assert!((bounds.min - 40.0).abs() < 1e-9);
        assert!((bounds.max - 360.0).abs() < 1e-9);
        assert!((bounds.fresh_start() - 180.0).abs() < 1e-9);
    }

    #[rstest]
    #[case(0.0, 0.85, 0.1, 0.9)]
    #[case(1.0, 0.0, 0.1, 0.9)]
    #[case(1.0, 1.2, 0.1, 0.9)]
    #[case(1.0, 0.85, 0.9, 0.1)]
    #[case(1.0, 0.85, -0.1, 0.9)]
    fn test_invalid_params_are_rejected(
        #[case] duration_hours: f64,
        #[case] efficiency: f64,
        #[case] soc_min_fraction: f64,
        #[case] soc_max_fraction: f64,
    ) {
        let params = BatteryParams {
            duration_hours,
            efficiency,
            soc_min_fraction,
            soc_max_fraction,
            reserve_block_hours: 4,
        };
        assert!(params.validate().is_err());
    }

    #[rstest]
    #[case(10, 4, 0..7)]
    #[case(4, 4, 0..1)]
    #[case(3, 4, 0..0)]
    #[case(10, 0, 0..0)]
    fn test_reserve_windows(
        #[case] horizon: usize,
        #[case] block: usize,
        #[case] expected: std::ops::Range<usize>,
    ) {
        assert_eq!(reserve_windows(horizon, block), expected);
    }
}
