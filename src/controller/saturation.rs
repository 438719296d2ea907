use serde::{Deserialize, Serialize};

use crate::domain::RevenueRecord;

/// Capacity at which adding storage stops paying for itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SaturationPoint {
    /// Capacity of the first increment with non-positive net marginal revenue
    pub threshold_mw: f64,
    /// Zero crossing between the last positive and the first non-positive
    /// increment. `None` when the very first increment was already unprofitable.
    pub interpolated_mw: Option<f64>,
}

impl SaturationPoint {
    /// Interpolated capacity if available, otherwise the threshold
    pub fn best_estimate_mw(&self) -> f64 {
        self.interpolated_mw.unwrap_or(self.threshold_mw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Saturation {
    /// Net marginal revenue stayed positive up to the maximum capacity
    NotReached,
    Reached(SaturationPoint),
}

impl Saturation {
    pub fn point(&self) -> Option<&SaturationPoint> {
        match self {
            Self::NotReached => None,
            Self::Reached(point) => Some(point),
        }
    }

    pub fn best_estimate_mw(&self) -> Option<f64> {
        self.point().map(SaturationPoint::best_estimate_mw)
    }
}

/// Capacity at which the line through `a` and `b` crosses zero revenue.
///
/// Points are `(capacity_mw, net_revenue)`. Returns `None` when both
/// revenues are equal.
pub fn interpolate_zero_crossing(a: (f64, f64), b: (f64, f64)) -> Option<f64> {
    let (cap1, rev1) = a;
    let (cap2, rev2) = b;
    if rev2 == rev1 {
        return None;
    }
    Some(cap1 + (0.0 - rev1) * (cap2 - cap1) / (rev2 - rev1))
}

/// Locate the first non-positive net marginal revenue in the ledger.
pub fn detect_saturation(records: &[RevenueRecord]) -> Saturation {
    let Some(idx) = records.iter().position(|r| r.marginal_net_revenue <= 0.0) else {
        return Saturation::NotReached;
    };
    let crossing = &records[idx];

    let interpolated_mw = idx
        .checked_sub(1)
        .map(|prev| &records[prev])
        .and_then(|prev| {
            interpolate_zero_crossing(
                (prev.capacity_mw, prev.marginal_net_revenue),
                (crossing.capacity_mw, crossing.marginal_net_revenue),
            )
        });

    Saturation::Reached(SaturationPoint {
        threshold_mw: crossing.capacity_mw,
        interpolated_mw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IncrementCost, RevenueBreakdown};
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn ledger(net: &[f64]) -> Vec<RevenueRecord> {
        let mut records: Vec<RevenueRecord> = Vec::new();
        for (i, &n) in net.iter().enumerate() {
            let record = RevenueRecord::next(
                records.last(),
                100.0,
                100.0 * (i + 1) as f64,
                RevenueBreakdown {
                    day_ahead: n,
                    ..Default::default()
                },
                IncrementCost::default(),
                0.0,
            );
            records.push(record);
        }
        records
    }

    #[test]
    fn test_interpolates_between_bracketing_records() {
        let records = ledger(&[500.0, 300.0, 100.0, -50.0, -200.0]);
        let Saturation::Reached(point) = detect_saturation(&records) else {
            panic!("saturation expected");
        };
        assert_relative_eq!(point.threshold_mw, 400.0);
        let interpolated = point.interpolated_mw.unwrap();
        assert_relative_eq!(interpolated, 1100.0 / 3.0, epsilon = 1e-9);
        assert!(interpolated > 300.0 && interpolated < 400.0);
        assert_relative_eq!(point.best_estimate_mw(), interpolated);
    }

    #[test]
    fn test_interpolation_is_deterministic() {
        let a = (300.0, 100.0);
        let b = (400.0, -50.0);
        assert_eq!(interpolate_zero_crossing(a, b), interpolate_zero_crossing(a, b));
    }

    #[test]
    fn test_zero_revenue_counts_as_saturated() {
        let records = ledger(&[200.0, 0.0, -10.0]);
        let point = *detect_saturation(&records).point().unwrap();
        assert_relative_eq!(point.threshold_mw, 200.0);
        assert_relative_eq!(point.interpolated_mw.unwrap(), 200.0);
    }

    #[rstest]
    #[case(&[])]
    #[case(&[10.0, 5.0, 1.0])]
    fn test_not_reached(#[case] net: &[f64]) {
        assert_eq!(detect_saturation(&ledger(net)), Saturation::NotReached);
        assert_eq!(detect_saturation(&ledger(net)).best_estimate_mw(), None);
    }

    #[test]
    fn test_first_increment_unprofitable_has_no_interpolation() {
        let point = *detect_saturation(&ledger(&[-1.0, -2.0])).point().unwrap();
        assert_relative_eq!(point.threshold_mw, 100.0);
        assert_eq!(point.interpolated_mw, None);
        assert_relative_eq!(point.best_estimate_mw(), 100.0);
    }

    #[test]
    fn test_equal_revenues_do_not_interpolate() {
        assert_eq!(interpolate_zero_crossing((100.0, 5.0), (200.0, 5.0)), None);
    }
}
