use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::controller::{
    IncrementSnapshot, Saturation, SweepReport, SweepSettings, TerminationReason,
};
use crate::domain::{Market, MarketMap, RevenueRecord};

pub const RECORDS_FILE: &str = "revenue_records.csv";
pub const HISTORY_FILE: &str = "dispatch_history.csv";
pub const INITIAL_PRICES_FILE: &str = "initial_prices.csv";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Serialize)]
struct PriceRow {
    timestep: usize,
    day_ahead: f64,
    imbalance_shortage: f64,
    imbalance_surplus: f64,
    afrr_up: f64,
    afrr_down: f64,
}

impl PriceRow {
    fn at(prices: &MarketMap<Vec<f64>>, t: usize) -> Self {
        Self {
            timestep: t,
            day_ahead: prices.day_ahead[t],
            imbalance_shortage: prices.imbalance_shortage[t],
            imbalance_surplus: prices.imbalance_surplus[t],
            afrr_up: prices.afrr_up[t],
            afrr_down: prices.afrr_down[t],
        }
    }
}

#[derive(Debug, Serialize)]
struct HistoryRow {
    iteration: usize,
    capacity_mw: f64,
    timestep: usize,
    day_ahead_charge: f64,
    day_ahead_discharge: f64,
    imbalance_charge: f64,
    imbalance_discharge: f64,
    afrr_down: f64,
    afrr_up: f64,
    price_day_ahead: f64,
    price_imbalance_shortage: f64,
    price_imbalance_surplus: f64,
    price_afrr_up: f64,
    price_afrr_down: f64,
}

/// Run-level summary written next to the tabular outputs
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub strategy: &'static str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub settings: SweepSettings,
    pub increments: usize,
    pub final_capacity_mw: f64,
    pub saturation: Saturation,
    pub saturation_estimate_mw: Option<f64>,
    pub termination: TerminationReason,
    pub final_soc_mwh: Option<f64>,
    pub cumulative_net_revenue: f64,
    /// Unsold volume per volume-limited market at the end of the sweep
    pub remaining_volume: Vec<(Market, f64)>,
}

impl From<&SweepReport> for RunSummary {
    fn from(report: &SweepReport) -> Self {
        let remaining_volume = Market::volume_limited()
            .filter_map(|m| {
                report
                    .final_market
                    .ledger(m)
                    .map(|ledger| (m, ledger.total_remaining()))
            })
            .collect();
        Self {
            run_id: report.run_id,
            strategy: report.strategy,
            started_at: report.started_at,
            finished_at: report.finished_at,
            settings: report.settings,
            increments: report.records.len(),
            final_capacity_mw: report.final_capacity_mw(),
            saturation: report.saturation,
            saturation_estimate_mw: report.saturation.best_estimate_mw(),
            termination: report.termination,
            final_soc_mwh: report.final_soc,
            cumulative_net_revenue: report
                .records
                .last()
                .map_or(0.0, |r| r.cumulative_net_revenue),
            remaining_volume,
        }
    }
}

/// Writes the outputs of one sweep into a directory
pub struct ResultsWriter {
    dir: PathBuf,
}

impl ResultsWriter {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn csv_writer(&self, name: &str) -> Result<csv::Writer<File>> {
        let path = self.dir.join(name);
        csv::Writer::from_path(&path).with_context(|| format!("failed to create {}", path.display()))
    }

    pub fn write_records(&self, records: &[RevenueRecord]) -> Result<()> {
        let mut w = self.csv_writer(RECORDS_FILE)?;
        for record in records {
            w.serialize(record)?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn write_initial_prices(&self, prices: &MarketMap<Vec<f64>>) -> Result<()> {
        let mut w = self.csv_writer(INITIAL_PRICES_FILE)?;
        for t in 0..prices.day_ahead.len() {
            w.serialize(PriceRow::at(prices, t))?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn write_history(&self, history: &[IncrementSnapshot]) -> Result<()> {
        let mut w = self.csv_writer(HISTORY_FILE)?;
        for snapshot in history {
            let a = &snapshot.allocation;
            let p = &snapshot.prices;
            for t in 0..a.horizon() {
                w.serialize(HistoryRow {
                    iteration: snapshot.iteration,
                    capacity_mw: snapshot.capacity_mw,
                    timestep: t,
                    day_ahead_charge: a.day_ahead.charge[t],
                    day_ahead_discharge: a.day_ahead.discharge[t],
                    imbalance_charge: a.imbalance.charge[t],
                    imbalance_discharge: a.imbalance.discharge[t],
                    afrr_down: a.afrr.charge[t],
                    afrr_up: a.afrr.discharge[t],
                    price_day_ahead: p.day_ahead[t],
                    price_imbalance_shortage: p.imbalance_shortage[t],
                    price_imbalance_surplus: p.imbalance_surplus[t],
                    price_afrr_up: p.afrr_up[t],
                    price_afrr_down: p.afrr_down[t],
                })?;
            }
        }
        w.flush()?;
        Ok(())
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        let path = self.dir.join(SUMMARY_FILE);
        let file =
            File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, summary)?;
        Ok(())
    }

    /// Write every output of a finished sweep
    pub fn write_report(
        &self,
        report: &SweepReport,
        initial_prices: &MarketMap<Vec<f64>>,
    ) -> Result<RunSummary> {
        self.write_initial_prices(initial_prices)?;
        self.write_records(&report.records)?;
        if !report.history.is_empty() {
            self.write_history(&report.history)?;
        }
        let summary = RunSummary::from(report);
        self.write_summary(&summary)?;
        info!(dir = %self.dir.display(), run_id = %report.run_id, "results written");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Allocation, IncrementCost, RevenueBreakdown};
    use crate::domain::market_state::tests::flat_state;
    use tempfile::tempdir;

    fn report() -> SweepReport {
        let revenue = RevenueBreakdown {
            day_ahead: 300.0,
            imbalance: 20.0,
            afrr: 10.0,
        };
        let cost = IncrementCost {
            capex: 100.0,
            opex: 50.0,
        };
        let first = RevenueRecord::next(None, 100.0, 100.0, revenue, cost, 180.0);
        let second = RevenueRecord::next(
            Some(&first),
            100.0,
            200.0,
            RevenueBreakdown::default(),
            cost,
            170.0,
        );
        let mut allocation = Allocation::idle(2);
        allocation.day_ahead.discharge = vec![0.0, 80.0];

        SweepReport {
            run_id: Uuid::new_v4(),
            strategy: "lp",
            settings: SweepSettings::default(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            records: vec![first, second],
            history: vec![IncrementSnapshot {
                iteration: 1,
                capacity_mw: 100.0,
                prices: MarketMap::from_fn(|_| vec![10.0, 50.0]),
                allocation,
            }],
            saturation: crate::controller::detect_saturation(&[]),
            termination: TerminationReason::MaxCapacity,
            final_soc: Some(170.0),
            final_market: flat_state(2, 10.0, 5.0),
        }
    }

    #[test]
    fn test_write_report_creates_all_outputs() {
        let dir = tempdir().unwrap();
        let writer = ResultsWriter::create(dir.path().join("out")).unwrap();
        let prices = MarketMap::from_fn(|_| vec![10.0, 50.0]);
        let summary = writer.write_report(&report(), &prices).unwrap();

        assert_eq!(summary.increments, 2);
        assert_eq!(summary.final_capacity_mw, 200.0);
        assert_eq!(summary.remaining_volume.len(), 4);
        for name in [RECORDS_FILE, HISTORY_FILE, INITIAL_PRICES_FILE, SUMMARY_FILE] {
            assert!(writer.dir().join(name).exists(), "{name} missing");
        }

        let mut records = csv::Reader::from_path(writer.dir().join(RECORDS_FILE)).unwrap();
        let rows: Vec<RevenueRecord> = records.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].marginal_net_revenue, 180.0);
        assert_eq!(rows[1].cumulative_net_revenue, 30.0);

        let history = fs::read_to_string(writer.dir().join(HISTORY_FILE)).unwrap();
        assert_eq!(history.lines().count(), 3);
        assert!(history.lines().next().unwrap().starts_with("iteration,capacity_mw,timestep"));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(writer.dir().join(SUMMARY_FILE)).unwrap())
                .unwrap();
        assert_eq!(json["termination"], "max_capacity");
        assert_eq!(json["saturation"]["status"], "not_reached");
    }

    #[test]
    fn test_history_file_skipped_when_empty() {
        let dir = tempdir().unwrap();
        let writer = ResultsWriter::create(dir.path()).unwrap();
        let mut report = report();
        report.history.clear();
        writer
            .write_report(&report, &MarketMap::from_fn(|_| vec![1.0, 2.0]))
            .unwrap();
        assert!(!dir.path().join(HISTORY_FILE).exists());
    }
}
