//! CSV input loading
//!
//! One row per timestep, matched by header name. Extra columns such as a
//! leading `timestamp` are ignored.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::domain::{MarketMap, MarketState, TradableVolumes};

#[derive(Debug, Deserialize)]
struct PriceRow {
    day_ahead: f64,
    imbalance_shortage: f64,
    imbalance_surplus: f64,
    afrr_up: f64,
    afrr_down: f64,
}

#[derive(Debug, Deserialize)]
struct VolumeRow {
    imbalance_shortage: f64,
    imbalance_surplus: f64,
    afrr_up: f64,
    afrr_down: f64,
}

fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    reader
        .deserialize()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("{}: bad row {}", path.display(), i + 1)))
        .collect()
}

/// Read hourly prices (€/MWh) for all five markets
pub fn load_prices(path: &Path) -> Result<MarketMap<Vec<f64>>> {
    let rows: Vec<PriceRow> = read_rows(path)?;
    let mut prices: MarketMap<Vec<f64>> =
        MarketMap::from_fn(|_| Vec::with_capacity(rows.len()));
    for row in rows {
        prices.day_ahead.push(row.day_ahead);
        prices.imbalance_shortage.push(row.imbalance_shortage);
        prices.imbalance_surplus.push(row.imbalance_surplus);
        prices.afrr_up.push(row.afrr_up);
        prices.afrr_down.push(row.afrr_down);
    }
    info!(path = %path.display(), timesteps = prices.day_ahead.len(), "loaded prices");
    Ok(prices)
}

/// Read hourly tradable volumes of the four volume-limited markets
pub fn load_volumes(path: &Path) -> Result<TradableVolumes> {
    let rows: Vec<VolumeRow> = read_rows(path)?;
    let mut volumes = TradableVolumes::default();
    for row in rows {
        volumes.imbalance_shortage.push(row.imbalance_shortage);
        volumes.imbalance_surplus.push(row.imbalance_surplus);
        volumes.afrr_up.push(row.afrr_up);
        volumes.afrr_down.push(row.afrr_down);
    }
    info!(
        path = %path.display(),
        timesteps = volumes.afrr_up.len(),
        "loaded volumes"
    );
    Ok(volumes)
}

/// Load both inputs and validate them into a market state
pub fn load_market(
    prices: MarketMap<Vec<f64>>,
    volumes_path: &Path,
) -> Result<MarketState> {
    let volumes = load_volumes(volumes_path)?;
    MarketState::new(prices, volumes).context("inconsistent market inputs")
}
