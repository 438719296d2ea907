use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use validator::Validate;

use crate::controller::SweepSettings;
use crate::domain::{AnnualizedCost, MarketMap, PriceImpactCoefficients, RenewableCoefficients};
use crate::forecast::RenewableShift;
use crate::optimizer::{BatteryParams, SolverBackend};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid configuration: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub sweep: SweepConfig,
    #[validate(nested)]
    pub battery: BatteryConfig,
    #[validate(nested)]
    pub costs: CostConfig,
    #[validate(nested)]
    pub scenario: ScenarioConfig,
    pub coefficients: CoefficientsConfig,
    pub inputs: InputsConfig,
    pub output: OutputConfig,
    pub solver: SolverConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SweepConfig {
    #[validate(range(exclusive_min = 0.0))]
    pub increment_mw: f64,
    #[validate(range(min = 0.0))]
    pub max_capacity_mw: f64,
    #[validate(range(min = 0.0))]
    pub saturation_margin_mw: f64,
    pub keep_history: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            increment_mw: 100.0,
            max_capacity_mw: 15_000.0,
            saturation_margin_mw: 400.0,
            keep_history: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BatteryConfig {
    #[validate(range(exclusive_min = 0.0))]
    pub duration_hours: f64,
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub efficiency: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub soc_min_fraction: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub soc_max_fraction: f64,
    pub reserve_block_hours: usize,
}

impl Default for BatteryConfig {
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

/// Capacity cost assumptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CostConfig {
    /// Investment (€/MW)
    #[validate(range(min = 0.0))]
    pub capex_per_mw: f64,
    /// Fixed operation and maintenance (€/MW/year)
    #[validate(range(min = 0.0))]
    pub opex_per_mw_year: f64,
    #[validate(range(min = 1))]
    pub lifetime_years: u32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub discount_rate: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            capex_per_mw: 1_000_000.0,
            opex_per_mw_year: 32_000.0,
            lifetime_years: 20,
            discount_rate: 0.06,
        }
    }
}

impl CostConfig {
    /// Capital recovery factor `r(1+r)^n / ((1+r)^n - 1)`, or `1/n` at r = 0
    pub fn capital_recovery_factor(&self) -> f64 {
        let n = self.lifetime_years.max(1) as f64;
        let r = self.discount_rate;
        if r == 0.0 {
            return 1.0 / n;
        }
        let growth = (1.0 + r).powf(n);
        r * growth / (growth - 1.0)
    }

    /// Annualized CAPEX plus OPEX per MW of installed capacity
    pub fn annualized_cost_per_mw(&self) -> AnnualizedCost {
        AnnualizedCost {
            capex_per_mw: self.capital_recovery_factor() * self.capex_per_mw,
            opex_per_mw: self.opex_per_mw_year,
        }
    }
}

/// Renewable share today and in the simulated year, as fractions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ScenarioConfig {
    #[validate(range(min = 0.0, max = 1.0))]
    pub current_res_share: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub future_res_share: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            current_res_share: 0.5,
            future_res_share: 0.7,
        }
    }
}

impl ScenarioConfig {
    pub fn shift(&self) -> RenewableShift {
        RenewableShift::new(self.current_res_share, self.future_res_share)
    }
}

/// Regression coefficients, one per market
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoefficientsConfig {
    /// €/MWh price change per MWh of marginal dispatch
    pub price_impact: MarketMap<f64>,
    /// €/MWh price change per percentage point of renewable share
    pub renewable: MarketMap<f64>,
}

impl CoefficientsConfig {
    pub fn price_impact(&self) -> PriceImpactCoefficients {
        self.price_impact.clone()
    }

    pub fn renewable(&self) -> RenewableCoefficients {
        self.renewable.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputsConfig {
    pub prices_csv: PathBuf,
    pub volumes_csv: PathBuf,
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            prices_csv: PathBuf::from("data/prices.csv"),
            volumes_csv: PathBuf::from("data/volumes.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub backend: SolverBackend,
}

impl Config {
    /// Load defaults, then `path`, then `BESS__*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("BESS__").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let cfg: Config = figment.extract().map_err(Box::new)?;
        cfg.validate()?;
        cfg.check_consistency()?;
        Ok(cfg)
    }

    fn check_consistency(&self) -> Result<(), ConfigError> {
        if self.battery.soc_min_fraction >= self.battery.soc_max_fraction {
            return Err(ConfigError::Inconsistent(format!(
                "battery.soc_min_fraction ({}) must be below battery.soc_max_fraction ({})",
                self.battery.soc_min_fraction, self.battery.soc_max_fraction
            )));
        }
        if self.sweep.increment_mw > self.sweep.max_capacity_mw {
            return Err(ConfigError::Inconsistent(format!(
                "sweep.increment_mw ({}) exceeds sweep.max_capacity_mw ({})",
                self.sweep.increment_mw, self.sweep.max_capacity_mw
            )));
        }
        Ok(())
    }

    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            increment_mw: self.sweep.increment_mw,
            max_capacity_mw: self.sweep.max_capacity_mw,
            saturation_margin_mw: self.sweep.saturation_margin_mw,
            keep_history: self.sweep.keep_history,
        }
    }

    pub fn battery_params(&self) -> BatteryParams {
        BatteryParams {
            duration_hours: self.battery.duration_hours,
            efficiency: self.battery.efficiency,
            soc_min_fraction: self.battery.soc_min_fraction,
            soc_max_fraction: self.battery.soc_max_fraction,
            reserve_block_hours: self.battery.reserve_block_hours,
        }
    }
}
