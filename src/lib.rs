//! Capacity-sweep saturation estimate for grid-scale battery storage trading
//! day-ahead, imbalance and aFRR markets.

pub mod config;
pub mod controller;
pub mod domain;
pub mod forecast;
pub mod optimizer;
pub mod repo;
pub mod telemetry;
