//! Dispatch strategies
//!
//! - LP: linear program over all channels and timesteps (exact for the relaxed model)

pub mod lp;

pub use lp::*;
