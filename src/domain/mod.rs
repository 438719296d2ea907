pub mod market_state;
pub mod revenue;
pub mod schedule;
pub mod types;

pub use market_state::*;
pub use revenue::*;
pub use schedule::*;
pub use types::*;
