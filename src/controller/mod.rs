pub mod saturation;
pub mod sweep;

pub use saturation::*;
pub use sweep::*;
