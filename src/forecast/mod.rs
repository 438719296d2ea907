pub mod extrapolation;
pub mod feedback;

pub use extrapolation::*;
pub use feedback::*;
