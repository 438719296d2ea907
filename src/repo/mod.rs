pub mod inputs;
pub mod results;

pub use inputs::*;
pub use results::*;
