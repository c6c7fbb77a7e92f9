pub mod comparison;
pub mod cost;

pub use comparison::*;
pub use cost::*;
