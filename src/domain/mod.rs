pub mod risk;
pub mod tariff;
pub mod types;

pub use risk::*;
pub use tariff::*;
pub use types::*;
