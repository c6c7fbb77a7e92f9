pub mod backtest;
pub mod consumption;
pub mod engine;
pub mod metrics;
pub mod model;
pub mod prices;

pub use backtest::*;
pub use consumption::*;
pub use engine::*;
pub use metrics::*;
pub use model::*;
pub use prices::*;
