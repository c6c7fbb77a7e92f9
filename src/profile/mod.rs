pub mod meter;
pub mod reference;
pub mod shaper;

pub use meter::*;
pub use reference::*;
pub use shaper::*;
