pub mod loader;
pub mod store;

pub use loader::*;
pub use store::*;
