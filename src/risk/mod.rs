pub mod analyser;
pub mod score;
pub mod signals;

pub use analyser::*;
pub use score::*;
pub use signals::*;
