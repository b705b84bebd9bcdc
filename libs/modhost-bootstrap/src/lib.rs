pub mod config;
pub mod env;
pub mod logging;
pub mod signals;

pub use config::*;
pub use env::*;
pub use logging::*;
pub use signals::*;
