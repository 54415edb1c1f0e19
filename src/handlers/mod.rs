pub mod classify;
pub mod config;

pub use classify::*;
pub use config::*;
