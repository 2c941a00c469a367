mod calendar;
mod code;
mod config;
mod level;
mod reason;

pub use calendar::*;
pub use code::*;
pub use config::*;
pub use level::*;
pub use reason::*;

/// A signed amount of points. Balances are never negative, deltas may be.
pub type Points = i64;
