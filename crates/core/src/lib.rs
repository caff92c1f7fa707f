#![forbid(unsafe_code)]

pub mod contribution;
pub mod model;
pub mod time;
pub mod timer;
pub mod week;

pub use contribution::ContributionStats;
pub use time::Clock;
pub use timer::{SessionTimer, TimerStatus, TimerThreshold};
