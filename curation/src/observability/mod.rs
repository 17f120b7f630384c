//! Logging setup and timing.

mod logging;
mod timing;

pub use logging::{init_logging, LogGuard, LoggingOptions};
pub use timing::{RunTimer, TimedUnit};
