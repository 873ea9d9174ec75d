// Root module exports
pub mod battery;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod error;
pub mod events;
pub mod logging;
pub mod readings_log;
pub mod source;

// Re-exports for convenience
pub use battery::{BatteryMonitor, BatteryPack, BatteryStatus, DepletionEstimate, Rail, WarningLevel};
pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use error::{BatteryError, Result};
pub use logging::configure_logging;
