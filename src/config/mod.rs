//! Settings management

mod daemon_config;

pub use daemon_config::default_config_path;
pub use daemon_config::{
    BatteryConfig, ConfigError, DaemonConfig, LogLevel, PathsConfig, SamplingConfig, SystemConfig,
};

/// Trait for components that follow configuration changes
pub trait Configurable {
    /// Apply configuration
    fn apply_config(&mut self, config: &DaemonConfig);
}
