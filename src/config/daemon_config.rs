use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::battery::chemistry::find_profile;
use crate::battery::detector::ManualSelection;
use crate::logging::DebugFlags;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON for this schema
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds an unusable value
    #[error("Validation failed for {0}: {1}")]
    ValidationFailed(String, String),
}

/// Log level setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Battery engine settings
    pub battery: BatteryConfig,

    /// File locations
    pub paths: PathsConfig,

    /// Loop timing
    pub sampling: SamplingConfig,

    /// Logging
    pub system: SystemConfig,
}

/// Battery engine settings, hot-reloadable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// Read the rails at all
    pub enable_voltage_readings: bool,

    /// Volts below which no detection is attempted
    pub minimum_voltage_detection: f32,

    /// Produce discharge rates and depletion forecasts
    pub enable_depletion_estimate: bool,

    /// Remaining hours below which the forecast warns
    pub depletion_warning_hours: f32,

    /// Hours of discharge history retained
    pub depletion_history_hours: u32,

    /// Use `chemistry` instead of auto-detection
    pub manually_configured: bool,

    /// Chemistry name for manual configuration
    pub chemistry: Option<String>,

    /// Fixed series cell count for manual configuration
    pub cell_count_hint: Option<u32>,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            enable_voltage_readings: true,
            minimum_voltage_detection: 1.0,
            enable_depletion_estimate: true,
            depletion_warning_hours: 12.0,
            depletion_history_hours: 24,
            manually_configured: false,
            chemistry: None,
            cell_count_hint: None,
        }
    }
}

impl BatteryConfig {
    /// Manual chemistry settings for the detector
    pub fn manual_selection(&self) -> ManualSelection {
        ManualSelection {
            enabled: self.manually_configured,
            chemistry: self.chemistry.clone(),
            cell_count_hint: self.cell_count_hint,
        }
    }

    /// Validate the battery section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.minimum_voltage_detection.is_finite() || self.minimum_voltage_detection < 0.0 {
            return Err(ConfigError::ValidationFailed(
                "battery.minimum_voltage_detection".to_string(),
                "must be a non-negative voltage".to_string(),
            ));
        }
        if !self.depletion_warning_hours.is_finite() || self.depletion_warning_hours < 0.0 {
            return Err(ConfigError::ValidationFailed(
                "battery.depletion_warning_hours".to_string(),
                "must not be negative".to_string(),
            ));
        }
        if self.depletion_history_hours == 0 {
            return Err(ConfigError::ValidationFailed(
                "battery.depletion_history_hours".to_string(),
                "must be at least one hour".to_string(),
            ));
        }
        if let Some(name) = self.chemistry.as_deref().filter(|n| !n.trim().is_empty()) {
            if find_profile(name).is_none() {
                return Err(ConfigError::ValidationFailed(
                    "battery.chemistry".to_string(),
                    format!("unknown chemistry '{}'", name),
                ));
            }
        }
        if self.cell_count_hint == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "battery.cell_count_hint".to_string(),
                "must be at least one cell".to_string(),
            ));
        }
        Ok(())
    }
}

/// File locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding `battery_state.json`
    pub state_dir: PathBuf,

    /// Append-only CSV voltage log
    pub readings_log: PathBuf,

    /// JSON-lines event spool; events are only logged when unset
    pub event_spool: Option<PathBuf>,

    /// Presence of this file requests an immediate config reload
    pub config_signal: PathBuf,

    /// File holding the high-voltage rail reading in volts
    pub hv_input: PathBuf,

    /// File holding the low-voltage rail reading in volts
    pub lv_input: PathBuf,

    /// File holding the clock backup cell reading in volts
    pub rtc_input: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/hat-battery"),
            readings_log: PathBuf::from("/var/log/battery-readings.csv"),
            event_spool: None,
            config_signal: PathBuf::from("/tmp/battery-config-changed"),
            hv_input: PathBuf::from("/run/hat/hv_voltage"),
            lv_input: PathBuf::from("/run/hat/lv_voltage"),
            rtc_input: PathBuf::from("/run/hat/rtc_voltage"),
        }
    }
}

/// Loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Seconds between reading cycles
    pub interval_secs: u64,

    /// Seconds between checks for the config signal file
    pub signal_poll_secs: u64,

    /// Seconds to wait after a failed rail read
    pub retry_delay_secs: u64,

    /// Reload configuration every this many cycles
    pub config_reload_cycles: u32,

    /// Lines kept when truncating the voltage log
    pub readings_log_max_lines: usize,

    /// Hours between voltage log truncations
    pub truncate_interval_hours: u64,

    /// Log a reading summary every this many cycles
    pub console_log_cycles: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 120,
            signal_poll_secs: 1,
            retry_delay_secs: 120,
            config_reload_cycles: 30,
            readings_log_max_lines: 20_000,
            truncate_interval_hours: 24,
            console_log_cycles: 5,
        }
    }
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn signal_poll(&self) -> Duration {
        Duration::from_secs(self.signal_poll_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn truncate_interval(&self) -> Duration {
        Duration::from_secs(self.truncate_interval_hours * 3600)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Log level
    pub log_level: LogLevel,

    /// Append log output to this file
    pub log_file: Option<PathBuf>,

    /// Write log output to stderr
    pub console_output: bool,

    /// Debug categories
    pub debug: DebugFlags,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_file: None,
            console_output: true,
            debug: DebugFlags::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from `path`; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)?;
        let config: DaemonConfig = serde_json::from_str(&json)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save to `path`, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.battery.validate()?;

        if self.sampling.interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "sampling.interval_secs".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        if self.sampling.signal_poll_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "sampling.signal_poll_secs".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        if self.sampling.readings_log_max_lines == 0 {
            return Err(ConfigError::ValidationFailed(
                "sampling.readings_log_max_lines".to_string(),
                "must keep at least one line".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default configuration file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|config_dir| config_dir.join("hat-battery").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();

        assert!(config.battery.enable_voltage_readings);
        assert_eq!(config.battery.minimum_voltage_detection, 1.0);
        assert_eq!(config.battery.depletion_warning_hours, 12.0);
        assert_eq!(config.battery.depletion_history_hours, 24);
        assert!(!config.battery.manually_configured);
        assert_eq!(config.sampling.interval(), Duration::from_secs(120));
        assert_eq!(config.system.log_level, LogLevel::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_manual_selection() {
        let battery = BatteryConfig {
            manually_configured: true,
            chemistry: Some("lifepo4".to_string()),
            cell_count_hint: Some(4),
            ..Default::default()
        };
        let manual = battery.manual_selection();
        assert!(manual.is_active());
        assert_eq!(manual.cell_count_hint, Some(4));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = DaemonConfig::default();
        config.battery.chemistry = Some("nimh".to_string());
        match config.validate() {
            Err(ConfigError::ValidationFailed(field, _)) => assert_eq!(field, "battery.chemistry"),
            other => panic!("expected validation failure, got {:?}", other),
        }

        let mut config = DaemonConfig::default();
        config.battery.depletion_history_hours = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(field, _)) if field == "battery.depletion_history_hours"));

        let mut config = DaemonConfig::default();
        config.sampling.interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(field, _)) if field == "sampling.interval_secs"));
    }

    #[test]
    fn test_log_level_serde() {
        assert_eq!(serde_json::to_string(&LogLevel::Debug).unwrap(), "\"debug\"");
        assert_eq!(LogLevel::Warn.to_level_filter(), log::LevelFilter::Warn);
    }
}
