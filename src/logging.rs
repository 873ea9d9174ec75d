//! Structured logging for the hat battery daemon
//!
//! A process-wide logger with plain file output, coloured stderr output and selective
//! debug categories so that a single noisy subsystem can be traced on its own.

use chrono::Local;
use log::Level;
use log::{LevelFilter, Metadata, Record};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::{Once, RwLock};

use crate::config::LogLevel;

/// Timestamp format for log entries
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Global initialization guard
static INIT_LOGGER: Once = Once::new();

/// Debug flag categories for selective logging
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugFlags {
    pub rail: bool,        // Rail activity scores and switching
    pub chemistry: bool,   // Chemistry detection, voltage range, percent curves
    pub discharge: bool,   // Discharge history, rates, smoothing, forecasts
    pub persistence: bool, // State file, voltage log, bootstrap, config files
    pub daemon: bool,      // Sampling loop, sources, events, monitor
    pub all: bool,         // Enable all debug output
}

/// A debug category, for [`debug_log!`](crate::debug_log)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCategory {
    Rail,
    Chemistry,
    Discharge,
    Persistence,
    Daemon,
}

/// Global debug flags storage
static DEBUG_FLAGS: RwLock<DebugFlags> = RwLock::new(DebugFlags {
    rail: false,
    chemistry: false,
    discharge: false,
    persistence: false,
    daemon: false,
    all: false,
});

/// Logger installed for the daemon process
pub struct HatLogger {
    /// File output for logs
    file: Option<Mutex<File>>,
    /// Log level filter
    level: LevelFilter,
    /// Whether to output to stderr
    console_output: bool,
}

impl log::Log for HatLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if metadata.level() > self.level {
            return false;
        }

        // Debug output is further gated by category
        if metadata.level() == Level::Debug {
            return should_log_debug(metadata.target());
        }

        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now().format(TIMESTAMP_FORMAT);

        let level_str = match record.level() {
            Level::Error => "\x1B[31mERROR\x1B[0m", // Red
            Level::Warn => "\x1B[33mWARN \x1B[0m",  // Yellow
            Level::Info => "\x1B[32mINFO \x1B[0m",  // Green
            Level::Debug => "\x1B[36mDEBUG\x1B[0m", // Cyan
            Level::Trace => "\x1B[90mTRACE\x1B[0m", // Gray
        };

        let module = record.module_path().unwrap_or("<unknown>");
        let file_info = format!(
            "{}:{}",
            record.file().unwrap_or("<unknown>"),
            record.line().unwrap_or(0)
        );

        if self.console_output {
            let console_entry = format!(
                "[{}] {} [{}] [{}] {}\n",
                timestamp,
                level_str,
                module,
                file_info,
                record.args()
            );
            let _ = io::stderr().write_all(console_entry.as_bytes());
        }

        if let Some(file) = &self.file {
            let file_entry = format!(
                "[{}] {} [{}] [{}] {}\n",
                timestamp,
                record.level(),
                module,
                file_info,
                record.args()
            );
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(file_entry.as_bytes());
                let _ = file.flush();
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }
}

/// Configure logging with the specified level and optionally a log file
pub fn configure_logging(
    level: LogLevel,
    log_file: Option<PathBuf>,
    console_output: bool,
) -> Result<(), String> {
    let mut result = Ok(());

    INIT_LOGGER.call_once(|| {
        let level_filter = level.to_level_filter();

        let file = if let Some(path) = log_file.clone() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        result = Err(format!("Failed to create log directory: {}", e));
                        return;
                    }
                }
            }

            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => Some(Mutex::new(file)),
                Err(e) => {
                    result = Err(format!("Failed to open log file: {}", e));
                    return;
                }
            }
        } else {
            None
        };

        let logger = Box::new(HatLogger {
            file,
            level: level_filter,
            console_output,
        });

        if let Err(e) = log::set_boxed_logger(logger) {
            result = Err(format!("Failed to set logger: {}", e));
            return;
        }

        log::set_max_level(level_filter);

        log::info!("Logging initialized at level: {}", level);
        if let Some(path) = log_file {
            log::info!("Log file: {}", path.display());
        }
    });

    result
}

/// Set global debug flags for selective logging
pub fn set_debug_flags(flags: DebugFlags) {
    if let Ok(mut debug_flags) = DEBUG_FLAGS.write() {
        *debug_flags = flags;
    }
}

/// Whether a debug category is switched on
pub fn category_enabled(category: DebugCategory) -> bool {
    match DEBUG_FLAGS.read() {
        Ok(flags) => {
            flags.all
                || match category {
                    DebugCategory::Rail => flags.rail,
                    DebugCategory::Chemistry => flags.chemistry,
                    DebugCategory::Discharge => flags.discharge,
                    DebugCategory::Persistence => flags.persistence,
                    DebugCategory::Daemon => flags.daemon,
                }
        }
        Err(_) => false,
    }
}

/// Map a module path onto its debug category
pub fn category_for_module(module_path: &str) -> Option<DebugCategory> {
    if module_path.contains("::rail") {
        return Some(DebugCategory::Rail);
    }
    if module_path.contains("::detector") || module_path.contains("::chemistry") {
        return Some(DebugCategory::Chemistry);
    }
    if module_path.contains("::discharge")
        || module_path.contains("::smoothing")
        || module_path.contains("::strategy")
        || module_path.contains("::depletion")
        || module_path.contains("::history")
    {
        return Some(DebugCategory::Discharge);
    }
    if module_path.contains("::persistence")
        || module_path.contains("::bootstrap")
        || module_path.contains("::readings_log")
        || module_path.contains("::config")
    {
        return Some(DebugCategory::Persistence);
    }
    if module_path.contains("::daemon")
        || module_path.contains("::monitor")
        || module_path.contains("::source")
        || module_path.contains("::events")
    {
        return Some(DebugCategory::Daemon);
    }
    None
}

/// Check if a debug message from `module_path` should be logged
pub fn should_log_debug(module_path: &str) -> bool {
    match category_for_module(module_path) {
        Some(category) => category_enabled(category),
        None => DEBUG_FLAGS.read().map(|flags| flags.all).unwrap_or(false),
    }
}

/// Conditional debug logging macro that respects debug flags
#[macro_export]
macro_rules! debug_log {
    ($category:expr, $($arg:tt)*) => {
        if $crate::logging::category_enabled($category) {
            log::debug!($($arg)*);
        }
    };
}

/// Helper for performance logging
pub struct PerformanceLogger {
    /// Operation being timed
    operation: String,
    /// Component performing the operation
    component: String,
    /// Start time
    start_time: std::time::Instant,
}

impl PerformanceLogger {
    /// Create a new performance logger
    pub fn new<S: Into<String>>(component: S, operation: S) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            start_time: std::time::Instant::now(),
        }
    }

    /// Time elapsed so far
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Finish timing with additional context
    pub fn finish_with_context(self, context: &str) {
        let duration = self.start_time.elapsed();
        log::debug!(
            "[{}::{}] Operation '{}' completed in {:?}",
            self.component,
            self.operation,
            context,
            duration
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            category_for_module("hat_battery::battery::rail"),
            Some(DebugCategory::Rail)
        );
        assert_eq!(
            category_for_module("hat_battery::battery::detector"),
            Some(DebugCategory::Chemistry)
        );
        assert_eq!(
            category_for_module("hat_battery::battery::smoothing"),
            Some(DebugCategory::Discharge)
        );
        assert_eq!(
            category_for_module("hat_battery::battery::bootstrap"),
            Some(DebugCategory::Persistence)
        );
        assert_eq!(
            category_for_module("hat_battery::daemon"),
            Some(DebugCategory::Daemon)
        );
        assert_eq!(category_for_module("tokio::runtime"), None);
    }

    #[test]
    fn test_debug_flags_deserialize_partial() {
        let flags: DebugFlags = serde_json::from_str(r#"{"rail": true}"#).unwrap();
        assert!(flags.rail);
        assert!(!flags.all);
    }

    #[test]
    fn test_performance_logger() {
        let perf = PerformanceLogger::new("Test", "performance_logging");
        assert!(perf.elapsed() < std::time::Duration::from_secs(60));
        perf.finish_with_context("with extra info");
    }
}
