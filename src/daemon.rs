//! Sampling daemon
//!
//! Two loops share one [`BatteryMonitor`]: the sampling loop reads the rails every
//! interval, and the signal loop watches for a config-change file and applies the new
//! battery settings "live". Every access to the monitor goes through one mutex, so a
//! reload can never interleave with a reading cycle.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::battery::{BatteryMonitor, BatteryStatus, WarningLevel, LOW_BATTERY_PERCENT};
use crate::config::{Configurable, DaemonConfig};
use crate::error::{BatteryError, Result};
use crate::events::{publish_or_log, EventPublisher, HatEvent};
use crate::monitor_log;
use crate::readings_log::ReadingsLog;
use crate::source::{read_all, RawReadings, VoltageSource};

/// Raw inputs and resulting status of one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub raw: RawReadings,
    pub status: BatteryStatus,
}

/// Owns the monitor and the collaborators around it
pub struct Daemon {
    config: Mutex<DaemonConfig>,
    config_path: Option<PathBuf>,
    monitor: Mutex<BatteryMonitor>,
    source: Arc<dyn VoltageSource>,
    publisher: Arc<dyn EventPublisher>,
    readings_log: ReadingsLog,
}

impl Daemon {
    /// Build a daemon around an existing monitor
    pub fn new(
        config: DaemonConfig,
        config_path: Option<PathBuf>,
        monitor: BatteryMonitor,
        source: Arc<dyn VoltageSource>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let readings_log = ReadingsLog::new(&config.paths.readings_log);
        Self {
            config: Mutex::new(config),
            config_path,
            monitor: Mutex::new(monitor),
            source,
            publisher,
            readings_log,
        }
    }

    fn lock_monitor(&self) -> Result<MutexGuard<'_, BatteryMonitor>> {
        self.monitor.lock().map_err(|_| BatteryError::LockPoisoned)
    }

    fn lock_config(&self) -> Result<MutexGuard<'_, DaemonConfig>> {
        self.config.lock().map_err(|_| BatteryError::LockPoisoned)
    }

    /// Current configuration
    pub fn config(&self) -> Result<DaemonConfig> {
        Ok(self.lock_config()?.clone())
    }

    /// Run `f` with exclusive access to the monitor
    pub fn with_monitor<T>(&self, f: impl FnOnce(&mut BatteryMonitor) -> T) -> Result<T> {
        let mut monitor = self.lock_monitor()?;
        Ok(f(&mut monitor))
    }

    /// Read the inputs once, process them and append to the voltage log
    pub fn perform_reading(&self) -> Result<CycleReport> {
        let raw = read_all(self.source.as_ref())?;
        let status = self.lock_monitor()?.process_reading(raw.hv, raw.lv, raw.rtc);

        if let Err(e) = self.readings_log.append(status.last_updated, &raw, &status) {
            log::error!("Error logging battery reading: {}", e);
        }
        Ok(CycleReport { raw, status })
    }

    /// Publish events and warnings that `report` calls for
    pub fn handle_report(&self, report: &CycleReport) -> Result<()> {
        let status = &report.status;
        let (report_event, warning) = {
            let mut monitor = self.lock_monitor()?;
            (monitor.should_report_event(status), monitor.depletion_warning_due(status))
        };

        if report_event {
            if let Some(event) = HatEvent::battery(status, report.raw.rtc) {
                publish_or_log(self.publisher.as_ref(), &event);
            }
        }

        if status.is_valid() && (0.0..=LOW_BATTERY_PERCENT).contains(&status.percent) {
            log::warn!(
                "Low battery warning: {:.1}% ({} {}cells)",
                status.percent,
                status.chemistry,
                status.cell_count
            );
        }

        if let (Some(level), Some(estimate)) = (warning, status.depletion_estimate.as_ref()) {
            match level {
                WarningLevel::Critical => log::error!(
                    "Critical battery depletion warning: {:.1} hours remaining ({:.0}% confidence)",
                    estimate.estimated_hours,
                    estimate.confidence
                ),
                _ => log::warn!(
                    "Low battery runtime warning: {:.1} hours remaining ({:.0}% confidence)",
                    estimate.estimated_hours,
                    estimate.confidence
                ),
            }
            if let Some(event) = HatEvent::depletion_warning(status, level) {
                publish_or_log(self.publisher.as_ref(), &event);
            }
        }
        Ok(())
    }

    /// Reload the configuration file and apply it to the monitor
    pub fn reload_config(&self) -> Result<()> {
        let Some(path) = self.config_path.as_ref() else {
            log::debug!("No configuration file to reload");
            return Ok(());
        };
        let config = DaemonConfig::load_from_path(path)?;
        config.validate()?;

        // Config then monitor, the same order everywhere
        let mut current = self.lock_config()?;
        self.lock_monitor()?.apply_config(&config);
        *current = config;
        log::info!("Battery configuration reloaded");
        Ok(())
    }

    /// Consume the config-change signal file if present and reload. Returns true if reloaded.
    pub fn check_config_signal(&self) -> Result<bool> {
        let signal = self.lock_config()?.paths.config_signal.clone();
        if !signal.exists() {
            return Ok(false);
        }

        log::info!("Battery config change signal detected, reloading configuration...");
        match fs::remove_file(&signal) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove signal file: {}", e),
        }

        self.reload_config()?;
        Ok(true)
    }

    /// Truncate the voltage log to its configured size
    pub fn truncate_readings_log(&self) -> Result<usize> {
        let max_lines = self.lock_config()?.sampling.readings_log_max_lines;
        self.readings_log.keep_last_lines(max_lines)
    }

    /// Run both loops until Ctrl-C
    pub async fn run(self: Arc<Self>) -> Result<()> {
        if let Err(e) = self.truncate_readings_log() {
            log::warn!("Could not truncate battery readings file: {}", e);
        }

        let signal_task = tokio::spawn(Arc::clone(&self).signal_loop());

        tokio::select! {
            result = Arc::clone(&self).sampling_loop() => {
                signal_task.abort();
                result
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutdown requested, saving battery state");
                signal_task.abort();
                self.lock_monitor()?.persist_state();
                Ok(())
            }
        }
    }

    async fn signal_loop(self: Arc<Self>) {
        let poll = match self.lock_config() {
            Ok(config) => config.sampling.signal_poll(),
            Err(e) => {
                log::error!("Config signal loop not started: {}", e);
                return;
            }
        };
        let mut ticker = interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.check_config_signal() {
                Ok(true) => match self.perform_reading() {
                    Ok(report) => {
                        monitor_log!(
                            "Immediate reading after config reload",
                            report
                        );
                        if let Err(e) = self.handle_report(&report) {
                            log::error!("Error handling battery status: {}", e);
                        }
                    }
                    Err(e) => log::error!("Error during immediate battery reading after config reload: {}", e),
                },
                Ok(false) => {}
                Err(e) => log::error!("Failed to reload config: {}", e),
            }
        }
    }

    async fn sampling_loop(self: Arc<Self>) -> Result<()> {
        let sampling = self.lock_config()?.sampling.clone();
        let mut ticker = interval(sampling.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_truncate = Instant::now();
        let mut reload_counter: u32 = 0;
        let mut log_counter: u32 = sampling.console_log_cycles;

        loop {
            ticker.tick().await;
            let sampling = self.lock_config()?.sampling.clone();

            if reload_counter >= sampling.config_reload_cycles {
                log::info!("Periodic battery configuration reload...");
                if let Err(e) = self.reload_config() {
                    log::error!("Failed to reload config: {}", e);
                }
                reload_counter = 0;
            }
            reload_counter += 1;

            if !self.lock_config()?.battery.enable_voltage_readings {
                log::debug!("Battery voltage readings disabled");
                continue;
            }

            let report = match self.perform_reading() {
                Ok(report) => report,
                Err(e) => {
                    log::error!("Error during battery reading: {}", e);
                    sleep(sampling.retry_delay()).await;
                    continue;
                }
            };

            if log_counter >= sampling.console_log_cycles {
                monitor_log!("Battery reading", report);
                log_counter = 0;
            }
            log_counter += 1;

            if last_truncate.elapsed() > sampling.truncate_interval() {
                match self.truncate_readings_log() {
                    Ok(_) => last_truncate = Instant::now(),
                    Err(e) => log::warn!("Could not truncate battery readings file: {}", e),
                }
            }

            self.handle_report(&report)?;
        }
    }
}

/// Log a one-line summary of a cycle
#[macro_export]
macro_rules! monitor_log {
    ($prefix:expr, $report:expr) => {{
        let report: &$crate::daemon::CycleReport = &$report;
        match report.status.error.as_deref() {
            Some(error) => log::info!(
                "{}: HV={:.2}, LV={:.2}, RTC={:.2} - Error: {}",
                $prefix,
                report.raw.hv,
                report.raw.lv,
                report.raw.rtc,
                error
            ),
            None => log::info!(
                "{}: HV={:.2}, LV={:.2}, RTC={:.2} - {} {}cells {:.1}% on {} rail",
                $prefix,
                report.raw.hv,
                report.raw.lv,
                report.raw.rtc,
                report.status.chemistry,
                report.status.cell_count,
                report.status.percent,
                report.status.rail
            ),
        }
    }};
}
