//! Battery monitor
//!
//! [`BatteryMonitor::process_reading`] is the single entry point per sampling cycle. It
//! picks the live rail, makes sure a pack is known, converts voltage to charge, feeds the
//! discharge tracker and forecasts depletion. State that must survive a restart is
//! written through the [`StateStore`] whenever something significant changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::bootstrap::{BootstrapOutcome, CsvBootstrapper};
use super::chemistry::{find_profile, BatteryPack};
use super::depletion::{ConfidenceInputs, DepletionEstimator, WarningLevel};
use super::detector::{ChemistryDetector, DetectionOutcome, DetectionState, VoltageRange};
use super::discharge::{is_charge_event, DischargeSample, DischargeTracker, RecordOutcome};
use super::persistence::{PersistedState, StateStore};
use super::rail::{Rail, RailSelector};
use super::smoothing::{RateSmoother, SmoothingState};
use super::status::BatteryStatus;
use super::strategy::{default_strategies, select_rate, RateContext, RateEstimationStrategy};
use crate::clock::{hours_between, Clock, SystemClock};
use crate::config::{BatteryConfig, Configurable, DaemonConfig};
use crate::debug_log;
use crate::error::Result;
use crate::logging::{DebugCategory, PerformanceLogger};

/// Percent movement that triggers a new battery event
pub const PERCENT_REPORT_THRESHOLD: f32 = 5.0;

/// At or below this charge a low-battery warning is logged every cycle
pub const LOW_BATTERY_PERCENT: f32 = 10.0;

/// Stored detections older than this are ignored on startup
const DETECTION_MAX_AGE_HOURS: i64 = 24;

/// Percent movement since the last save that triggers another save
const PERSIST_PERCENT_CHANGE: f32 = 1.0;

/// Longest gap between saves while readings arrive
const PERSIST_MAX_INTERVAL_MINUTES: i64 = 30;

const CRITICAL_WARNING_INTERVAL_HOURS: i64 = 1;
const LOW_WARNING_INTERVAL_HOURS: i64 = 6;

/// Stateful battery engine
pub struct BatteryMonitor {
    config: BatteryConfig,
    clock: Arc<dyn Clock>,
    store: StateStore,
    bootstrapper: CsvBootstrapper,

    rails: RailSelector,
    detector: ChemistryDetector,

    tracker: DischargeTracker,
    smoother: RateSmoother,
    strategies: Vec<Box<dyn RateEstimationStrategy>>,
    estimator: DepletionEstimator,

    last_valid: Option<BatteryStatus>,
    last_reported_percent: Option<f32>,
    last_reported_pack: Option<(String, u32)>,
    last_critical_warning: Option<DateTime<Utc>>,
    last_low_warning: Option<DateTime<Utc>>,
    last_saved_at: Option<DateTime<Utc>>,
    last_saved_percent: Option<f32>,
    rtc_voltage: f32,
    /// Never write the state file
    read_only: bool,
}

impl BatteryMonitor {
    /// Monitor on the system clock
    pub fn new(config: BatteryConfig, state_dir: impl AsRef<Path>, readings_log: impl Into<PathBuf>) -> Self {
        Self::with_clock(config, state_dir, readings_log, Arc::new(SystemClock))
    }

    /// Monitor on the system clock that restores stored state but never saves it
    pub fn read_only(config: BatteryConfig, state_dir: impl AsRef<Path>, readings_log: impl Into<PathBuf>) -> Self {
        Self::build(config, state_dir, readings_log, Arc::new(SystemClock), true)
    }

    /// Monitor with an explicit clock.
    ///
    /// Restores persisted state, bootstraps history from the voltage log when needed and,
    /// with no pack known and no manual configuration, tries detection from the log.
    pub fn with_clock(
        config: BatteryConfig,
        state_dir: impl AsRef<Path>,
        readings_log: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::build(config, state_dir, readings_log, clock, false)
    }

    fn build(
        config: BatteryConfig,
        state_dir: impl AsRef<Path>,
        readings_log: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
        read_only: bool,
    ) -> Self {
        let mut monitor = Self {
            detector: ChemistryDetector::new(config.manual_selection()),
            tracker: DischargeTracker::new(config.depletion_history_hours),
            estimator: DepletionEstimator::new(config.depletion_warning_hours),
            config,
            clock,
            store: StateStore::new(state_dir),
            bootstrapper: CsvBootstrapper::new(readings_log),
            rails: RailSelector::new(),
            smoother: RateSmoother::default(),
            strategies: default_strategies(),
            last_valid: None,
            last_reported_percent: None,
            last_reported_pack: None,
            last_critical_warning: None,
            last_low_warning: None,
            last_saved_at: None,
            last_saved_percent: None,
            rtc_voltage: 0.0,
            read_only,
        };

        if let Err(e) = monitor.load_persistent_state() {
            log::warn!("Could not load persistent battery state: {}", e);
        }

        if monitor.detector.is_manual() {
            log::info!(
                "Manual battery chemistry configured: {}",
                monitor.config.chemistry.as_deref().unwrap_or_default()
            );
        } else if monitor.detector.pack().is_none() {
            match monitor.detect_from_log() {
                Ok(true) => monitor.persist_state(),
                Ok(false) => log::info!("Will perform auto-detection after collecting voltage readings"),
                Err(e) => log::info!("Log-based detection not available: {}", e),
            }
        }

        monitor
    }

    /// Turn one set of raw voltages into a status
    pub fn process_reading(&mut self, hv: f32, lv: f32, rtc: f32) -> BatteryStatus {
        let perf = PerformanceLogger::new("BatteryMonitor", "process_reading");
        let now = self.clock.now();
        self.rtc_voltage = rtc;

        let (voltage, rail) = self.rails.select(hv, lv, now);

        if voltage < self.config.minimum_voltage_detection {
            return BatteryStatus::failed(
                voltage,
                rail,
                now,
                format!("voltage {:.2}V below detection threshold", voltage),
                self.last_valid.as_ref(),
            );
        }

        let outcome = match self.detector.ensure_pack(voltage) {
            Ok(outcome) => outcome,
            Err(e) => {
                return BatteryStatus::failed(voltage, rail, now, e.to_string(), self.last_valid.as_ref());
            }
        };

        let mut state_changed = false;
        match outcome {
            DetectionOutcome::Changed { previous, current } => {
                log::info!("Battery changed from {} to {}", previous, current);
                self.tracker.clear("battery type changed");
                self.smoother.reset();
                state_changed = true;
            }
            DetectionOutcome::Detected(_) => state_changed = true,
            DetectionOutcome::Unchanged(_) => {}
        }

        let pack = outcome.pack();
        let percent = pack.voltage_to_percent(voltage);
        let mut status = BatteryStatus::valid(voltage, percent, &pack, rail, now);

        if self.config.enable_depletion_estimate {
            state_changed |= self.update_depletion(&mut status, &pack, now);
        }

        if let Some(last) = &self.last_valid {
            status.charging_detected =
                is_charge_event(last.voltage, last.percent, voltage, percent, Some(&pack));
        }

        self.last_valid = Some(status.clone());
        if state_changed || self.persist_due(percent, now) {
            self.persist_state();
        }

        perf.finish_with_context(rail.as_str());
        status
    }

    /// Record the sample, then pick a rate and forecast. Returns true on a charge event.
    fn update_depletion(&mut self, status: &mut BatteryStatus, pack: &BatteryPack, now: DateTime<Utc>) -> bool {
        let sample = DischargeSample {
            timestamp: now,
            voltage: status.voltage,
            percent: status.percent,
        };
        if self.tracker.record(sample, Some(pack)) == RecordOutcome::ChargeDetected {
            self.smoother.reset();
            return true;
        }

        if self.tracker.len() >= 2 {
            self.tracker.update_statistics(now);
            if let Some((raw, window)) = self.tracker.preferred_window_rate(now) {
                debug_log!(
                    DebugCategory::Daemon,
                    "Raw discharge rate {:.3}%/hour over {} minutes",
                    raw,
                    window.num_minutes()
                );
                self.smoother.push(raw);
            }
        }

        let ctx = RateContext {
            now,
            tracker: &self.tracker,
            smoother: &self.smoother,
            pack: Some(pack),
        };
        let Some(selection) = select_rate(&self.strategies, &ctx) else {
            log::info!(
                "No valid discharge rate available (history entries: {})",
                self.tracker.len()
            );
            return false;
        };
        status.discharge_rate_per_hour = selection.rate;

        if self.tracker.len() > 1 {
            let inputs = self.confidence_inputs(now);
            status.depletion_estimate = self.estimator.estimate(
                status.percent,
                selection,
                now,
                self.smoother.hysteresis(),
                &inputs,
            );
            if let Some(estimate) = &status.depletion_estimate {
                self.tracker.statistics_mut().confidence = estimate.confidence;
            }
        }
        false
    }

    fn confidence_inputs(&self, now: DateTime<Utc>) -> ConfidenceInputs {
        let stats = self.tracker.statistics();
        ConfidenceInputs {
            history_age_hours: self
                .tracker
                .oldest()
                .map(|sample| hours_between(sample.timestamp, now)),
            short_term_rate: stats.short_term_rate,
            medium_term_rate: stats.medium_term_rate,
            pack_known: self.detector.pack().is_some(),
            manual: self.detector.is_manual(),
            range_readings: self.detector.range().readings,
        }
    }

    /// Whether a battery event should go out for `status`.
    ///
    /// True for the first valid status, after the percent moved by at least
    /// [`PERCENT_REPORT_THRESHOLD`] since the last report, or when the pack changed.
    pub fn should_report_event(&mut self, status: &BatteryStatus) -> bool {
        if !status.is_valid() {
            return false;
        }

        let pack_key = (status.chemistry.clone(), status.cell_count);
        let percent_moved = self
            .last_reported_percent
            .map(|last| (status.percent - last).abs() >= PERCENT_REPORT_THRESHOLD)
            .unwrap_or(true);
        let pack_changed = self
            .last_reported_pack
            .as_ref()
            .map(|last| *last != pack_key)
            .unwrap_or(false);

        if percent_moved || pack_changed {
            self.last_reported_percent = Some(status.percent);
            self.last_reported_pack = Some(pack_key);
            return true;
        }
        false
    }

    /// Warning level to announce for `status`, rate-limited per level
    pub fn depletion_warning_due(&mut self, status: &BatteryStatus) -> Option<WarningLevel> {
        let estimate = status
            .depletion_estimate
            .as_ref()
            .filter(|estimate| estimate.estimated_hours > 0.0)?;
        let now = self.clock.now();

        let (last, interval) = match estimate.warning_level {
            WarningLevel::Critical => (
                &mut self.last_critical_warning,
                Duration::hours(CRITICAL_WARNING_INTERVAL_HOURS),
            ),
            WarningLevel::Low => (
                &mut self.last_low_warning,
                Duration::hours(LOW_WARNING_INTERVAL_HOURS),
            ),
            WarningLevel::Normal => return None,
        };

        if last.map(|at| now - at < interval).unwrap_or(false) {
            return None;
        }
        *last = Some(now);
        Some(estimate.warning_level)
    }

    /// Apply a new battery configuration
    pub fn apply_battery_config(&mut self, config: BatteryConfig) {
        if self.detector.apply_manual(config.manual_selection()) {
            if self.detector.is_manual() {
                log::info!(
                    "Manual chemistry {} configured - will determine cell count on next reading",
                    config.chemistry.as_deref().unwrap_or_default()
                );
            } else {
                log::info!("Switched to auto-detection mode");
                self.reset_detection();
            }
            self.tracker.clear("battery configuration changed");
            self.smoother.reset();
        }
        self.tracker.set_max_history_hours(config.depletion_history_hours);
        self.estimator.set_warning_hours(config.depletion_warning_hours);
        self.config = config;
    }

    /// Forget the pack, the voltage envelope and the rail choice
    pub fn reset_detection(&mut self) {
        self.detector.reset();
        self.rails.reset();
    }

    fn load_persistent_state(&mut self) -> Result<()> {
        let Some(state) = self.store.load_state()? else {
            return Ok(());
        };
        let now = self.clock.now();

        if state.observed_min_voltage > 0.0 && state.observed_max_voltage > 0.0 {
            self.detector.restore_range(VoltageRange {
                min: state.observed_min_voltage,
                max: state.observed_max_voltage,
                readings: state.voltage_range_readings,
            });
        }

        if let Some(rail) = state.active_rail {
            self.rails.restore(rail);
        }

        self.smoother.restore(SmoothingState {
            smoothed_discharge_rate: state.smoothed_discharge_rate,
            discharge_rate_window: state.discharge_rate_window.iter().copied().collect(),
        });

        let detection_fresh = state.detection_is_fresh(now, Duration::hours(DETECTION_MAX_AGE_HOURS));
        let chemistry = state.detected_chemistry.clone();
        let cell_count = state.detected_cell_count;
        self.tracker.restore(
            state.discharge_history,
            state.discharge_stats,
            state.last_charge_event,
            state.historical_averages,
            now,
        );

        if !self.detector.is_manual() && detection_fresh {
            match find_profile(&chemistry) {
                Some(profile) => {
                    let pack = BatteryPack::new(profile, cell_count);
                    if self.detector.restore_pack(pack) {
                        log::info!("Restored battery pack from state: {}", pack);
                    }
                }
                None => log::warn!("Stored chemistry '{}' is not known, ignoring", chemistry),
            }
        }

        self.bootstrap_if_needed();
        Ok(())
    }

    /// Replace sparse or stale history from the voltage log. Returns true if history was loaded.
    pub fn bootstrap_if_needed(&mut self) -> bool {
        let Some(pack) = self.detector.pack().copied() else {
            log::debug!("Cannot bootstrap discharge history: no battery pack detected yet");
            return false;
        };
        let now = self.clock.now();
        let newest = self.tracker.newest().map(|sample| sample.timestamp);
        if !CsvBootstrapper::needs_bootstrap(self.tracker.len(), newest, now) {
            return false;
        }

        let rail = self.rails.active_rail().unwrap_or_default();
        match self.bootstrapper.bootstrap(&pack, rail, now) {
            Ok(BootstrapOutcome::Loaded(entries)) => {
                self.tracker.replace_history(entries);
                true
            }
            Ok(BootstrapOutcome::Abandoned(reason)) => {
                log::info!("Voltage log bootstrap abandoned: {}", reason);
                false
            }
            Err(e) => {
                log::warn!("Voltage log bootstrap failed: {}", e);
                false
            }
        }
    }

    /// Detect the pack from the last hours of the voltage log
    fn detect_from_log(&mut self) -> Result<bool> {
        let now = self.clock.now();
        let rail = self.rails.active_rail().unwrap_or_default();
        let Some(voltages) = self.bootstrapper.recent_voltages(rail, now)? else {
            return Ok(false);
        };

        let pack = self.detector.seed_from_log(&voltages)?;
        log::info!(
            "Log-based auto-detection: {} based on {} readings",
            pack,
            voltages.len()
        );
        self.bootstrap_if_needed();
        Ok(true)
    }

    fn persist_due(&self, percent: f32, now: DateTime<Utc>) -> bool {
        match (self.last_saved_at, self.last_saved_percent) {
            (Some(at), Some(saved)) => {
                (percent - saved).abs() >= PERSIST_PERCENT_CHANGE
                    || now - at >= Duration::minutes(PERSIST_MAX_INTERVAL_MINUTES)
            }
            _ => true,
        }
    }

    /// Durable snapshot of the current state
    pub fn snapshot(&self) -> PersistedState {
        let pack = self.detector.pack();
        let range = self.detector.range();
        let smoothing = self.smoother.state();
        PersistedState {
            detected_chemistry: pack.map(|p| p.chemistry().to_string()).unwrap_or_default(),
            detected_cell_count: pack.map(|p| p.cell_count).unwrap_or(0),
            observed_min_voltage: range.min,
            observed_max_voltage: range.max,
            voltage_range_readings: range.readings,
            active_rail: self.rails.active_rail(),
            last_updated: self.clock.now(),
            discharge_history: self.tracker.samples().copied().collect(),
            discharge_stats: self.tracker.statistics().clone(),
            last_charge_event: self.tracker.last_charge_event(),
            historical_averages: self.tracker.historical_averages().clone(),
            smoothed_discharge_rate: smoothing.smoothed_discharge_rate,
            discharge_rate_window: smoothing.discharge_rate_window.iter().copied().collect(),
        }
    }

    /// Write the snapshot; failures are logged
    pub fn persist_state(&mut self) {
        if self.read_only {
            return;
        }
        self.store.save_or_log(&self.snapshot());
        self.last_saved_at = Some(self.clock.now());
        self.last_saved_percent = self.last_valid.as_ref().map(|status| status.percent);
    }

    pub fn config(&self) -> &BatteryConfig {
        &self.config
    }

    pub fn pack(&self) -> Option<&BatteryPack> {
        self.detector.pack()
    }

    pub fn detection_state(&self) -> &DetectionState {
        self.detector.state()
    }

    pub fn voltage_range(&self) -> &VoltageRange {
        self.detector.range()
    }

    pub fn active_rail(&self) -> Option<Rail> {
        self.rails.active_rail()
    }

    pub fn rtc_voltage(&self) -> f32 {
        self.rtc_voltage
    }

    pub fn last_valid_status(&self) -> Option<&BatteryStatus> {
        self.last_valid.as_ref()
    }

    pub fn discharge_tracker(&self) -> &DischargeTracker {
        &self.tracker
    }

    pub fn smoother(&self) -> &RateSmoother {
        &self.smoother
    }

    pub fn state_store(&self) -> &StateStore {
        &self.store
    }
}

impl Configurable for BatteryMonitor {
    fn apply_config(&mut self, config: &DaemonConfig) {
        self.apply_battery_config(config.battery.clone());
    }
}
