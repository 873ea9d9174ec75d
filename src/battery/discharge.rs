//! Discharge history and rate calculation
//!
//! Samples are appended once per valid reading. A charge or battery swap
//! invalidates every rate derived from earlier samples, so the history is cleared
//! whenever consecutive samples jump upwards.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::chemistry::BatteryPack;
use crate::clock::hours_between;
use crate::error::RateError;

/// Voltage rise between consecutive samples treated as charging
pub const CHARGE_VOLTAGE_JUMP: f32 = 0.5;

/// Percent rise between consecutive samples treated as charging
pub const CHARGE_PERCENT_JUMP: f32 = 5.0;

/// Smallest percent drop a window rate is computed from
pub const MIN_PERCENT_CHANGE: f32 = 0.2;

/// Shortest elapsed time a window rate is computed over (hours)
pub const MIN_WINDOW_HOURS: f64 = 0.01;

/// Outlier cap applied before a raw rate enters smoothing or statistics (%/hour)
pub const MAX_DISCHARGE_RATE: f32 = 5.0;

/// Rolling-window lengths for statistics
pub const SHORT_TERM_WINDOW_MINUTES: i64 = 30;
pub const MEDIUM_TERM_WINDOW_HOURS: i64 = 6;
pub const LONG_TERM_WINDOW_HOURS: i64 = 24;

/// Weights of the short, medium and long term rates in the average
const STAT_WEIGHTS: (f32, f32, f32) = (0.5, 0.3, 0.2);

/// Share of the old value kept when folding a new historical average
const HISTORICAL_BLEND_OLD: f32 = 0.7;

/// One valid reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DischargeSample {
    pub timestamp: DateTime<Utc>,
    pub voltage: f32,
    pub percent: f32,
}

/// Rates over fixed windows, recomputed every cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DischargeStatistics {
    /// %/hour over 30 minutes
    pub short_term_rate: f32,
    /// %/hour over 6 hours
    pub medium_term_rate: f32,
    /// %/hour over 24 hours
    pub long_term_rate: f32,
    /// Weighted average of the available windows
    pub average_rate: f32,
    /// Confidence of the last estimate (0-100)
    pub confidence: f32,
    /// History entries at the last update
    pub data_points: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Result of recording a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Sample appended to the history
    Appended,
    /// Charge or swap detected; history was cleared and the sample dropped
    ChargeDetected,
}

/// Whether moving from `previous` to the current reading looks like a charge or swap
pub fn is_charge_event(
    previous_voltage: f32,
    previous_percent: f32,
    voltage: f32,
    percent: f32,
    pack: Option<&BatteryPack>,
) -> bool {
    if voltage > previous_voltage + CHARGE_VOLTAGE_JUMP {
        log::debug!(
            "Charge signature: voltage increased by {:.2}V",
            voltage - previous_voltage
        );
        return true;
    }

    if percent > previous_percent + CHARGE_PERCENT_JUMP {
        log::debug!(
            "Charge signature: percentage increased by {:.1}%",
            percent - previous_percent
        );
        return true;
    }

    if let Some(pack) = pack {
        let near_full = pack.scaled_max_voltage() - 0.5;
        if voltage >= near_full && previous_voltage < near_full - 1.0 {
            log::debug!("Charge signature: voltage jumped to near max ({:.2}V)", voltage);
            return true;
        }
    }

    false
}

/// Bounded discharge history plus the statistics derived from it
#[derive(Debug, Clone)]
pub struct DischargeTracker {
    history: VecDeque<DischargeSample>,
    max_history_hours: u32,
    stats: DischargeStatistics,
    last_charge_event: Option<DateTime<Utc>>,
    /// Long-run average rate per pack, keyed by [`BatteryPack::history_key`]
    historical_averages: HashMap<String, f32>,
}

impl DischargeTracker {
    pub fn new(max_history_hours: u32) -> Self {
        Self {
            history: VecDeque::new(),
            max_history_hours: max_history_hours.max(1),
            stats: DischargeStatistics::default(),
            last_charge_event: None,
            historical_averages: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Samples oldest first
    pub fn samples(&self) -> impl Iterator<Item = &DischargeSample> {
        self.history.iter()
    }

    pub fn oldest(&self) -> Option<&DischargeSample> {
        self.history.front()
    }

    pub fn newest(&self) -> Option<&DischargeSample> {
        self.history.back()
    }

    pub fn statistics(&self) -> &DischargeStatistics {
        &self.stats
    }

    pub fn statistics_mut(&mut self) -> &mut DischargeStatistics {
        &mut self.stats
    }

    pub fn last_charge_event(&self) -> Option<DateTime<Utc>> {
        self.last_charge_event
    }

    pub fn historical_averages(&self) -> &HashMap<String, f32> {
        &self.historical_averages
    }

    pub fn historical_average(&self, key: &str) -> Option<f32> {
        self.historical_averages.get(key).copied().filter(|rate| *rate > 0.0)
    }

    pub fn max_history_hours(&self) -> u32 {
        self.max_history_hours
    }

    pub fn set_max_history_hours(&mut self, hours: u32) {
        self.max_history_hours = hours.max(1);
    }

    /// Replace the whole history and derived state, as when restoring a snapshot.
    ///
    /// Samples older than the history window at `now` are dropped.
    pub fn restore(
        &mut self,
        mut history: Vec<DischargeSample>,
        stats: DischargeStatistics,
        last_charge_event: Option<DateTime<Utc>>,
        historical_averages: HashMap<String, f32>,
        now: DateTime<Utc>,
    ) {
        history.sort_by_key(|sample| sample.timestamp);
        self.history = history.into();
        self.stats = stats;
        self.last_charge_event = last_charge_event;
        self.historical_averages = historical_averages;
        self.trim(now);
    }

    /// Replace only the samples, keeping statistics and averages
    pub fn replace_history(&mut self, mut history: Vec<DischargeSample>) {
        history.sort_by_key(|sample| sample.timestamp);
        self.history = history.into();
    }

    /// Drop samples and statistics
    pub fn clear(&mut self, reason: &str) {
        log::info!("Clearing discharge history: {}", reason);
        self.history.clear();
        self.stats = DischargeStatistics::default();
    }

    /// Record a valid reading, or clear the history if it looks like a charge.
    ///
    /// On a charge the previous average rate is folded into the per-pack historical
    /// averages before it is lost.
    pub fn record(&mut self, sample: DischargeSample, pack: Option<&BatteryPack>) -> RecordOutcome {
        if let Some(last) = self.history.back() {
            if is_charge_event(last.voltage, last.percent, sample.voltage, sample.percent, pack) {
                log::info!(
                    "Charging event detected: {:.2}V -> {:.2}V, {:.1}% -> {:.1}%",
                    last.voltage,
                    sample.voltage,
                    last.percent,
                    sample.percent
                );
                if let Some(pack) = pack {
                    self.fold_historical_average(&pack.history_key());
                }
                self.last_charge_event = Some(sample.timestamp);
                self.clear("charging event");
                return RecordOutcome::ChargeDetected;
            }
        }

        self.history.push_back(sample);
        self.trim(sample.timestamp);
        RecordOutcome::Appended
    }

    fn fold_historical_average(&mut self, key: &str) {
        let rate = self.stats.average_rate;
        if rate <= 0.0 {
            return;
        }
        let blended = match self.historical_averages.get(key) {
            Some(old) if *old > 0.0 => old * HISTORICAL_BLEND_OLD + rate * (1.0 - HISTORICAL_BLEND_OLD),
            _ => rate,
        };
        log::debug!("Historical discharge average for {} is now {:.3}%/hour", key, blended);
        self.historical_averages.insert(key.to_string(), blended);
    }

    /// Drop the prefix older than the retention window
    fn trim(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(i64::from(self.max_history_hours));
        let keep_from = self
            .history
            .iter()
            .position(|sample| sample.timestamp > cutoff)
            .unwrap_or(self.history.len());
        if keep_from > 0 {
            self.history.drain(..keep_from);
        }
    }

    /// Raw percent/hour drop over the trailing `window`.
    ///
    /// The window starts at the first sample at or after `now - window`; the sample just
    /// before it, if any, is used as the baseline. The result is uncapped.
    pub fn window_rate(&self, now: DateTime<Utc>, window: Duration) -> Result<f32, RateError> {
        if self.history.len() < 2 {
            return Err(RateError::InsufficientHistory);
        }

        let cutoff = now - window;
        let end_index = self.history.len() - 1;

        let start_index = match self.history.iter().position(|s| s.timestamp >= cutoff) {
            Some(i) => i.saturating_sub(1),
            None => {
                let first = self.history[0].timestamp;
                if now - first < window {
                    0
                } else {
                    return Err(RateError::NoDataInWindow(window.num_minutes()));
                }
            }
        };

        if start_index == end_index {
            return Err(RateError::SinglePoint);
        }

        let start = self.history[start_index];
        let end = self.history[end_index];

        let elapsed = hours_between(start.timestamp, end.timestamp);
        if elapsed < MIN_WINDOW_HOURS {
            return Err(RateError::WindowTooShort(elapsed));
        }

        let drop = start.percent - end.percent;
        if drop <= 0.0 {
            return Err(RateError::NotDischarging(drop));
        }
        if drop < MIN_PERCENT_CHANGE {
            return Err(RateError::BelowMinimumChange {
                change: drop,
                threshold: MIN_PERCENT_CHANGE,
            });
        }

        let rate = drop / elapsed as f32;
        log::debug!(
            "Discharge rate: {:.2}% drop over {:.2} hours = {:.3}%/hour (window {} min)",
            drop,
            elapsed,
            rate,
            window.num_minutes()
        );
        Ok(rate)
    }

    /// Window rate with the outlier cap applied
    pub fn capped_window_rate(&self, now: DateTime<Utc>, window: Duration) -> Result<f32, RateError> {
        self.window_rate(now, window).map(|rate| {
            if rate > MAX_DISCHARGE_RATE {
                log::warn!(
                    "Calculated discharge rate {:.3}%/hour exceeds realistic maximum ({}%/hour) - capping",
                    rate,
                    MAX_DISCHARGE_RATE
                );
                MAX_DISCHARGE_RATE
            } else {
                rate
            }
        })
    }

    /// First capped rate from the preferred windows (6h, 2h, 24h, 30min)
    pub fn preferred_window_rate(&self, now: DateTime<Utc>) -> Option<(f32, Duration)> {
        [
            Duration::hours(6),
            Duration::hours(2),
            Duration::hours(24),
            Duration::minutes(30),
        ]
        .into_iter()
        .find_map(|window| {
            self.capped_window_rate(now, window)
                .ok()
                .filter(|rate| *rate > 0.0)
                .map(|rate| (rate, window))
        })
    }

    /// Recompute short/medium/long rates and their weighted average
    pub fn update_statistics(&mut self, now: DateTime<Utc>) {
        let previous_average = self.stats.average_rate;

        match self.capped_window_rate(now, Duration::minutes(SHORT_TERM_WINDOW_MINUTES)) {
            Ok(rate) => self.stats.short_term_rate = rate,
            Err(_) if self.stats.short_term_rate == 0.0 && previous_average > 0.0 => {
                self.stats.short_term_rate = previous_average;
            }
            Err(_) => {}
        }
        if let Ok(rate) = self.capped_window_rate(now, Duration::hours(MEDIUM_TERM_WINDOW_HOURS)) {
            self.stats.medium_term_rate = rate;
        }
        if let Ok(rate) = self.capped_window_rate(now, Duration::hours(LONG_TERM_WINDOW_HOURS)) {
            self.stats.long_term_rate = rate;
        }

        let (ws, wm, wl) = STAT_WEIGHTS;
        let parts = [
            (self.stats.short_term_rate, ws),
            (self.stats.medium_term_rate, wm),
            (self.stats.long_term_rate, wl),
        ];
        let total_weight: f32 = parts.iter().filter(|(r, _)| *r > 0.0).map(|(_, w)| w).sum();

        if total_weight > 0.0 {
            let weighted: f32 = parts.iter().filter(|(r, _)| *r > 0.0).map(|(r, w)| r * w).sum();
            self.stats.average_rate = weighted / total_weight;
        } else if previous_average > 0.0 {
            log::debug!(
                "Preserving previous discharge rate: {:.3}%/hour (no current rates available)",
                previous_average
            );
            self.stats.average_rate = previous_average;
        }

        self.stats.data_points = self.history.len();
        self.stats.last_updated = Some(now);
    }

    /// Rate from samples picked at regular steps back from `now`.
    ///
    /// For each step the nearest sample within three minutes is taken; at least three
    /// picks spanning half an hour are needed.
    pub fn sampled_rate(&self, now: DateTime<Utc>, step: Duration) -> Result<f32, RateError> {
        if self.history.len() < 10 {
            return Err(RateError::InsufficientHistory);
        }
        let Some(first) = self.history.front().map(|s| s.timestamp) else {
            return Err(RateError::InsufficientHistory);
        };
        let tolerance = Duration::minutes(3);

        let mut picks: Vec<DischargeSample> = Vec::new();
        let mut target = now;
        while picks.len() < 10 && target > first {
            let closest = self
                .history
                .iter()
                .min_by_key(|s| (target - s.timestamp).num_milliseconds().abs());
            if let Some(sample) = closest {
                if (target - sample.timestamp).num_milliseconds().abs() <= tolerance.num_milliseconds() {
                    picks.push(*sample);
                }
            }
            target -= step;
        }

        if picks.len() < 3 {
            return Err(RateError::InsufficientHistory);
        }

        // Picks run newest to oldest
        let newest = picks[0];
        let oldest = picks[picks.len() - 1];
        let elapsed = hours_between(oldest.timestamp, newest.timestamp);
        if elapsed < 0.5 {
            return Err(RateError::WindowTooShort(elapsed));
        }

        let drop = oldest.percent - newest.percent;
        if drop <= 0.0 {
            return Err(RateError::NotDischarging(drop));
        }

        let rate = drop / elapsed as f32;
        if rate > 10.0 {
            return Err(RateError::Implausible(rate));
        }
        Ok(rate)
    }

    /// Rate from the percent-curve drop between the newest sample at least 30 minutes
    /// old and the newest sample, recomputed with `pack`. Capped at 3%/hour.
    pub fn voltage_based_rate(&self, now: DateTime<Utc>, pack: Option<&BatteryPack>) -> Result<f32, RateError> {
        if self.history.len() < 10 {
            return Err(RateError::InsufficientHistory);
        }

        let cutoff = now - Duration::minutes(30);
        let start = self
            .history
            .iter()
            .rev()
            .find(|s| s.timestamp < cutoff)
            .copied()
            .ok_or(RateError::InsufficientHistory)?;
        let end = *self.history.back().ok_or(RateError::InsufficientHistory)?;

        let elapsed = hours_between(start.timestamp, end.timestamp);
        if elapsed < 0.5 {
            return Err(RateError::WindowTooShort(elapsed));
        }

        let pack = pack.ok_or(RateError::NoPack)?;
        let start_percent = pack.voltage_to_percent(start.voltage);
        let end_percent = pack.voltage_to_percent(end.voltage);
        let rate = (start_percent - end_percent) / elapsed as f32;

        log::debug!(
            "Voltage-based discharge: {:.2}V->{:.2}V ({:.1}%->{:.1}%) over {:.1}h = {:.3}%/hour",
            start.voltage,
            end.voltage,
            start_percent,
            end_percent,
            elapsed,
            rate
        );

        if rate <= 0.0 {
            return Err(RateError::NotDischarging(rate));
        }
        Ok(rate.min(3.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::chemistry::find_profile;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn sample(minutes: i64, voltage: f32, percent: f32) -> DischargeSample {
        DischargeSample {
            timestamp: t0() + Duration::minutes(minutes),
            voltage,
            percent,
        }
    }

    fn li_ion_pack() -> BatteryPack {
        BatteryPack::new(find_profile("li-ion").unwrap(), 1)
    }

    /// Linear discharge: `count` samples every `step` minutes losing `per_step` percent
    fn linear(count: i64, step: i64, per_step: f32) -> DischargeTracker {
        let mut tracker = DischargeTracker::new(24);
        for i in 0..count {
            let percent = 90.0 - per_step * i as f32;
            tracker.record(sample(i * step, 3.9 - 0.001 * i as f32, percent), None);
        }
        tracker
    }

    #[test]
    fn test_linear_hour_rate() {
        // 10 samples, 100% -> 80% over exactly one hour
        let mut tracker = DischargeTracker::new(24);
        for i in 0..10 {
            let minutes = i * 60 / 9;
            let seconds = (i * 3600 / 9) % 60;
            tracker.record(
                DischargeSample {
                    timestamp: t0() + Duration::minutes(minutes) + Duration::seconds(seconds),
                    voltage: 4.1,
                    percent: 100.0 - 20.0 * i as f32 / 9.0,
                },
                None,
            );
        }
        let now = t0() + Duration::hours(1);
        let rate = tracker.window_rate(now, Duration::hours(1)).unwrap();
        assert!((rate - 20.0).abs() < 0.2, "rate was {rate}");

        // Capped for smoothing
        assert_eq!(tracker.capped_window_rate(now, Duration::hours(1)).unwrap(), MAX_DISCHARGE_RATE);
    }

    #[test]
    fn test_window_rate_errors() {
        let mut tracker = DischargeTracker::new(24);
        assert_eq!(
            tracker.window_rate(t0(), Duration::hours(1)),
            Err(RateError::InsufficientHistory)
        );

        tracker.record(sample(0, 3.9, 80.0), None);
        tracker.record(sample(0, 3.9, 79.0), None);
        assert!(matches!(
            tracker.window_rate(t0(), Duration::hours(1)),
            Err(RateError::WindowTooShort(_))
        ));

        let mut flat = DischargeTracker::new(24);
        flat.record(sample(0, 3.9, 80.0), None);
        flat.record(sample(30, 3.9, 80.1), None);
        let now = t0() + Duration::minutes(30);
        assert!(matches!(
            flat.window_rate(now, Duration::hours(1)),
            Err(RateError::NotDischarging(_))
        ));

        let mut tiny = DischargeTracker::new(24);
        tiny.record(sample(0, 3.9, 80.0), None);
        tiny.record(sample(30, 3.9, 79.9), None);
        assert!(matches!(
            tiny.window_rate(now, Duration::hours(1)),
            Err(RateError::BelowMinimumChange { .. })
        ));
    }

    #[test]
    fn test_window_uses_preceding_baseline() {
        let tracker = linear(7, 10, 1.0);
        let now = t0() + Duration::minutes(60);
        // Window start at 35min -> first sample at 40min, baseline is the 30min sample
        let rate = tracker.window_rate(now, Duration::minutes(25)).unwrap();
        assert!((rate - 6.0).abs() < 1e-3);
    }

    #[test]
    fn test_window_with_only_stale_data() {
        let mut tracker = DischargeTracker::new(48);
        tracker.record(sample(0, 3.9, 80.0), None);
        tracker.record(sample(10, 3.9, 79.0), None);
        let now = t0() + Duration::hours(3);
        assert_eq!(
            tracker.window_rate(now, Duration::minutes(30)),
            Err(RateError::NoDataInWindow(30))
        );
    }

    #[test]
    fn test_rate_never_negative() {
        let mut tracker = DischargeTracker::new(24);
        for i in 0..6 {
            tracker.record(sample(i * 10, 3.8, 50.0 + i as f32 * 0.5), None);
        }
        let now = t0() + Duration::minutes(50);
        for window in [Duration::minutes(30), Duration::hours(6)] {
            match tracker.window_rate(now, window) {
                Ok(rate) => assert!(rate >= 0.0),
                Err(err) => assert!(matches!(err, RateError::NotDischarging(_))),
            }
        }
    }

    #[test]
    fn test_charge_clears_history() {
        let mut tracker = DischargeTracker::new(24);
        let pack = li_ion_pack();
        tracker.record(sample(0, 3.8, 60.0), Some(&pack));
        tracker.record(sample(10, 3.79, 59.5), Some(&pack));
        tracker.statistics_mut().average_rate = 0.8;

        let outcome = tracker.record(sample(20, 4.8, 100.0), Some(&pack));
        assert_eq!(outcome, RecordOutcome::ChargeDetected);
        assert!(tracker.is_empty());
        assert_eq!(tracker.last_charge_event(), Some(t0() + Duration::minutes(20)));
        assert_eq!(tracker.historical_average("li-ion_1cells"), Some(0.8));
        assert_eq!(tracker.statistics(), &DischargeStatistics::default());
    }

    #[test]
    fn test_historical_average_blend() {
        let mut tracker = DischargeTracker::new(24);
        let pack = li_ion_pack();
        for rate in [1.0, 2.0] {
            tracker.record(sample(0, 3.7, 40.0), Some(&pack));
            tracker.statistics_mut().average_rate = rate;
            tracker.record(sample(5, 3.7, 50.0), Some(&pack));
        }
        let blended = tracker.historical_average("li-ion_1cells").unwrap();
        assert!((blended - 1.3).abs() < 1e-5);
    }

    #[test]
    fn test_charge_event_rules() {
        let pack = li_ion_pack();
        assert!(is_charge_event(2.6, 0.0, 3.75, 45.0, Some(&pack)));
        assert!(is_charge_event(3.7, 40.0, 3.7, 46.0, None));
        assert!(!is_charge_event(3.3, 6.0, 3.7, 8.0, Some(&pack)));
        assert!(!is_charge_event(3.8, 60.0, 3.78, 58.0, Some(&pack)));
    }

    #[test]
    fn test_trim_by_age() {
        let mut tracker = DischargeTracker::new(1);
        for i in 0..10 {
            tracker.record(sample(i * 15, 3.8, 80.0 - i as f32 * 0.1), None);
        }
        // Newest at 135min; only samples after 75min survive
        assert_eq!(tracker.oldest().unwrap().timestamp, t0() + Duration::minutes(90));
        assert_eq!(tracker.len(), 4);
    }

    #[test]
    fn test_restore_trims_to_window() {
        let mut tracker = DischargeTracker::new(2);
        let history: Vec<DischargeSample> = (0..8).rev().map(|i| sample(i * 30, 3.8, 80.0 - i as f32)).collect();
        let charged_at = t0() - Duration::hours(1);

        // Newest at 210min; the two hour window starts after 90min
        tracker.restore(
            history.clone(),
            DischargeStatistics::default(),
            Some(charged_at),
            HashMap::new(),
            t0() + Duration::minutes(210),
        );
        assert_eq!(tracker.len(), 4);
        assert_eq!(tracker.oldest().unwrap().timestamp, t0() + Duration::minutes(120));
        assert_eq!(tracker.last_charge_event(), Some(charged_at));

        // A snapshot entirely outside the window leaves nothing behind
        tracker.restore(
            history,
            DischargeStatistics::default(),
            None,
            HashMap::new(),
            t0() + Duration::hours(12),
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_statistics_weights_and_continuity() {
        let mut tracker = linear(19, 20, 0.5);
        let now = t0() + Duration::minutes(360);
        tracker.update_statistics(now);

        let stats = tracker.statistics().clone();
        assert!((stats.short_term_rate - 1.5).abs() < 1e-3);
        assert!((stats.medium_term_rate - 1.5).abs() < 1e-3);
        assert!((stats.average_rate - 1.5).abs() < 1e-3);
        assert_eq!(stats.data_points, 19);

        // Far in the future nothing is in any window: average preserved
        tracker.update_statistics(now + Duration::hours(30));
        assert!((tracker.statistics().average_rate - 1.5).abs() < 1e-3);
    }

    #[test]
    fn test_preferred_window_order() {
        let tracker = linear(19, 20, 0.5);
        let now = t0() + Duration::minutes(360);
        let (rate, window) = tracker.preferred_window_rate(now).unwrap();
        assert_eq!(window, Duration::hours(6));
        assert!((rate - 1.5).abs() < 1e-3);
    }

    #[test]
    fn test_sampled_rate() {
        let tracker = linear(20, 5, 0.1);
        let now = t0() + Duration::minutes(95);
        let rate = tracker.sampled_rate(now, Duration::minutes(10)).unwrap();
        assert!((rate - 1.2).abs() < 1e-3, "rate was {rate}");

        let short = linear(9, 5, 0.1);
        assert_eq!(
            short.sampled_rate(now, Duration::minutes(10)),
            Err(RateError::InsufficientHistory)
        );
    }

    #[test]
    fn test_voltage_based_rate() {
        let pack = li_ion_pack();
        let mut tracker = DischargeTracker::new(24);
        // 3.80V (60%) to 3.75V (50%) over one hour
        for i in 0..=12 {
            tracker.record(sample(i * 5, 3.80 - 0.05 * i as f32 / 12.0, 60.0), None);
        }
        let now = t0() + Duration::minutes(60);
        let rate = tracker.voltage_based_rate(now, Some(&pack)).unwrap();
        // Baseline is the newest sample older than 30 minutes (25min)
        assert!(rate > 0.0 && rate <= 3.0);
        assert_eq!(
            tracker.voltage_based_rate(now, None),
            Err(RateError::NoPack)
        );
    }
}
