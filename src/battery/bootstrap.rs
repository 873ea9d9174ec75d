//! Rebuilding discharge history from the voltage log
//!
//! When persisted history is missing, sparse or stale, the trailing discharge segment
//! of the readings log is reinterpreted with the current pack. Stored percentages are
//! never trusted: the chemistry may have been re-detected since a row was written.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use thiserror::Error;

use super::chemistry::BatteryPack;
use super::discharge::{DischargeSample, CHARGE_PERCENT_JUMP, CHARGE_VOLTAGE_JUMP};
use super::rail::Rail;
use crate::error::Result;
use crate::readings_log::LOG_TIMESTAMP_FORMAT;

/// Hours of log considered for bootstrap
pub const BOOTSTRAP_WINDOW_HOURS: i64 = 48;

/// Fewest entries worth keeping (and below which persisted history is "sparse")
pub const BOOTSTRAP_MIN_ENTRIES: usize = 3;

/// Most entries loaded
pub const BOOTSTRAP_MAX_ENTRIES: usize = 200;

/// Minimum spacing between loaded entries
pub const BOOTSTRAP_MIN_INTERVAL_MINUTES: i64 = 5;

/// Age of the newest persisted entry beyond which history counts as stale
pub const BOOTSTRAP_STALE_HOURS: i64 = 4;

/// Tolerance around the pack window for rows to count as the same battery
const PACK_TOLERANCE: f32 = 1.0;

/// Hours of log considered for initial detection
pub const DETECTION_WINDOW_HOURS: i64 = 4;

/// Readings required for log-based detection
pub const DETECTION_MIN_READINGS: usize = 5;

/// Why a bootstrap produced nothing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbandonReason {
    #[error("no voltage log available")]
    NoLog,

    #[error("insufficient valid entries in voltage log ({found} found, {required} required)")]
    InsufficientValidEntries { found: usize, required: usize },

    #[error("insufficient discharge-only entries after filtering ({0})")]
    InsufficientDischargeEntries(usize),

    #[error("not enough entries after time sampling ({0})")]
    InsufficientResampledEntries(usize),
}

/// Result of a bootstrap attempt
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapOutcome {
    /// History rebuilt, oldest first
    Loaded(Vec<DischargeSample>),
    /// Nothing usable; normal operation continues with empty history
    Abandoned(AbandonReason),
}

/// One parsed log line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogRow {
    pub timestamp: DateTime<Utc>,
    pub hv: f32,
    pub lv: f32,
    pub rtc: f32,
    pub rail: Option<Rail>,
}

impl LogRow {
    /// Voltage of the rail the row was measured on, else of `fallback`
    pub fn voltage(&self, fallback: Rail) -> f32 {
        match self.rail.unwrap_or(fallback) {
            Rail::Hv => self.hv,
            Rail::Lv => self.lv,
        }
    }
}

/// Parse a log record; header and malformed lines yield `None`
pub fn parse_row(record: &StringRecord) -> Option<LogRow> {
    if record.len() < 4 {
        return None;
    }
    let timestamp_field = record.get(0)?;
    if timestamp_field.contains("timestamp") {
        return None;
    }

    let timestamp = NaiveDateTime::parse_from_str(timestamp_field, LOG_TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();
    let float = |index: usize| record.get(index).and_then(|v| v.parse::<f32>().ok());

    Some(LogRow {
        timestamp,
        hv: float(1)?,
        lv: float(2)?,
        rtc: float(3).unwrap_or(0.0),
        rail: record.get(7).and_then(Rail::parse),
    })
}

/// Reads history back out of the voltage log
#[derive(Debug, Clone)]
pub struct CsvBootstrapper {
    log_path: PathBuf,
}

impl CsvBootstrapper {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Whether persisted history should be replaced from the log
    pub fn needs_bootstrap(history_len: usize, newest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match newest {
            None => true,
            Some(_) if history_len < BOOTSTRAP_MIN_ENTRIES => true,
            Some(newest) => now - newest > Duration::hours(BOOTSTRAP_STALE_HOURS),
        }
    }

    /// All parseable rows at or after `since`; `None` when the log does not exist
    fn read_rows(&self, since: DateTime<Utc>) -> Result<Option<Vec<LogRow>>> {
        let file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(file);

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for record in reader.records() {
            let Ok(record) = record else {
                skipped += 1;
                continue;
            };
            match parse_row(&record) {
                Some(row) if row.timestamp >= since => rows.push(row),
                Some(_) => {}
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            log::debug!("Skipped {} unparseable voltage log lines", skipped);
        }
        Ok(Some(rows))
    }

    /// Rebuild discharge history for `pack` from the last 48 hours of log
    pub fn bootstrap(&self, pack: &BatteryPack, fallback_rail: Rail, now: DateTime<Utc>) -> Result<BootstrapOutcome> {
        let since = now - Duration::hours(BOOTSTRAP_WINDOW_HOURS);
        let Some(rows) = self.read_rows(since)? else {
            return Ok(BootstrapOutcome::Abandoned(AbandonReason::NoLog));
        };

        log::info!(
            "Bootstrapping discharge history with current pack {}; historical data is reinterpreted with this profile",
            pack
        );

        // Rows from another battery fall outside the pack window
        let mut entries: Vec<DischargeSample> = rows
            .iter()
            .filter_map(|row| {
                let voltage = row.voltage(fallback_rail);
                pack.contains(voltage, PACK_TOLERANCE).then(|| DischargeSample {
                    timestamp: row.timestamp,
                    voltage,
                    percent: pack.voltage_to_percent(voltage),
                })
            })
            .collect();
        entries.sort_by_key(|entry| entry.timestamp);

        if entries.len() < BOOTSTRAP_MIN_ENTRIES {
            return Ok(BootstrapOutcome::Abandoned(AbandonReason::InsufficientValidEntries {
                found: entries.len(),
                required: BOOTSTRAP_MIN_ENTRIES,
            }));
        }

        // Keep only the segment after the last charge-like jump
        let mut discharge_only: Vec<DischargeSample> = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(last) = discharge_only.last() {
                if entry.voltage > last.voltage + CHARGE_VOLTAGE_JUMP
                    || entry.percent > last.percent + CHARGE_PERCENT_JUMP
                {
                    log::info!(
                        "Voltage log: charge or anomaly at {} ({:.2}V->{:.2}V), discarding prior history",
                        entry.timestamp.format("%H:%M"),
                        last.voltage,
                        entry.voltage
                    );
                    discharge_only.clear();
                }
            }
            discharge_only.push(entry);
        }

        if let (Some(first), Some(last)) = (discharge_only.first(), discharge_only.last()) {
            let hours = (last.timestamp - first.timestamp).num_minutes() as f32 / 60.0;
            if hours > 0.5 {
                let overall = (first.percent - last.percent) / hours;
                if overall > 3.0 {
                    log::warn!(
                        "Voltage log shows unrealistic discharge rate {:.3}%/hour - may indicate configuration mismatch",
                        overall
                    );
                }
            }
        }

        if discharge_only.len() < BOOTSTRAP_MIN_ENTRIES {
            return Ok(BootstrapOutcome::Abandoned(
                AbandonReason::InsufficientDischargeEntries(discharge_only.len()),
            ));
        }

        let min_interval = Duration::minutes(BOOTSTRAP_MIN_INTERVAL_MINUTES);
        let mut resampled: Vec<DischargeSample> = Vec::new();
        for entry in discharge_only {
            let keep = resampled
                .last()
                .map(|last| entry.timestamp - last.timestamp >= min_interval)
                .unwrap_or(true);
            if keep {
                resampled.push(entry);
            }
        }

        if resampled.len() < BOOTSTRAP_MIN_ENTRIES {
            return Ok(BootstrapOutcome::Abandoned(
                AbandonReason::InsufficientResampledEntries(resampled.len()),
            ));
        }
        if resampled.len() > BOOTSTRAP_MAX_ENTRIES {
            resampled.drain(..resampled.len() - BOOTSTRAP_MAX_ENTRIES);
        }

        log::info!(
            "Voltage log bootstrap loaded {} entries from {} rows",
            resampled.len(),
            rows.len()
        );
        Ok(BootstrapOutcome::Loaded(resampled))
    }

    /// Positive voltages from the last four hours, for initial chemistry detection.
    ///
    /// Returns `None` when the log is missing or has fewer than five readings.
    pub fn recent_voltages(&self, fallback_rail: Rail, now: DateTime<Utc>) -> Result<Option<Vec<f32>>> {
        let since = now - Duration::hours(DETECTION_WINDOW_HOURS);
        let Some(rows) = self.read_rows(since)? else {
            return Ok(None);
        };
        let voltages: Vec<f32> = rows
            .iter()
            .map(|row| row.voltage(fallback_rail))
            .filter(|v| *v > 0.0)
            .collect();
        if voltages.len() < DETECTION_MIN_READINGS {
            log::debug!("Insufficient voltage readings in log ({} found)", voltages.len());
            return Ok(None);
        }
        Ok(Some(voltages))
    }
}
