//! Append-only CSV voltage log
//!
//! One line per reading cycle:
//! `timestamp, hv, lv, rtc, chemistry, cell_count, percent, rail, error, discharge_rate, hours_remaining, confidence`.
//! The same file feeds history bootstrap and log-based detection on startup.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use crate::battery::BatteryStatus;
use crate::error::{BatteryError, Result};
use crate::source::RawReadings;

/// Timestamp format of the first column, always UTC
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format one log line (without newline)
pub fn format_line(now: DateTime<Utc>, raw: &RawReadings, status: &BatteryStatus) -> String {
    let (hours_remaining, confidence) = status
        .depletion_estimate
        .as_ref()
        .map(|e| (e.estimated_hours, e.confidence))
        .unwrap_or((-1.0, 0.0));
    // Commas inside the message would shift the trailing columns
    let error = status.error.as_deref().unwrap_or("").replace(',', ";");

    format!(
        "{}, {:.2}, {:.2}, {:.2}, {}, {}, {:.1}, {}, {}, {:.2}, {:.1}, {:.1}",
        now.format(LOG_TIMESTAMP_FORMAT),
        raw.hv,
        raw.lv,
        raw.rtc,
        status.chemistry,
        status.cell_count,
        status.percent,
        status.rail,
        error,
        status.discharge_rate_per_hour,
        hours_remaining,
        confidence
    )
}

/// Writer for the voltage log
#[derive(Debug, Clone)]
pub struct ReadingsLog {
    path: PathBuf,
}

impl ReadingsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one cycle
    pub fn append(&self, now: DateTime<Utc>, raw: &RawReadings, status: &BatteryStatus) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", format_line(now, raw, status))?;
        Ok(())
    }

    /// Keep only the last `max_lines` lines; returns how many were dropped
    pub fn keep_last_lines(&self, max_lines: usize) -> Result<usize> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = contents.lines().collect();
        if lines.len() <= max_lines {
            return Ok(0);
        }
        let dropped = lines.len() - max_lines;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp = NamedTempFile::new_in(&dir)?;
        for line in &lines[dropped..] {
            writeln!(temp, "{}", line)?;
        }
        temp.persist(&self.path)
            .map_err(|e| BatteryError::Persistence(format!("Failed to replace voltage log: {}", e)))?;

        log::info!(
            "Truncated {} to its last {} lines ({} dropped)",
            self.path.display(),
            max_lines,
            dropped
        );
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::{BatteryPack, Rail};
    use crate::battery::chemistry::find_profile;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 5, 0).unwrap()
    }

    #[test]
    fn test_line_format() {
        let pack = BatteryPack::new(find_profile("li-ion").unwrap(), 3);
        let status = BatteryStatus::valid(11.5, 61.04, &pack, Rail::Hv, now());
        let raw = RawReadings { hv: 11.5, lv: 0.0, rtc: 3.1 };
        assert_eq!(
            format_line(now(), &raw, &status),
            "2024-05-01 09:05:00, 11.50, 0.00, 3.10, li-ion, 3, 61.0, hv, , 0.00, -1.0, 0.0"
        );
    }

    #[test]
    fn test_error_commas_replaced() {
        let status = BatteryStatus::failed(70.0, Rail::Hv, now(), "no match, try manual", None);
        let line = format_line(now(), &RawReadings::default(), &status);
        assert_eq!(line.split(", ").count(), 12);
        assert!(line.contains("no match; try manual"));
    }

    #[test]
    fn test_keep_last_lines() {
        let temp_dir = TempDir::new().unwrap();
        let log = ReadingsLog::new(temp_dir.path().join("readings.csv"));
        assert_eq!(log.keep_last_lines(3).unwrap(), 0);

        let status = BatteryStatus::failed(0.2, Rail::Lv, now(), "low", None);
        for _ in 0..5 {
            log.append(now(), &RawReadings::default(), &status).unwrap();
        }
        assert_eq!(log.keep_last_lines(3).unwrap(), 2);
        assert_eq!(fs::read_to_string(log.path()).unwrap().lines().count(), 3);
        assert_eq!(log.keep_last_lines(3).unwrap(), 0);
    }
}
