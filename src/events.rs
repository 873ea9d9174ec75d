//! Outgoing battery events
//!
//! Events are best-effort. A publisher failure is logged by [`publish_or_log`] and the
//! sampling loop carries on.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::battery::{BatteryStatus, EstimationMethod, Rail, WarningLevel};
use crate::error::{BatteryError, Result};

/// Periodic battery report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryEvent {
    /// Rounded state of charge
    pub battery: i32,
    pub chemistry: String,
    pub cell_count: u32,
    pub voltage: f32,
    pub rail: Rail,
    /// Backup cell voltage, two decimals
    pub rtc_voltage: String,
}

/// Runtime warning raised from a depletion forecast
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepletionWarningEvent {
    pub severity: WarningLevel,
    pub hours_remaining: f32,
    /// Human-readable remaining time
    pub time_remaining: String,
    pub confidence: f32,
    pub method: EstimationMethod,
    pub discharge_rate: f32,
    pub current_percent: f32,
    pub chemistry: String,
    pub cell_count: u32,
}

/// Event published to the rest of the system
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum HatEvent {
    #[serde(rename = "rpiBattery")]
    Battery(BatteryEvent),
    #[serde(rename = "batteryDepletionWarning")]
    DepletionWarning(DepletionWarningEvent),
}

impl HatEvent {
    /// Battery report for a successful status
    pub fn battery(status: &BatteryStatus, rtc_voltage: f32) -> Option<HatEvent> {
        if !status.is_valid() {
            return None;
        }
        Some(HatEvent::Battery(BatteryEvent {
            battery: status.percent.round() as i32,
            chemistry: status.chemistry.clone(),
            cell_count: status.cell_count,
            voltage: status.voltage,
            rail: status.rail,
            rtc_voltage: format!("{:.2}", rtc_voltage),
        }))
    }

    /// Depletion warning for a status carrying a forecast
    pub fn depletion_warning(status: &BatteryStatus, severity: WarningLevel) -> Option<HatEvent> {
        let estimate = status.depletion_estimate.as_ref()?;
        Some(HatEvent::DepletionWarning(DepletionWarningEvent {
            severity,
            hours_remaining: estimate.estimated_hours,
            time_remaining: format_time_remaining(estimate.estimated_hours),
            confidence: estimate.confidence,
            method: estimate.method,
            discharge_rate: status.discharge_rate_per_hour,
            current_percent: status.percent,
            chemistry: status.chemistry.clone(),
            cell_count: status.cell_count,
        }))
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            HatEvent::Battery(_) => "rpiBattery",
            HatEvent::DepletionWarning(_) => "batteryDepletionWarning",
        }
    }
}

/// Render remaining hours for people
pub fn format_time_remaining(hours: f32) -> String {
    if hours > 24.0 {
        let days = (hours / 24.0) as u32;
        let remaining = (hours as u32) % 24;
        format!("{} days {} hours", days, remaining)
    } else if hours >= 6.0 {
        format!("{} hours", hours as u32)
    } else if hours >= 1.0 {
        let whole = hours as u32;
        let minutes = ((hours - whole as f32) * 60.0) as u32;
        format!("{} hours {} minutes", whole, minutes)
    } else {
        format!("{} minutes", (hours.max(0.0) * 60.0) as u32)
    }
}

/// Destination for events
pub trait EventPublisher: Send + Sync {
    /// Publish one event
    fn publish(&self, event: &HatEvent) -> Result<()>;
}

/// Publish, logging instead of propagating failures
pub fn publish_or_log(publisher: &dyn EventPublisher, event: &HatEvent) {
    if let Err(e) = publisher.publish(event) {
        log::error!("Error sending {} event: {}", event.kind(), e);
    }
}

/// Writes events to the log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventPublisher;

impl EventPublisher for LogEventPublisher {
    fn publish(&self, event: &HatEvent) -> Result<()> {
        match event {
            HatEvent::Battery(e) => log::info!(
                "Battery event: chemistry={} ({}cells), voltage={:.2}V, percent={}%",
                e.chemistry,
                e.cell_count,
                e.voltage,
                e.battery
            ),
            HatEvent::DepletionWarning(e) => log::info!(
                "Battery depletion warning event: {} - {} remaining",
                e.severity,
                e.time_remaining
            ),
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a HatEvent,
}

/// Appends one JSON object per event to a spool file
#[derive(Debug)]
pub struct JsonLinesEventPublisher {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesEventPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventPublisher for JsonLinesEventPublisher {
    fn publish(&self, event: &HatEvent) -> Result<()> {
        let line = serde_json::to_string(&EventLine {
            timestamp: Utc::now(),
            event,
        })?;

        let _guard = self.write_lock.lock().map_err(|_| BatteryError::LockPoisoned)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| BatteryError::Publish(format!("{}: {}", self.path.display(), e)))?;
        writeln!(file, "{}", line)?;
        log::debug!("Spooled {} event to {}", event.kind(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::{BatteryPack, DepletionEstimate};
    use crate::battery::chemistry::find_profile;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn status() -> BatteryStatus {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let pack = BatteryPack::new(find_profile("li-ion").unwrap(), 3);
        BatteryStatus::valid(11.52, 61.6, &pack, Rail::Hv, now)
    }

    #[test]
    fn test_format_time_remaining() {
        assert_eq!(format_time_remaining(50.0), "2 days 2 hours");
        assert_eq!(format_time_remaining(24.0), "24 hours");
        assert_eq!(format_time_remaining(7.9), "7 hours");
        assert_eq!(format_time_remaining(2.5), "2 hours 30 minutes");
        assert_eq!(format_time_remaining(0.25), "15 minutes");
    }

    #[test]
    fn test_battery_event_payload() {
        let event = HatEvent::battery(&status(), 3.104).unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "rpiBattery");
        assert_eq!(json["details"]["battery"], 62);
        assert_eq!(json["details"]["cellCount"], 3);
        assert_eq!(json["details"]["rtcVoltage"], "3.10");
        assert_eq!(json["details"]["rail"], "hv");
    }

    #[test]
    fn test_no_events_for_errors() {
        let mut failed = status();
        failed.error = Some("voltage 0.20V below detection threshold".to_string());
        assert!(HatEvent::battery(&failed, 3.0).is_none());
        assert!(HatEvent::depletion_warning(&status(), WarningLevel::Low).is_none());
    }

    #[test]
    fn test_json_lines_spool() {
        let temp_dir = TempDir::new().unwrap();
        let publisher = JsonLinesEventPublisher::new(temp_dir.path().join("events.jsonl"));

        let mut with_estimate = status();
        with_estimate.depletion_estimate = Some(DepletionEstimate {
            estimated_hours: 4.5,
            estimated_depletion: with_estimate.last_updated,
            confidence: 55.0,
            method: EstimationMethod::Averaged,
            warning_level: WarningLevel::Critical,
        });

        publisher.publish(&HatEvent::battery(&status(), 3.1).unwrap()).unwrap();
        publisher
            .publish(&HatEvent::depletion_warning(&with_estimate, WarningLevel::Critical).unwrap())
            .unwrap();

        let contents = fs::read_to_string(publisher.path()).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["type"], "batteryDepletionWarning");
        assert_eq!(lines[1]["details"]["timeRemaining"], "4 hours 30 minutes");
        assert_eq!(lines[1]["details"]["severity"], "critical");
        assert!(lines[0].get("timestamp").is_some());
    }
}
