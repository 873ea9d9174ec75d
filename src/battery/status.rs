//! Per-cycle battery status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chemistry::BatteryPack;
use super::depletion::DepletionEstimate;
use super::rail::Rail;

/// Chemistry name reported when no pack is known
pub const UNKNOWN_CHEMISTRY: &str = "unknown";

/// Result of one reading cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryStatus {
    /// Voltage on the active rail
    pub voltage: f32,

    /// State of charge, or -1 when unknown
    pub percent: f32,

    pub chemistry: String,

    pub cell_count: u32,

    pub rail: Rail,

    pub last_updated: DateTime<Utc>,

    /// Soft failure description; absent on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depletion_estimate: Option<DepletionEstimate>,

    /// Selected discharge rate in %/hour, zero if none
    pub discharge_rate_per_hour: f32,

    /// Whether the charge rose since the previous valid reading
    pub charging_detected: bool,
}

impl BatteryStatus {
    /// Successful reading for a known pack
    pub fn valid(voltage: f32, percent: f32, pack: &BatteryPack, rail: Rail, now: DateTime<Utc>) -> Self {
        Self {
            voltage,
            percent,
            chemistry: pack.chemistry().to_string(),
            cell_count: pack.cell_count,
            rail,
            last_updated: now,
            error: None,
            depletion_estimate: None,
            discharge_rate_per_hour: 0.0,
            charging_detected: false,
        }
    }

    /// Soft failure carrying over what the last valid status knew
    pub fn failed(
        voltage: f32,
        rail: Rail,
        now: DateTime<Utc>,
        error: impl Into<String>,
        last_valid: Option<&BatteryStatus>,
    ) -> Self {
        let (percent, chemistry, cell_count) = match last_valid {
            Some(last) => (last.percent, last.chemistry.clone(), last.cell_count),
            None => (-1.0, UNKNOWN_CHEMISTRY.to_string(), 0),
        };
        Self {
            voltage,
            percent,
            chemistry,
            cell_count,
            rail,
            last_updated: now,
            error: Some(error.into()),
            depletion_estimate: None,
            discharge_rate_per_hour: 0.0,
            charging_detected: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    /// Whether chemistry or cell count differ from `other`
    pub fn pack_differs(&self, other: &BatteryStatus) -> bool {
        self.chemistry != other.chemistry || self.cell_count != other.cell_count
    }
}
