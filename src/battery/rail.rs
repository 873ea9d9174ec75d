//! Active rail selection
//!
//! The hat exposes two battery inputs. Only one of them is wired to the live pack;
//! the other floats or reads leakage. The connected rail shows voltage movement under
//! load, so selection scores each rail by the variation in its recent history and
//! falls back to plain voltage levels when the scores are too close to call.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::history::VoltageHistory;

/// Readings before the activity heuristic replaces the voltage-level heuristic
const ACTIVITY_MIN_READINGS: u32 = 5;

/// Readings after which a chosen rail is kept while it stays powered
const STICKY_MIN_READINGS: u32 = 10;

/// Voltage a rail must exceed to count as powered
const POWERED_THRESHOLD: f32 = 1.0;

/// Voltage a rail must exceed to be preferred on level alone
const LEVEL_THRESHOLD: f32 = 2.0;

/// Margin by which one rail must exceed the other to win on level
const LEVEL_MARGIN: f32 = 1.0;

/// Margin by which one activity score must exceed the other
const ACTIVITY_MARGIN: f32 = 0.1;

/// Physical battery input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rail {
    /// High-voltage main pack input
    #[default]
    Hv,
    /// Low-voltage auxiliary input
    Lv,
}

impl Rail {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rail::Hv => "hv",
            Rail::Lv => "lv",
        }
    }

    /// Parse a rail name as stored in state files and logs
    pub fn parse(value: &str) -> Option<Rail> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hv" => Some(Rail::Hv),
            "lv" => Some(Rail::Lv),
            _ => None,
        }
    }
}

impl fmt::Display for Rail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks both rails and decides which one carries the battery
#[derive(Debug, Clone, Default)]
pub struct RailSelector {
    hv_history: VoltageHistory,
    lv_history: VoltageHistory,
    /// Rail chosen by the activity heuristic, if any
    active_rail: Option<Rail>,
    /// Number of readings seen
    readings: u32,
}

impl RailSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a previously chosen rail, treating it as confidently established
    pub fn restore(&mut self, rail: Rail) {
        self.active_rail = Some(rail);
        self.readings = self.readings.max(STICKY_MIN_READINGS);
    }

    /// Forget everything, as for a newly inserted battery
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn active_rail(&self) -> Option<Rail> {
        self.active_rail
    }

    pub fn readings(&self) -> u32 {
        self.readings
    }

    /// Record one reading of both rails and return the selected voltage and rail
    pub fn select(&mut self, hv: f32, lv: f32, timestamp: DateTime<Utc>) -> (f32, Rail) {
        self.hv_history.push(hv, timestamp);
        self.lv_history.push(lv, timestamp);
        self.readings = self.readings.saturating_add(1);

        // Stick with an established rail while it stays powered
        if self.readings >= STICKY_MIN_READINGS {
            match self.active_rail {
                Some(Rail::Hv) if hv > POWERED_THRESHOLD => return (hv, Rail::Hv),
                Some(Rail::Lv) if lv > POWERED_THRESHOLD => return (lv, Rail::Lv),
                _ => {}
            }
        }

        if self.readings < ACTIVITY_MIN_READINGS {
            return select_by_level(hv, lv);
        }

        let hv_activity = activity_score(&self.hv_history);
        let lv_activity = activity_score(&self.lv_history);

        let (voltage, rail) = if hv_activity > lv_activity + ACTIVITY_MARGIN && hv > POWERED_THRESHOLD {
            (hv, Rail::Hv)
        } else if lv_activity > hv_activity + ACTIVITY_MARGIN && lv > POWERED_THRESHOLD {
            (lv, Rail::Lv)
        } else {
            select_by_level(hv, lv)
        };

        if self.active_rail != Some(rail) {
            log::info!(
                "Switching active rail from {} to {} (HV activity: {:.3}, LV activity: {:.3})",
                self.active_rail.map(|r| r.as_str()).unwrap_or("none"),
                rail,
                hv_activity,
                lv_activity
            );
            self.active_rail = Some(rail);
        }

        (voltage, rail)
    }
}

/// Prefer a clearly higher HV, then any meaningful LV, else HV
fn select_by_level(hv: f32, lv: f32) -> (f32, Rail) {
    if hv > LEVEL_THRESHOLD && hv > lv + LEVEL_MARGIN {
        (hv, Rail::Hv)
    } else if lv > LEVEL_THRESHOLD {
        (lv, Rail::Lv)
    } else {
        (hv, Rail::Hv)
    }
}

/// Variation score of a rail: stddev x 100 + range x 50, plus 10 when the mean is meaningful.
/// Fewer than three samples score zero.
pub fn activity_score(history: &VoltageHistory) -> f32 {
    if history.len() < 3 {
        return 0.0;
    }

    let (Some(mean), Some(std_dev), Some(range)) = (history.mean(), history.std_dev(), history.range())
    else {
        return 0.0;
    };

    let mut score = std_dev * 100.0 + range * 50.0;
    if mean > LEVEL_THRESHOLD {
        score += 10.0;
    }
    score
}
