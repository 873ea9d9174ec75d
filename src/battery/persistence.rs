//! Battery state persistence between daemon restarts
//!
//! The whole engine snapshot lives in one JSON file. Writes go to a temporary file in
//! the same directory which is then renamed over the old one, so a crash mid-write
//! leaves either the previous snapshot or the new one, never a mix.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::discharge::{DischargeSample, DischargeStatistics};
use super::rail::Rail;
use crate::error::{BatteryError, Result};

/// File name of the snapshot inside the state directory
pub const STATE_FILE_NAME: &str = "battery_state.json";

/// Durable engine snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    /// Detected chemistry name, empty if undetected
    pub detected_chemistry: String,

    /// Detected series cell count
    pub detected_cell_count: u32,

    /// Lowest voltage observed for the current battery
    pub observed_min_voltage: f32,

    /// Highest voltage observed for the current battery
    pub observed_max_voltage: f32,

    /// Readings folded into the observed range
    pub voltage_range_readings: u32,

    /// Rail carrying the battery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_rail: Option<Rail>,

    /// When the snapshot was written
    pub last_updated: DateTime<Utc>,

    /// Discharge samples, oldest first
    pub discharge_history: Vec<DischargeSample>,

    /// Windowed discharge statistics
    pub discharge_stats: DischargeStatistics,

    /// Last charge or swap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_charge_event: Option<DateTime<Utc>>,

    /// Long-run discharge rate per pack key
    pub historical_averages: HashMap<String, f32>,

    /// Exponential moving average of the discharge rate
    pub smoothed_discharge_rate: f32,

    /// Recent smoothed rates for the median filter
    pub discharge_rate_window: Vec<f32>,
}

impl PersistedState {
    /// Whether the stored detection is usable at `now`
    pub fn detection_is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        !self.detected_chemistry.is_empty()
            && self.detected_cell_count > 0
            && now - self.last_updated < max_age
    }
}

/// Reads and writes the snapshot file
#[derive(Debug, Clone)]
pub struct StateStore {
    /// Path to the state file
    state_path: PathBuf,
}

impl StateStore {
    /// Store for `battery_state.json` inside `state_dir`
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_path: state_dir.as_ref().join(STATE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.state_path
    }

    /// Check if a state file exists
    pub fn state_exists(&self) -> bool {
        self.state_path.exists()
    }

    /// Load the snapshot; a missing file yields `Ok(None)`
    pub fn load_state(&self) -> Result<Option<PersistedState>> {
        let json = match fs::read_to_string(&self.state_path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No battery state at {}", self.state_path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let state: PersistedState = serde_json::from_str(&json)?;
        log::debug!(
            "Loaded battery state: {} history entries, chemistry '{}'",
            state.discharge_history.len(),
            state.detected_chemistry
        );
        Ok(Some(state))
    }

    /// Write the snapshot atomically
    pub fn save_state(&self, state: &PersistedState) -> Result<()> {
        let dir = match self.state_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(state)?;

        let mut temp = NamedTempFile::new_in(&dir)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.state_path)
            .map_err(|e| BatteryError::Persistence(format!("Failed to replace state file: {}", e)))?;

        log::debug!("Saved battery state to {}", self.state_path.display());
        Ok(())
    }

    /// Save, logging instead of propagating failures
    pub fn save_or_log(&self, state: &PersistedState) {
        if let Err(e) = self.save_state(state) {
            log::error!("Failed to save battery state: {}", e);
        }
    }

    /// Delete the state file if present; returns whether a file was removed
    pub fn delete_state(&self) -> Result<bool> {
        match fs::remove_file(&self.state_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
