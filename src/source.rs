//! Raw voltage input
//!
//! The bus layer that talks to the hat's microcontroller is a separate service. This
//! crate only needs "give me the voltage on rail X", expressed by [`VoltageSource`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::battery::Rail;
use crate::config::PathsConfig;
use crate::error::{BatteryError, Result};

/// Supplier of calibrated voltages
pub trait VoltageSource: Send + Sync {
    /// High-voltage main rail, in volts
    fn read_high_voltage_rail(&self) -> Result<f32>;

    /// Low-voltage auxiliary rail, in volts
    fn read_low_voltage_rail(&self) -> Result<f32>;

    /// Real-time clock backup cell, in volts
    fn read_clock_backup_cell(&self) -> Result<f32>;
}

/// One set of raw readings
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawReadings {
    pub hv: f32,
    pub lv: f32,
    pub rtc: f32,
}

/// Read all three inputs.
///
/// Main rail failures abort; a backup cell failure is logged and reads as 0V.
pub fn read_all(source: &dyn VoltageSource) -> Result<RawReadings> {
    let hv = source.read_high_voltage_rail()?;
    let lv = source.read_low_voltage_rail()?;
    let rtc = match source.read_clock_backup_cell() {
        Ok(v) => v,
        Err(e) => {
            log::error!("Error reading RTC battery: {}", e);
            0.0
        }
    };
    Ok(RawReadings { hv, lv, rtc })
}

/// Reads voltages from text files holding a decimal number of volts
#[derive(Debug, Clone)]
pub struct SysfsVoltageSource {
    hv_path: PathBuf,
    lv_path: PathBuf,
    rtc_path: PathBuf,
}

impl SysfsVoltageSource {
    pub fn new(hv_path: impl Into<PathBuf>, lv_path: impl Into<PathBuf>, rtc_path: impl Into<PathBuf>) -> Self {
        Self {
            hv_path: hv_path.into(),
            lv_path: lv_path.into(),
            rtc_path: rtc_path.into(),
        }
    }

    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self::new(&paths.hv_input, &paths.lv_input, &paths.rtc_input)
    }
}

fn read_volts(path: &Path) -> std::result::Result<f32, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let value: f32 = text
        .trim()
        .parse()
        .map_err(|e| format!("{}: invalid reading '{}': {}", path.display(), text.trim(), e))?;
    if !value.is_finite() {
        return Err(format!("{}: non-finite reading", path.display()));
    }
    Ok(value)
}

impl VoltageSource for SysfsVoltageSource {
    fn read_high_voltage_rail(&self) -> Result<f32> {
        read_volts(&self.hv_path).map_err(|message| BatteryError::RailRead {
            rail: Rail::Hv,
            message,
        })
    }

    fn read_low_voltage_rail(&self) -> Result<f32> {
        read_volts(&self.lv_path).map_err(|message| BatteryError::RailRead {
            rail: Rail::Lv,
            message,
        })
    }

    fn read_clock_backup_cell(&self) -> Result<f32> {
        read_volts(&self.rtc_path).map_err(BatteryError::BackupCellRead)
    }
}
