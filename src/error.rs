//! Error types for the hat battery daemon

use thiserror::Error;

use crate::battery::Rail;

/// Top-level error type for the battery engine and daemon
#[derive(Debug, Error)]
pub enum BatteryError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Voltage log parse error
    #[error("Voltage log error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A main rail could not be read; the cycle is aborted
    #[error("error reading {rail} rail: {message}")]
    RailRead {
        /// Rail that failed
        rail: Rail,
        /// Underlying reason
        message: String,
    },

    /// The clock backup cell could not be read
    #[error("error reading clock backup cell: {0}")]
    BackupCellRead(String),

    /// Discharge rate could not be calculated
    #[error(transparent)]
    Rate(#[from] RateError),

    /// Chemistry detection failed
    #[error(transparent)]
    Detection(#[from] DetectionError),

    /// Event publication failed
    #[error("Event publish error: {0}")]
    Publish(String),

    /// State persistence failed
    #[error("State persistence error: {0}")]
    Persistence(String),

    /// Shared monitor lock was poisoned by a panicking holder
    #[error("Failed to lock battery monitor")]
    LockPoisoned,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BatteryError>;

/// Reasons a windowed discharge rate cannot be produced
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateError {
    /// Fewer than two samples in the history
    #[error("insufficient discharge history")]
    InsufficientHistory,

    /// History exists but none of it falls inside the window
    #[error("no data within the {0} minute window")]
    NoDataInWindow(i64),

    /// Window start and end resolve to the same sample
    #[error("only one data point in the window")]
    SinglePoint,

    /// Samples are too close together in time
    #[error("time difference too small for accurate calculation: {0:.3} hours")]
    WindowTooShort(f64),

    /// Percent did not drop over the window (charging or flat)
    #[error("battery is not discharging (percent change: {0:.2})")]
    NotDischarging(f32),

    /// Drop is smaller than the quantization noise floor
    #[error("percentage change {change:.3}% is below minimum threshold of {threshold:.2}%")]
    BelowMinimumChange {
        /// Observed drop in percent points
        change: f32,
        /// Required drop in percent points
        threshold: f32,
    },

    /// Rate is beyond anything a real pack would show
    #[error("calculated rate too high: {0:.2}%/hour")]
    Implausible(f32),

    /// Percent conversion needs a pack and none is known
    #[error("no battery pack for voltage conversion")]
    NoPack,
}

/// Reasons chemistry detection did not produce a pack
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectionError {
    /// Voltage is zero or negative
    #[error("invalid voltage for detection: {0:.2}V")]
    InvalidVoltage(f32),

    /// Voltage exceeds what any supported pack could produce
    #[error("voltage {0:.2}V exceeds safety limit for auto-detection")]
    AboveSafetyLimit(f32),

    /// No profile/cell-count combination contains the voltage
    #[error("failed to detect chemistry for {voltage:.2}V. Possible matches: {suggestions}")]
    NoMatch {
        /// Voltage that failed to match
        voltage: f32,
        /// Nearest candidate per chemistry
        suggestions: String,
    },

    /// Manual configuration names a chemistry with no profile
    #[error("manually configured battery chemistry not found: {0}")]
    UnknownChemistry(String),

    /// Not enough readings yet for range-based detection
    #[error("insufficient data: collecting voltage data ({readings}/{required} readings)")]
    InsufficientData {
        /// Readings seen so far
        readings: u32,
        /// Readings required
        required: u32,
    },
}
