//! Battery chemistry detection, discharge tracking and depletion forecasting

pub mod bootstrap;
pub mod chemistry;
pub mod depletion;
pub mod detector;
pub mod discharge;
pub mod history;
pub mod monitor;
pub mod persistence;
pub mod rail;
pub mod smoothing;
pub mod status;
pub mod strategy;

pub use bootstrap::{AbandonReason, BootstrapOutcome, CsvBootstrapper};

pub use chemistry::{
    find_profile, BatteryPack, ChemistryFamily, ChemistryProfile, PROFILES,
};

pub use depletion::{DepletionEstimate, DepletionEstimator, WarningLevel};

pub use detector::{ChemistryDetector, DetectionOutcome, DetectionState, ManualSelection, VoltageRange};

pub use discharge::{DischargeSample, DischargeStatistics, DischargeTracker};

pub use monitor::{BatteryMonitor, LOW_BATTERY_PERCENT, PERCENT_REPORT_THRESHOLD};

pub use persistence::{PersistedState, StateStore};

pub use rail::{Rail, RailSelector};

pub use status::{BatteryStatus, UNKNOWN_CHEMISTRY};

pub use strategy::EstimationMethod;
