//! Time-to-depletion forecast and its confidence score

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::smoothing::DisplayHysteresis;
use super::strategy::{EstimationMethod, RateSelection};

/// Longest forecast reported (30 days)
pub const MAX_ESTIMATE_HOURS: f32 = 720.0;

/// Below this many hours the warning is critical
pub const CRITICAL_HOURS: f32 = 6.0;

/// Forecast warning severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    #[default]
    Normal,
    Low,
    Critical,
}

impl WarningLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningLevel::Normal => "normal",
            WarningLevel::Low => "low",
            WarningLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forecast for one cycle; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepletionEstimate {
    pub estimated_hours: f32,
    pub estimated_depletion: DateTime<Utc>,
    /// 0-100
    pub confidence: f32,
    pub method: EstimationMethod,
    pub warning_level: WarningLevel,
}

/// Inputs to the confidence score
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfidenceInputs {
    /// Age of the oldest discharge sample in hours, `None` with no history
    pub history_age_hours: Option<f64>,
    pub short_term_rate: f32,
    pub medium_term_rate: f32,
    /// Whether a pack is known at all
    pub pack_known: bool,
    /// Whether the pack comes from manual configuration
    pub manual: bool,
    /// Readings folded into the voltage range
    pub range_readings: u32,
}

/// Score an estimate from 0 to 100.
///
/// Up to 40 points for history age, 30 for agreement between the short and medium
/// term rates, 30 for pack certainty, then a method adjustment.
pub fn confidence(inputs: &ConfidenceInputs, method: EstimationMethod) -> f32 {
    let mut score = 0.0f32;

    if let Some(age) = inputs.history_age_hours {
        score += if age >= 24.0 {
            40.0
        } else if age >= 6.0 {
            30.0
        } else if age >= 0.5 {
            20.0
        } else {
            10.0
        };
    }

    if inputs.short_term_rate > 0.0 && inputs.medium_term_rate > 0.0 {
        let mean = (inputs.short_term_rate + inputs.medium_term_rate) / 2.0;
        let variance = (inputs.short_term_rate - inputs.medium_term_rate).abs() / mean;
        score += if variance < 0.1 {
            30.0
        } else if variance < 0.3 {
            20.0
        } else if variance < 0.5 {
            10.0
        } else {
            0.0
        };
    }

    if inputs.pack_known {
        score += if inputs.manual {
            30.0
        } else if inputs.range_readings >= 20 {
            20.0
        } else {
            10.0
        };
    }

    match method {
        EstimationMethod::MedianFiltered => score += 10.0,
        EstimationMethod::Historical => score *= 0.7,
        EstimationMethod::ChemistryDefault => score *= 0.5,
        _ => {}
    }

    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 100.0)
}

/// Turns a rate and the current charge into a forecast
#[derive(Debug, Clone)]
pub struct DepletionEstimator {
    warning_hours: f32,
}

impl DepletionEstimator {
    pub fn new(warning_hours: f32) -> Self {
        Self { warning_hours }
    }

    pub fn warning_hours(&self) -> f32 {
        self.warning_hours
    }

    pub fn set_warning_hours(&mut self, hours: f32) {
        self.warning_hours = hours;
    }

    /// Warning level for a number of remaining hours
    pub fn warning_level(&self, hours: f32) -> WarningLevel {
        if hours < CRITICAL_HOURS {
            WarningLevel::Critical
        } else if hours < self.warning_hours {
            WarningLevel::Low
        } else {
            WarningLevel::Normal
        }
    }

    /// Forecast remaining hours, passing the raw value through display hysteresis.
    ///
    /// Returns `None` when the battery is empty or the rate is unusable.
    pub fn estimate(
        &self,
        percent: f32,
        selection: RateSelection,
        now: DateTime<Utc>,
        hysteresis: &mut DisplayHysteresis,
        inputs: &ConfidenceInputs,
    ) -> Option<DepletionEstimate> {
        if percent <= 0.0 || !(selection.rate > 0.0) {
            return None;
        }

        let raw_hours = (percent / selection.rate).min(MAX_ESTIMATE_HOURS);
        let hours = hysteresis.apply(raw_hours, selection.method);
        let millis = (f64::from(hours) * 3_600_000.0) as i64;

        Some(DepletionEstimate {
            estimated_hours: hours,
            estimated_depletion: now + Duration::milliseconds(millis),
            confidence: confidence(inputs, selection.method),
            method: selection.method,
            warning_level: self.warning_level(hours),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ALL_METHODS: [EstimationMethod; 7] = [
        EstimationMethod::ChemistryDefault,
        EstimationMethod::Historical,
        EstimationMethod::VoltageBased,
        EstimationMethod::SampledIntervals,
        EstimationMethod::Averaged,
        EstimationMethod::ShortTerm,
        EstimationMethod::MedianFiltered,
    ];

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn selection(rate: f32, method: EstimationMethod) -> RateSelection {
        RateSelection { rate, method }
    }

    #[test]
    fn test_hours_and_cap() {
        let estimator = DepletionEstimator::new(12.0);
        let mut hysteresis = DisplayHysteresis::default();
        let inputs = ConfidenceInputs::default();

        let estimate = estimator
            .estimate(50.0, selection(2.0, EstimationMethod::Averaged), now(), &mut hysteresis, &inputs)
            .unwrap();
        assert_eq!(estimate.estimated_hours, 25.0);
        assert_eq!(estimate.estimated_depletion, now() + Duration::hours(25));
        assert_eq!(estimate.warning_level, WarningLevel::Normal);

        let mut fresh = DisplayHysteresis::default();
        let capped = estimator
            .estimate(90.0, selection(0.01, EstimationMethod::Averaged), now(), &mut fresh, &inputs)
            .unwrap();
        assert_eq!(capped.estimated_hours, MAX_ESTIMATE_HOURS);
    }

    #[test]
    fn test_no_estimate_when_empty() {
        let estimator = DepletionEstimator::new(12.0);
        let mut hysteresis = DisplayHysteresis::default();
        let inputs = ConfidenceInputs::default();
        assert!(estimator
            .estimate(0.0, selection(1.0, EstimationMethod::Averaged), now(), &mut hysteresis, &inputs)
            .is_none());
        assert!(estimator
            .estimate(50.0, selection(0.0, EstimationMethod::Averaged), now(), &mut hysteresis, &inputs)
            .is_none());
    }

    #[test]
    fn test_warning_levels() {
        let estimator = DepletionEstimator::new(12.0);
        assert_eq!(estimator.warning_level(5.9), WarningLevel::Critical);
        assert_eq!(estimator.warning_level(6.0), WarningLevel::Low);
        assert_eq!(estimator.warning_level(11.9), WarningLevel::Low);
        assert_eq!(estimator.warning_level(12.0), WarningLevel::Normal);
    }

    #[test]
    fn test_confidence_components() {
        let inputs = ConfidenceInputs {
            history_age_hours: Some(25.0),
            short_term_rate: 1.0,
            medium_term_rate: 1.05,
            pack_known: true,
            manual: true,
            range_readings: 0,
        };
        assert_eq!(confidence(&inputs, EstimationMethod::Averaged), 100.0);
        assert_eq!(confidence(&inputs, EstimationMethod::MedianFiltered), 100.0);
        assert_eq!(confidence(&inputs, EstimationMethod::ChemistryDefault), 50.0);
        assert!((confidence(&inputs, EstimationMethod::Historical) - 70.0).abs() < 1e-4);

        let weak = ConfidenceInputs {
            history_age_hours: Some(0.1),
            short_term_rate: 1.0,
            medium_term_rate: 3.0,
            pack_known: true,
            manual: false,
            range_readings: 5,
        };
        assert_eq!(confidence(&weak, EstimationMethod::Averaged), 20.0);
        assert_eq!(confidence(&ConfidenceInputs::default(), EstimationMethod::Averaged), 0.0);
    }

    #[test]
    fn test_confidence_always_bounded() {
        let ages = [None, Some(0.0), Some(0.7), Some(7.0), Some(48.0), Some(-3.0)];
        let rates = [0.0, 0.01, 0.5, 1.0, 5.0, 100.0];
        for age in ages {
            for short in rates {
                for medium in rates {
                    for manual in [false, true] {
                        for readings in [0, 19, 20, 500] {
                            let inputs = ConfidenceInputs {
                                history_age_hours: age,
                                short_term_rate: short,
                                medium_term_rate: medium,
                                pack_known: true,
                                manual,
                                range_readings: readings,
                            };
                            for method in ALL_METHODS {
                                let score = confidence(&inputs, method);
                                assert!((0.0..=100.0).contains(&score), "{score} out of range");
                            }
                        }
                    }
                }
            }
        }
    }
}
