//! Discharge-rate smoothing and display hysteresis

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::strategy::EstimationMethod;

/// Weight of a new raw rate in the moving average
pub const DEFAULT_ALPHA: f32 = 0.1;

/// Smoothed values kept for the median filter
pub const RATE_WINDOW_SIZE: usize = 20;

/// Smoothed values needed before the median is trusted
pub const MEDIAN_MIN_SAMPLES: usize = 5;

/// Relative change needed to replace a shown estimate
const HYSTERESIS_THRESHOLD: f32 = 0.05;

/// Relative change needed once the shown estimate exceeds [`LONG_ESTIMATE_HOURS`]
const HYSTERESIS_THRESHOLD_LONG: f32 = 0.10;

const LONG_ESTIMATE_HOURS: f32 = 100.0;

/// Persistable smoothing state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmoothingState {
    /// Exponential moving average in %/hour, zero until seeded
    pub smoothed_discharge_rate: f32,
    /// Recent smoothed values, oldest first
    pub discharge_rate_window: VecDeque<f32>,
}

/// What was last shown to the user
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DisplayHysteresis {
    pub last_hours: Option<f32>,
    pub last_method: Option<EstimationMethod>,
}

impl DisplayHysteresis {
    /// Decide what to show for a fresh estimate.
    ///
    /// The previous value is kept unless the relative change exceeds the threshold or
    /// the new estimate comes from a strictly better method.
    pub fn apply(&mut self, hours: f32, method: EstimationMethod) -> f32 {
        let last = match self.last_hours.filter(|h| *h > 0.0) {
            Some(last) => last,
            None => {
                self.last_hours = Some(hours);
                self.last_method = Some(method);
                return hours;
            }
        };

        let change = (hours - last).abs() / last;
        let threshold = if last > LONG_ESTIMATE_HOURS {
            HYSTERESIS_THRESHOLD_LONG
        } else {
            HYSTERESIS_THRESHOLD
        };
        let upgrade = self.last_method.map(|m| method > m).unwrap_or(true);

        if change < threshold && !upgrade {
            return last;
        }

        self.last_hours = Some(hours);
        self.last_method = Some(method);
        hours
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// EWMA plus rolling median over discharge rates
#[derive(Debug, Clone)]
pub struct RateSmoother {
    alpha: f32,
    window_size: usize,
    state: SmoothingState,
    hysteresis: DisplayHysteresis,
}

impl Default for RateSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA, RATE_WINDOW_SIZE)
    }
}

impl RateSmoother {
    pub fn new(alpha: f32, window_size: usize) -> Self {
        Self {
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            window_size: window_size.max(1),
            state: SmoothingState::default(),
            hysteresis: DisplayHysteresis::default(),
        }
    }

    pub fn state(&self) -> &SmoothingState {
        &self.state
    }

    /// Restore persisted state, trimming the window to capacity
    pub fn restore(&mut self, mut state: SmoothingState) {
        while state.discharge_rate_window.len() > self.window_size {
            state.discharge_rate_window.pop_front();
        }
        if !state.smoothed_discharge_rate.is_finite() || state.smoothed_discharge_rate < 0.0 {
            state.smoothed_discharge_rate = 0.0;
        }
        self.state = state;
    }

    pub fn hysteresis(&mut self) -> &mut DisplayHysteresis {
        &mut self.hysteresis
    }

    pub fn smoothed(&self) -> Option<f32> {
        Some(self.state.smoothed_discharge_rate).filter(|rate| *rate > 0.0)
    }

    /// Fold a raw rate into the average and push the result onto the window
    pub fn push(&mut self, raw: f32) -> f32 {
        if !raw.is_finite() || raw <= 0.0 {
            return self.state.smoothed_discharge_rate;
        }

        let smoothed = if self.state.smoothed_discharge_rate <= 0.0 {
            log::debug!("First discharge rate calculation: {:.3}%/hour", raw);
            raw
        } else {
            let previous = self.state.smoothed_discharge_rate;
            let next = self.alpha * raw + (1.0 - self.alpha) * previous;
            log::debug!(
                "EWMA discharge rate: raw={:.3}%/hour, previous={:.3}%/hour, smoothed={:.3}%/hour",
                raw,
                previous,
                next
            );
            next
        };

        self.state.smoothed_discharge_rate = smoothed;
        self.state.discharge_rate_window.push_back(smoothed);
        if self.state.discharge_rate_window.len() > self.window_size {
            self.state.discharge_rate_window.pop_front();
        }
        smoothed
    }

    /// Median of the window once it holds enough values
    pub fn window_median(&self) -> Option<f32> {
        if self.state.discharge_rate_window.len() < MEDIAN_MIN_SAMPLES {
            return None;
        }
        median(self.state.discharge_rate_window.iter().copied())
    }

    /// Forget everything, as after a charge or battery change
    pub fn reset(&mut self) {
        self.state = SmoothingState::default();
        self.hysteresis.reset();
    }
}

/// Median of a set of values; `None` when empty
pub fn median(values: impl IntoIterator<Item = f32>) -> Option<f32> {
    let mut sorted: Vec<f32> = values.into_iter().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    Some(if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    })
}
