//! Bounded voltage history used for rail activity and change detection

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Default number of samples kept per ring
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// A voltage with the instant it was sampled
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestampedVoltage {
    /// Voltage in volts
    pub voltage: f32,
    /// Sample time
    pub timestamp: DateTime<Utc>,
}

/// Fixed-capacity FIFO of recent voltages; the oldest entry is evicted on overflow
#[derive(Debug, Clone)]
pub struct VoltageHistory {
    samples: VecDeque<TimestampedVoltage>,
    capacity: usize,
}

impl Default for VoltageHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl VoltageHistory {
    /// Create an empty ring holding at most `capacity` samples (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a sample, evicting the oldest when full
    pub fn push(&mut self, voltage: f32, timestamp: DateTime<Utc>) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(TimestampedVoltage { voltage, timestamp });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples oldest first
    pub fn iter(&self) -> impl Iterator<Item = &TimestampedVoltage> {
        self.samples.iter()
    }

    /// Arithmetic mean of the voltages
    pub fn mean(&self) -> Option<f32> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f32 = self.samples.iter().map(|s| s.voltage).sum();
        Some(sum / self.samples.len() as f32)
    }

    /// Population standard deviation of the voltages
    pub fn std_dev(&self) -> Option<f32> {
        let mean = self.mean()?;
        let variance = self
            .samples
            .iter()
            .map(|s| (s.voltage - mean).powi(2))
            .sum::<f32>()
            / self.samples.len() as f32;
        Some(variance.sqrt())
    }

    /// Max minus min of the voltages
    pub fn range(&self) -> Option<f32> {
        let first = self.samples.front()?.voltage;
        let (min, max) = self
            .samples
            .iter()
            .fold((first, first), |(min, max), s| (min.min(s.voltage), max.max(s.voltage)));
        Some(max - min)
    }
}
