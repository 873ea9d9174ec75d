//! Ordered discharge-rate estimation strategies
//!
//! Each tier of the fallback chain is one [`RateEstimationStrategy`]. The chain is
//! walked in order and the first strategy producing a positive rate wins; its
//! [`EstimationMethod`] travels with the rate into hysteresis and confidence scoring.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::chemistry::BatteryPack;
use super::discharge::{DischargeTracker, MAX_DISCHARGE_RATE};
use super::smoothing::RateSmoother;

/// History entries required by the sampled and voltage-based tiers
const FALLBACK_MIN_ENTRIES: usize = 10;

/// History entries required before the short-term rate is trusted on its own
const SHORT_TERM_MIN_POINTS: usize = 15;

/// Smallest short-term rate treated as meaningful
const SHORT_TERM_MIN_RATE: f32 = 0.01;

/// Step between sampled-interval picks
const SAMPLE_STEP_MINUTES: i64 = 10;

/// How a rate was obtained, ordered from least to most trustworthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    ChemistryDefault,
    Historical,
    VoltageBased,
    SampledIntervals,
    Averaged,
    ShortTerm,
    MedianFiltered,
}

impl EstimationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimationMethod::ChemistryDefault => "chemistry_default",
            EstimationMethod::Historical => "historical",
            EstimationMethod::VoltageBased => "voltage_based",
            EstimationMethod::SampledIntervals => "sampled_intervals",
            EstimationMethod::Averaged => "averaged",
            EstimationMethod::ShortTerm => "short_term",
            EstimationMethod::MedianFiltered => "median_filtered",
        }
    }
}

impl fmt::Display for EstimationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a strategy may look at
#[derive(Debug, Clone, Copy)]
pub struct RateContext<'a> {
    pub now: DateTime<Utc>,
    pub tracker: &'a DischargeTracker,
    pub smoother: &'a RateSmoother,
    pub pack: Option<&'a BatteryPack>,
}

/// One tier of the fallback chain
pub trait RateEstimationStrategy: Send + Sync {
    /// Tag attached to rates from this tier
    fn method(&self) -> EstimationMethod;

    /// A positive rate in %/hour, or `None` to defer to the next tier
    fn estimate(&self, ctx: &RateContext<'_>) -> Option<f32>;
}

/// A rate with its provenance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSelection {
    pub rate: f32,
    pub method: EstimationMethod,
}

/// Median of the smoothed-rate window
pub struct MedianFiltered;

impl RateEstimationStrategy for MedianFiltered {
    fn method(&self) -> EstimationMethod {
        EstimationMethod::MedianFiltered
    }

    fn estimate(&self, ctx: &RateContext<'_>) -> Option<f32> {
        ctx.smoother.window_median()
    }
}

/// Short-term statistic, once enough points back it
pub struct ShortTerm;

impl RateEstimationStrategy for ShortTerm {
    fn method(&self) -> EstimationMethod {
        EstimationMethod::ShortTerm
    }

    fn estimate(&self, ctx: &RateContext<'_>) -> Option<f32> {
        let stats = ctx.tracker.statistics();
        (stats.short_term_rate > SHORT_TERM_MIN_RATE && stats.data_points >= SHORT_TERM_MIN_POINTS)
            .then_some(stats.short_term_rate)
    }
}

/// Weighted multi-window average
pub struct Averaged;

impl RateEstimationStrategy for Averaged {
    fn method(&self) -> EstimationMethod {
        EstimationMethod::Averaged
    }

    fn estimate(&self, ctx: &RateContext<'_>) -> Option<f32> {
        Some(ctx.tracker.statistics().average_rate)
    }
}

/// Samples picked at fixed steps back from now
pub struct SampledIntervals;

impl RateEstimationStrategy for SampledIntervals {
    fn method(&self) -> EstimationMethod {
        EstimationMethod::SampledIntervals
    }

    fn estimate(&self, ctx: &RateContext<'_>) -> Option<f32> {
        if ctx.tracker.len() < FALLBACK_MIN_ENTRIES {
            return None;
        }
        match ctx
            .tracker
            .sampled_rate(ctx.now, Duration::minutes(SAMPLE_STEP_MINUTES))
        {
            Ok(rate) if rate <= MAX_DISCHARGE_RATE => Some(rate),
            Ok(rate) => {
                log::debug!("Sampled-interval rate {:.3}%/hour rejected", rate);
                None
            }
            Err(err) => {
                log::debug!("Sampled-interval rate unavailable: {}", err);
                None
            }
        }
    }
}

/// Percent-curve drop between older and newest voltages
pub struct VoltageBased;

impl RateEstimationStrategy for VoltageBased {
    fn method(&self) -> EstimationMethod {
        EstimationMethod::VoltageBased
    }

    fn estimate(&self, ctx: &RateContext<'_>) -> Option<f32> {
        if ctx.tracker.len() < FALLBACK_MIN_ENTRIES {
            return None;
        }
        ctx.tracker
            .voltage_based_rate(ctx.now, ctx.pack)
            .map_err(|err| log::debug!("Voltage-based rate unavailable: {}", err))
            .ok()
            .filter(|rate| *rate <= MAX_DISCHARGE_RATE)
    }
}

/// Long-run average recorded for this pack before earlier charges
pub struct Historical;

impl RateEstimationStrategy for Historical {
    fn method(&self) -> EstimationMethod {
        EstimationMethod::Historical
    }

    fn estimate(&self, ctx: &RateContext<'_>) -> Option<f32> {
        let pack = ctx.pack?;
        ctx.tracker.historical_average(&pack.history_key())
    }
}

/// Typical rate for the chemistry
pub struct ChemistryDefault;

impl RateEstimationStrategy for ChemistryDefault {
    fn method(&self) -> EstimationMethod {
        EstimationMethod::ChemistryDefault
    }

    fn estimate(&self, ctx: &RateContext<'_>) -> Option<f32> {
        ctx.pack.map(|pack| pack.profile.default_discharge_rate)
    }
}

/// The full chain, best tier first
pub fn default_strategies() -> Vec<Box<dyn RateEstimationStrategy>> {
    vec![
        Box::new(MedianFiltered),
        Box::new(ShortTerm),
        Box::new(Averaged),
        Box::new(SampledIntervals),
        Box::new(VoltageBased),
        Box::new(Historical),
        Box::new(ChemistryDefault),
    ]
}

/// Walk the chain and return the first positive rate
pub fn select_rate(
    strategies: &[Box<dyn RateEstimationStrategy>],
    ctx: &RateContext<'_>,
) -> Option<RateSelection> {
    strategies.iter().find_map(|strategy| {
        strategy
            .estimate(ctx)
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .map(|rate| {
                log::debug!("Discharge rate {:.3}%/hour from {}", rate, strategy.method());
                RateSelection {
                    rate,
                    method: strategy.method(),
                }
            })
    })
}
