//! Battery chemistry profiles and voltage to state-of-charge conversion
//!
//! A [`ChemistryProfile`] describes one cell of a chemistry: the usable voltage
//! window and a discharge curve mapping cell voltage to percent. A [`BatteryPack`]
//! scales a profile by its series cell count.

use serde::{Deserialize, Serialize};

/// Largest series cell count considered during detection
pub const MAX_CELL_COUNT: u32 = 24;

/// Broad battery technology a profile belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChemistryFamily {
    /// Lithium-ion / lithium-polymer
    LithiumIon,
    /// Lithium iron phosphate
    LithiumIronPhosphate,
    /// Sealed or flooded lead-acid
    LeadAcid,
}

impl std::fmt::Display for ChemistryFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChemistryFamily::LithiumIon => write!(f, "lithium-ion"),
            ChemistryFamily::LithiumIronPhosphate => write!(f, "lithium-iron-phosphate"),
            ChemistryFamily::LeadAcid => write!(f, "lead-acid"),
        }
    }
}

/// One knot of a discharge curve: per-cell voltage and the percent it maps to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    /// Cell voltage in volts
    pub voltage: f32,
    /// State of charge at that voltage
    pub percent: f32,
}

const fn point(voltage: f32, percent: f32) -> CurvePoint {
    CurvePoint { voltage, percent }
}

/// Static descriptor of a single cell chemistry
#[derive(Debug, PartialEq)]
pub struct ChemistryProfile {
    /// Short name used in config, status and state files
    pub name: &'static str,
    /// Technology family
    pub family: ChemistryFamily,
    /// Empty cell voltage
    pub cell_min_voltage: f32,
    /// Full cell voltage
    pub cell_max_voltage: f32,
    /// Voltage/percent curve, strictly increasing by voltage
    pub curve: &'static [CurvePoint],
    /// Typical discharge rate in %/hour when nothing better is known
    pub default_discharge_rate: f32,
    /// Cells come in blocks of this size (lead-acid is sold as 6V blocks)
    pub cell_count_step: u32,
}

static LI_ION_CURVE: [CurvePoint; 10] = [
    point(3.00, 0.0),
    point(3.30, 5.0),
    point(3.50, 10.0),
    point(3.60, 20.0),
    point(3.70, 40.0),
    point(3.80, 60.0),
    point(3.90, 75.0),
    point(4.00, 85.0),
    point(4.10, 95.0),
    point(4.20, 100.0),
];

static LIFEPO4_CURVE: [CurvePoint; 8] = [
    point(3.00, 0.0),
    point(3.10, 10.0),
    point(3.20, 20.0),
    point(3.25, 40.0),
    point(3.28, 60.0),
    point(3.30, 75.0),
    point(3.33, 90.0),
    point(3.40, 100.0),
];

static LEAD_ACID_CURVE: [CurvePoint; 6] = [
    point(1.75, 0.0),
    point(1.85, 20.0),
    point(1.93, 40.0),
    point(1.99, 60.0),
    point(2.06, 80.0),
    point(2.15, 100.0),
];

/// Every chemistry the engine knows about
pub static PROFILES: [ChemistryProfile; 3] = [
    ChemistryProfile {
        name: "li-ion",
        family: ChemistryFamily::LithiumIon,
        cell_min_voltage: 3.0,
        cell_max_voltage: 4.2,
        curve: &LI_ION_CURVE,
        default_discharge_rate: 0.5,
        cell_count_step: 1,
    },
    ChemistryProfile {
        name: "lifepo4",
        family: ChemistryFamily::LithiumIronPhosphate,
        cell_min_voltage: 3.0,
        cell_max_voltage: 3.4,
        curve: &LIFEPO4_CURVE,
        default_discharge_rate: 0.3,
        cell_count_step: 1,
    },
    ChemistryProfile {
        name: "lead-acid",
        family: ChemistryFamily::LeadAcid,
        cell_min_voltage: 1.75,
        cell_max_voltage: 2.15,
        curve: &LEAD_ACID_CURVE,
        default_discharge_rate: 0.8,
        cell_count_step: 3,
    },
];

/// Look up a profile by name (case-insensitive)
pub fn find_profile(name: &str) -> Option<&'static ChemistryProfile> {
    let name = name.trim();
    PROFILES
        .iter()
        .find(|profile| profile.name.eq_ignore_ascii_case(name))
}

impl ChemistryProfile {
    /// Midpoint of the per-cell voltage window
    pub fn nominal_cell_voltage(&self) -> f32 {
        (self.cell_min_voltage + self.cell_max_voltage) / 2.0
    }

    /// Cell counts this chemistry can be built from, smallest first
    pub fn cell_counts(&self) -> impl Iterator<Item = u32> {
        let step = self.cell_count_step.max(1);
        (1..=MAX_CELL_COUNT / step).map(move |blocks| blocks * step)
    }

    /// Cell count whose nominal voltage is closest to `voltage`, clamped to the allowed counts
    pub fn closest_cell_count(&self, voltage: f32) -> u32 {
        let step = self.cell_count_step.max(1);
        let blocks = (voltage / (self.nominal_cell_voltage() * step as f32)).round();
        if blocks < 1.0 {
            step
        } else {
            ((blocks as u32) * step).min(MAX_CELL_COUNT / step * step)
        }
    }

    /// Cell count for a known chemistry: prefer a count whose scaled window contains
    /// the voltage (nearest to nominal if several do), else the closest nominal count
    pub fn cell_count_for_voltage(&'static self, voltage: f32) -> u32 {
        self.cell_counts()
            .map(|cells| BatteryPack::new(self, cells))
            .filter(|pack| pack.contains(voltage, 0.0))
            .min_by(|a, b| {
                let da = (a.nominal_voltage() - voltage).abs();
                let db = (b.nominal_voltage() - voltage).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|pack| pack.cell_count)
            .unwrap_or_else(|| self.closest_cell_count(voltage))
    }
}

/// A chemistry profile scaled by a series cell count
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryPack {
    /// Cell chemistry
    pub profile: &'static ChemistryProfile,
    /// Number of cells in series (always >= 1)
    pub cell_count: u32,
}

impl BatteryPack {
    /// Create a pack; a zero cell count is raised to one
    pub fn new(profile: &'static ChemistryProfile, cell_count: u32) -> Self {
        Self {
            profile,
            cell_count: cell_count.max(1),
        }
    }

    /// Chemistry name of the pack
    pub fn chemistry(&self) -> &'static str {
        self.profile.name
    }

    /// Empty pack voltage
    pub fn scaled_min_voltage(&self) -> f32 {
        self.profile.cell_min_voltage * self.cell_count as f32
    }

    /// Full pack voltage
    pub fn scaled_max_voltage(&self) -> f32 {
        self.profile.cell_max_voltage * self.cell_count as f32
    }

    /// Width of the pack voltage window
    pub fn scaled_span(&self) -> f32 {
        self.scaled_max_voltage() - self.scaled_min_voltage()
    }

    /// Midpoint of the pack voltage window
    pub fn nominal_voltage(&self) -> f32 {
        self.profile.nominal_cell_voltage() * self.cell_count as f32
    }

    /// Whether `voltage` lies within the scaled window widened by `tolerance` on both sides
    pub fn contains(&self, voltage: f32, tolerance: f32) -> bool {
        voltage >= self.scaled_min_voltage() - tolerance
            && voltage <= self.scaled_max_voltage() + tolerance
    }

    /// Key used for per-pack historical averages, e.g. `li-ion_3cells`
    pub fn history_key(&self) -> String {
        format!("{}_{}cells", self.profile.name, self.cell_count)
    }

    /// State of charge for a pack voltage
    pub fn voltage_to_percent(&self, voltage: f32) -> f32 {
        percent_for_voltage(self.profile.curve, voltage / self.cell_count as f32)
    }
}

impl std::fmt::Display for BatteryPack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}cells ({:.1}-{:.1}V)",
            self.profile.name,
            self.cell_count,
            self.scaled_min_voltage(),
            self.scaled_max_voltage()
        )
    }
}

/// Map a cell voltage onto a discharge curve.
///
/// Below the first knot the first percent is returned, above the last knot the last
/// percent; in between the bracketing interval is found by binary search and linearly
/// interpolated. The result is always within `[0, 100]`.
pub fn percent_for_voltage(curve: &[CurvePoint], voltage: f32) -> f32 {
    let (first, last) = match (curve.first(), curve.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return 0.0,
    };

    if voltage <= first.voltage {
        return first.percent.clamp(0.0, 100.0);
    }
    if voltage >= last.voltage {
        return last.percent.clamp(0.0, 100.0);
    }

    // Index of the first knot strictly above the voltage; >= 1 because of the guards above
    let upper = curve.partition_point(|p| p.voltage <= voltage);
    let lo = curve[upper - 1];
    let hi = curve[upper];

    let span = hi.voltage - lo.voltage;
    if span <= 0.0 {
        return lo.percent.clamp(0.0, 100.0);
    }

    let fraction = (voltage - lo.voltage) / span;
    (lo.percent + fraction * (hi.percent - lo.percent)).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn li_ion() -> &'static ChemistryProfile {
        find_profile("li-ion").unwrap()
    }

    #[test]
    fn test_profiles_have_valid_curves() {
        for profile in PROFILES.iter() {
            assert!(profile.curve.len() >= 2, "{} curve too short", profile.name);
            assert!(
                profile.curve.windows(2).all(|w| w[0].voltage < w[1].voltage),
                "{} curve not strictly increasing",
                profile.name
            );
            assert_eq!(profile.curve[0].voltage, profile.cell_min_voltage);
            assert_eq!(profile.curve.last().unwrap().voltage, profile.cell_max_voltage);
        }
    }

    #[test]
    fn test_percent_at_knots() {
        for profile in PROFILES.iter() {
            for knot in profile.curve {
                let percent = percent_for_voltage(profile.curve, knot.voltage);
                assert!((percent - knot.percent).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_percent_monotonic_and_bounded() {
        let pack = BatteryPack::new(li_ion(), 3);
        let mut previous = -1.0;
        let mut voltage = 7.0;
        while voltage < 14.0 {
            let percent = pack.voltage_to_percent(voltage);
            assert!((0.0..=100.0).contains(&percent));
            assert!(percent >= previous, "not monotonic at {voltage}");
            previous = percent;
            voltage += 0.05;
        }
    }

    #[test]
    fn test_percent_clamps_outside_curve() {
        let pack = BatteryPack::new(li_ion(), 1);
        assert_eq!(pack.voltage_to_percent(2.0), 0.0);
        assert_eq!(pack.voltage_to_percent(5.0), 100.0);
    }

    #[test]
    fn test_percent_interpolates() {
        // Halfway between 3.7V (40%) and 3.8V (60%)
        let percent = percent_for_voltage(li_ion().curve, 3.75);
        assert!((percent - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_degenerate_curves() {
        assert_eq!(percent_for_voltage(&[], 3.7), 0.0);
        let flat = [point(3.0, 10.0), point(3.0, 90.0)];
        assert_eq!(percent_for_voltage(&flat, 2.9), 10.0);
    }

    #[test]
    fn test_scaled_range() {
        let pack = BatteryPack::new(find_profile("LiFePO4").unwrap(), 2);
        assert!((pack.scaled_min_voltage() - 6.0).abs() < 1e-4);
        assert!((pack.scaled_max_voltage() - 6.8).abs() < 1e-4);
        assert!(pack.contains(6.6, 0.0));
        assert!(!pack.contains(7.0, 0.0));
        assert!(pack.contains(7.0, 0.5));
        assert_eq!(pack.history_key(), "lifepo4_2cells");
    }

    #[test]
    fn test_cell_count_for_voltage() {
        assert_eq!(li_ion().cell_count_for_voltage(3.9), 1);
        assert_eq!(li_ion().cell_count_for_voltage(11.1), 3);
        let lead = find_profile("lead-acid").unwrap();
        assert_eq!(lead.cell_count_for_voltage(12.4), 6);
        // Outside every window falls back to the nearest nominal count
        assert_eq!(li_ion().cell_count_for_voltage(0.5), 1);
        assert_eq!(lead.closest_cell_count(1.0), 3);
    }

    #[test]
    fn test_lead_acid_uses_blocks() {
        let lead = find_profile("lead-acid").unwrap();
        let counts: Vec<u32> = lead.cell_counts().take(3).collect();
        assert_eq!(counts, vec![3, 6, 9]);
        assert_eq!(lead.cell_counts().last(), Some(24));
        assert_eq!(li_ion().cell_counts().count(), MAX_CELL_COUNT as usize);
    }
}
