//! Battery chemistry and cell-count detection
//!
//! Three ways to arrive at a [`BatteryPack`]:
//! - manual configuration, trusted unconditionally
//! - immediate match of a single voltage against every profile and cell count
//! - range-based scoring of the observed voltage envelope once enough readings exist
//!
//! An established pack is re-detected only when the live voltage leaves its scaled
//! window by more than [`REDETECT_TOLERANCE`], and the replacement must fit the live
//! voltage within [`ACCEPT_TOLERANCE`].

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::chemistry::{find_profile, BatteryPack, ChemistryFamily, PROFILES};
use crate::error::DetectionError;

/// Highest voltage accepted for auto-detection
pub const MAX_DETECTION_VOLTAGE: f32 = 60.0;

/// Readings required before range-based detection
pub const RANGE_DETECTION_MIN_READINGS: u32 = 20;

/// Distance outside a pack's window that triggers re-detection
pub const REDETECT_TOLERANCE: f32 = 1.0;

/// Distance outside a new pack's window still accepted for the live voltage
pub const ACCEPT_TOLERANCE: f32 = 0.5;

/// Tolerance applied to profile windows when scoring an observed envelope
const RANGE_SCORE_TOLERANCE: f32 = 1.0;

/// Minimum envelope width used when scoring, so a flat signal still has extent
const MIN_ENVELOPE_WIDTH: f32 = 0.1;

/// Where detection currently stands
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionState {
    /// Nothing observed yet
    Undetected,
    /// Readings are being collected but no pack matched
    Detecting {
        /// Readings seen so far
        readings: u32,
    },
    /// A pack is selected
    Detected(BatteryPack),
}

impl DetectionState {
    /// The selected pack, if any
    pub fn pack(&self) -> Option<&BatteryPack> {
        match self {
            DetectionState::Detected(pack) => Some(pack),
            _ => None,
        }
    }
}

/// Observed min/max voltage envelope
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VoltageRange {
    pub min: f32,
    pub max: f32,
    /// Number of voltages folded in
    pub readings: u32,
}

impl VoltageRange {
    /// Fold one voltage into the envelope
    pub fn observe(&mut self, voltage: f32) {
        if self.readings == 0 {
            self.min = voltage;
            self.max = voltage;
        } else {
            self.min = self.min.min(voltage);
            self.max = self.max.max(voltage);
        }
        self.readings = self.readings.saturating_add(1);
    }

    pub fn is_empty(&self) -> bool {
        self.readings == 0
    }

    pub fn width(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.max - self.min
        }
    }
}

/// Result of feeding one voltage to the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionOutcome {
    /// Pack unchanged
    Unchanged(BatteryPack),
    /// A pack was selected where none existed before
    Detected(BatteryPack),
    /// The pack was replaced; history derived from the old pack is invalid
    Changed {
        previous: BatteryPack,
        current: BatteryPack,
    },
}

impl DetectionOutcome {
    pub fn pack(&self) -> BatteryPack {
        match self {
            DetectionOutcome::Unchanged(pack) | DetectionOutcome::Detected(pack) => *pack,
            DetectionOutcome::Changed { current, .. } => *current,
        }
    }
}

/// Manual chemistry settings handed to the detector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManualSelection {
    /// Whether manual configuration is enabled
    pub enabled: bool,
    /// Chemistry name, if any
    pub chemistry: Option<String>,
    /// Fixed cell count; derived from voltage when absent
    pub cell_count_hint: Option<u32>,
}

impl ManualSelection {
    /// True only when enabled with a non-empty chemistry name
    pub fn is_active(&self) -> bool {
        self.enabled
            && self
                .chemistry
                .as_deref()
                .map(|c| !c.trim().is_empty())
                .unwrap_or(false)
    }
}

/// Identifies the connected pack
#[derive(Debug, Clone)]
pub struct ChemistryDetector {
    state: DetectionState,
    range: VoltageRange,
    manual: ManualSelection,
    /// Reading count at the last range-based re-check
    last_range_check: u32,
}

impl Default for ChemistryDetector {
    fn default() -> Self {
        Self::new(ManualSelection::default())
    }
}

impl ChemistryDetector {
    pub fn new(manual: ManualSelection) -> Self {
        Self {
            state: DetectionState::Undetected,
            range: VoltageRange::default(),
            manual,
            last_range_check: 0,
        }
    }

    pub fn state(&self) -> &DetectionState {
        &self.state
    }

    pub fn pack(&self) -> Option<&BatteryPack> {
        self.state.pack()
    }

    pub fn range(&self) -> &VoltageRange {
        &self.range
    }

    pub fn manual(&self) -> &ManualSelection {
        &self.manual
    }

    /// Whether the pack comes from manual configuration
    pub fn is_manual(&self) -> bool {
        self.manual.is_active()
    }

    /// Restore persisted range statistics
    pub fn restore_range(&mut self, range: VoltageRange) {
        self.range = range;
        self.last_range_check = range.readings;
    }

    /// Restore a persisted pack; ignored while manual configuration is active
    pub fn restore_pack(&mut self, pack: BatteryPack) -> bool {
        if self.is_manual() {
            return false;
        }
        self.state = DetectionState::Detected(pack);
        true
    }

    /// Seed the range with historical voltages and detect from their average
    pub fn seed_from_log(&mut self, voltages: &[f32]) -> Result<BatteryPack, DetectionError> {
        if voltages.is_empty() {
            return Err(DetectionError::InsufficientData {
                readings: 0,
                required: 1,
            });
        }
        let average = voltages.iter().sum::<f32>() / voltages.len() as f32;
        let pack = detect_immediate(average)?;
        for voltage in voltages {
            self.range.observe(*voltage);
        }
        self.last_range_check = self.range.readings;
        self.state = DetectionState::Detected(pack);
        Ok(pack)
    }

    /// Replace the manual settings.
    ///
    /// Switching to a different manual chemistry drops the current pack; switching back to
    /// auto-detection resets detection state entirely. Returns true if the pack was dropped.
    pub fn apply_manual(&mut self, manual: ManualSelection) -> bool {
        if manual == self.manual {
            return false;
        }

        let was_manual = self.is_manual();
        self.manual = manual;

        if self.is_manual() {
            self.state = DetectionState::Undetected;
            return true;
        }

        if was_manual {
            log::info!("Manual battery configuration cleared, returning to auto-detection");
            self.reset();
            return true;
        }
        false
    }

    /// Forget the pack and the voltage envelope
    pub fn reset(&mut self) {
        self.state = DetectionState::Undetected;
        self.range = VoltageRange::default();
        self.last_range_check = 0;
    }

    /// Ensure a pack is known for `voltage`
    pub fn ensure_pack(&mut self, voltage: f32) -> Result<DetectionOutcome, DetectionError> {
        let previous = self.pack().copied();

        if self.manual.enabled {
            if self.manual.is_active() {
                return self.ensure_manual_pack(voltage, previous);
            }
            log::warn!(
                "Manual configuration enabled but no battery chemistry specified - falling back to auto-detection"
            );
            self.manual.enabled = false;
        }

        self.range.observe(voltage);

        match previous {
            Some(pack) => Ok(self.check_existing(pack, voltage)),
            None => self.detect_initial(voltage),
        }
    }

    fn ensure_manual_pack(
        &mut self,
        voltage: f32,
        previous: Option<BatteryPack>,
    ) -> Result<DetectionOutcome, DetectionError> {
        let name = self.manual.chemistry.clone().unwrap_or_default();
        let profile =
            find_profile(&name).ok_or_else(|| DetectionError::UnknownChemistry(name.clone()))?;

        // A manual pack keeps its cell count once chosen unless a hint fixes it
        let cell_count = match (self.manual.cell_count_hint, previous) {
            (Some(hint), _) if hint > 0 => hint,
            (_, Some(pack)) if pack.profile.name == profile.name => pack.cell_count,
            _ => profile.cell_count_for_voltage(voltage),
        };
        let pack = BatteryPack::new(profile, cell_count);
        self.state = DetectionState::Detected(pack);

        Ok(match previous {
            Some(prev) if prev == pack => DetectionOutcome::Unchanged(pack),
            Some(prev) => {
                log::info!("Manual battery changed from {} to {}", prev, pack);
                DetectionOutcome::Changed {
                    previous: prev,
                    current: pack,
                }
            }
            None => {
                log::info!("Using manually configured battery: {}", pack);
                DetectionOutcome::Detected(pack)
            }
        })
    }

    fn detect_initial(&mut self, voltage: f32) -> Result<DetectionOutcome, DetectionError> {
        match detect_immediate(voltage) {
            Ok(pack) => {
                log::info!("Auto-detected battery: {} based on voltage {:.2}V", pack, voltage);
                self.state = DetectionState::Detected(pack);
                self.last_range_check = self.range.readings;
                Ok(DetectionOutcome::Detected(pack))
            }
            Err(err) => {
                if self.range.readings >= RANGE_DETECTION_MIN_READINGS {
                    if let Some((pack, score)) = detect_from_range(&self.range) {
                        if pack.contains(voltage, ACCEPT_TOLERANCE) {
                            log::info!(
                                "Range-based detection selected {} (score {:.2}, observed {:.2}-{:.2}V)",
                                pack,
                                score,
                                self.range.min,
                                self.range.max
                            );
                            self.state = DetectionState::Detected(pack);
                            self.last_range_check = self.range.readings;
                            return Ok(DetectionOutcome::Detected(pack));
                        }
                    }
                }
                self.state = DetectionState::Detecting {
                    readings: self.range.readings,
                };
                Err(err)
            }
        }
    }

    fn check_existing(&mut self, pack: BatteryPack, voltage: f32) -> DetectionOutcome {
        if !pack.contains(voltage, REDETECT_TOLERANCE) {
            log::info!(
                "Voltage {:.2}V is outside expected range [{:.2}-{:.2}] for {}. Re-detecting...",
                voltage,
                pack.scaled_min_voltage() - REDETECT_TOLERANCE,
                pack.scaled_max_voltage() + REDETECT_TOLERANCE,
                pack
            );
            if let Ok(candidate) = detect_immediate(voltage) {
                if candidate.contains(voltage, ACCEPT_TOLERANCE) {
                    log::info!("Re-detected battery: {} (voltage {:.2}V)", candidate, voltage);
                    // The old envelope belongs to the previous battery
                    self.range = VoltageRange::default();
                    self.range.observe(voltage);
                    self.last_range_check = self.range.readings;
                    self.state = DetectionState::Detected(candidate);
                    return DetectionOutcome::Changed {
                        previous: pack,
                        current: candidate,
                    };
                }
            }
            return DetectionOutcome::Unchanged(pack);
        }

        // Periodic range-based re-check of an auto-detected pack
        if self.range.readings >= RANGE_DETECTION_MIN_READINGS
            && self.range.readings - self.last_range_check >= RANGE_DETECTION_MIN_READINGS
        {
            self.last_range_check = self.range.readings;
            if let Some((candidate, score)) = detect_from_range(&self.range) {
                let current_score = range_score(&pack, &self.range);
                if candidate != pack
                    && score > current_score + f32::EPSILON
                    && candidate.contains(voltage, ACCEPT_TOLERANCE)
                {
                    log::info!(
                        "Range-based detection corrected {} to {} (score {:.2} > {:.2})",
                        pack,
                        candidate,
                        score,
                        current_score
                    );
                    self.state = DetectionState::Detected(candidate);
                    return DetectionOutcome::Changed {
                        previous: pack,
                        current: candidate,
                    };
                }
            }
        }

        DetectionOutcome::Unchanged(pack)
    }
}

/// Tie-break order: narrower window first, then LiFePO4
fn compare_specificity(a: &BatteryPack, b: &BatteryPack) -> Ordering {
    let width = a
        .scaled_span()
        .partial_cmp(&b.scaled_span())
        .unwrap_or(Ordering::Equal);
    if (a.scaled_span() - b.scaled_span()).abs() > 1e-4 {
        return width;
    }
    let a_lfp = a.profile.family == ChemistryFamily::LithiumIronPhosphate;
    let b_lfp = b.profile.family == ChemistryFamily::LithiumIronPhosphate;
    b_lfp.cmp(&a_lfp)
}

/// Every profile/cell-count pack whose scaled window contains `voltage`
pub fn candidate_packs(voltage: f32) -> Vec<BatteryPack> {
    PROFILES
        .iter()
        .flat_map(|profile| profile.cell_counts().map(move |cells| BatteryPack::new(profile, cells)))
        .filter(|pack| pack.contains(voltage, 0.0))
        .collect()
}

/// Match a single voltage against every known pack, preferring the most specific one
pub fn detect_immediate(voltage: f32) -> Result<BatteryPack, DetectionError> {
    if voltage <= 0.0 {
        return Err(DetectionError::InvalidVoltage(voltage));
    }
    if voltage > MAX_DETECTION_VOLTAGE {
        return Err(DetectionError::AboveSafetyLimit(voltage));
    }

    candidate_packs(voltage)
        .into_iter()
        .min_by(compare_specificity)
        .ok_or_else(|| DetectionError::NoMatch {
            voltage,
            suggestions: suggestions(voltage),
        })
}

/// Nearest cell count per chemistry, for error messages
pub fn suggestions(voltage: f32) -> String {
    PROFILES
        .iter()
        .map(|profile| {
            let pack = BatteryPack::new(profile, profile.closest_cell_count(voltage));
            format!(
                "{} {}cells: {:.1}-{:.1}V",
                profile.name,
                pack.cell_count,
                pack.scaled_min_voltage(),
                pack.scaled_max_voltage()
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Score how well a pack explains an observed envelope.
///
/// The envelope is compared against the pack window widened by one volt on each side
/// (fraction of the envelope covered), plus half the fraction covered by the unwidened
/// window. Zero means no overlap at all.
pub fn range_score(pack: &BatteryPack, range: &VoltageRange) -> f32 {
    if range.is_empty() {
        return 0.0;
    }

    let centre = (range.min + range.max) / 2.0;
    let half_width = range.width().max(MIN_ENVELOPE_WIDTH) / 2.0;
    let (low, high) = (centre - half_width, centre + half_width);
    let width = high - low;

    let overlap = |min: f32, max: f32| (high.min(max) - low.max(min)).max(0.0) / width;

    let tolerant = overlap(
        pack.scaled_min_voltage() - RANGE_SCORE_TOLERANCE,
        pack.scaled_max_voltage() + RANGE_SCORE_TOLERANCE,
    );
    if tolerant <= 0.0 {
        return 0.0;
    }
    tolerant + 0.5 * overlap(pack.scaled_min_voltage(), pack.scaled_max_voltage())
}

/// Highest-scoring pack for the observed envelope, ties broken by specificity
pub fn detect_from_range(range: &VoltageRange) -> Option<(BatteryPack, f32)> {
    if range.is_empty() || range.min <= 0.0 || range.max > MAX_DETECTION_VOLTAGE {
        return None;
    }

    PROFILES
        .iter()
        .flat_map(|profile| profile.cell_counts().map(move |cells| BatteryPack::new(profile, cells)))
        .map(|pack| (pack, range_score(&pack, range)))
        .filter(|(_, score)| *score > 0.0)
        .min_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| compare_specificity(a, b))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual(chemistry: &str) -> ManualSelection {
        ManualSelection {
            enabled: true,
            chemistry: Some(chemistry.to_string()),
            cell_count_hint: None,
        }
    }

    #[test]
    fn test_single_li_ion_cell() {
        let pack = detect_immediate(3.86).unwrap();
        assert_eq!(pack.chemistry(), "li-ion");
        assert_eq!(pack.cell_count, 1);
    }

    #[test]
    fn test_prefers_narrow_lifepo4() {
        let pack = detect_immediate(6.6).unwrap();
        assert_eq!(pack.chemistry(), "lifepo4");
        assert_eq!(pack.cell_count, 2);
    }

    #[test]
    fn test_equal_width_prefers_lifepo4() {
        let lfp = BatteryPack::new(find_profile("lifepo4").unwrap(), 3);
        let lead = BatteryPack::new(find_profile("lead-acid").unwrap(), 3);
        // Both 1.2V wide
        assert!((lfp.scaled_span() - lead.scaled_span()).abs() < 1e-4);
        assert_eq!(compare_specificity(&lfp, &lead), Ordering::Less);
        assert_eq!(compare_specificity(&lead, &lfp), Ordering::Greater);
    }

    #[test]
    fn test_safety_limits() {
        assert_eq!(detect_immediate(0.0), Err(DetectionError::InvalidVoltage(0.0)));
        assert_eq!(
            detect_immediate(75.0),
            Err(DetectionError::AboveSafetyLimit(75.0))
        );
    }

    #[test]
    fn test_no_match_lists_suggestions() {
        // Below every single-cell window
        match detect_immediate(2.5) {
            Err(DetectionError::NoMatch { suggestions, .. }) => {
                assert!(suggestions.contains("li-ion 1cells"));
                assert!(suggestions.contains("lead-acid 3cells"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_detection_stable_within_range() {
        let mut detector = ChemistryDetector::default();
        let first = detector.ensure_pack(4.1).unwrap();
        assert!(matches!(first, DetectionOutcome::Detected(_)));

        for i in 0..60 {
            let voltage = 4.1 - (i as f32) * 0.01;
            let outcome = detector.ensure_pack(voltage).unwrap();
            assert_eq!(outcome, DetectionOutcome::Unchanged(first.pack()));
        }
    }

    #[test]
    fn test_redetects_on_battery_swap() {
        let mut detector = ChemistryDetector::default();
        detector.ensure_pack(3.9).unwrap();

        let outcome = detector.ensure_pack(6.6).unwrap();
        match outcome {
            DetectionOutcome::Changed { previous, current } => {
                assert_eq!(previous.chemistry(), "li-ion");
                assert_eq!(current.chemistry(), "lifepo4");
                assert_eq!(current.cell_count, 2);
            }
            other => panic!("expected change, got {:?}", other),
        }
        assert_eq!(detector.range().readings, 1);
    }

    #[test]
    fn test_small_excursion_keeps_pack() {
        let mut detector = ChemistryDetector::default();
        let pack = detector.ensure_pack(3.9).unwrap().pack();
        // Inside max + 1V tolerance
        assert_eq!(detector.ensure_pack(5.0).unwrap(), DetectionOutcome::Unchanged(pack));
    }

    #[test]
    fn test_failed_detection_is_detecting() {
        let mut detector = ChemistryDetector::default();
        assert!(detector.ensure_pack(2.5).is_err());
        assert_eq!(*detector.state(), DetectionState::Detecting { readings: 1 });
    }

    #[test]
    fn test_range_detection_after_enough_readings() {
        let mut detector = ChemistryDetector::default();
        // 2.6-2.9V matches nothing immediately, range scoring picks the closest pack
        let mut result = Err(DetectionError::InvalidVoltage(0.0));
        for i in 0..RANGE_DETECTION_MIN_READINGS {
            let voltage = 2.6 + (i % 4) as f32 * 0.1;
            result = detector.ensure_pack(voltage);
            if i + 1 < RANGE_DETECTION_MIN_READINGS {
                assert!(result.is_err());
            }
        }
        let pack = result.unwrap().pack();
        assert!(pack.contains(2.9, ACCEPT_TOLERANCE));
    }

    #[test]
    fn test_range_score_prefers_containing_pack() {
        let mut range = VoltageRange::default();
        for v in [12.2, 12.5, 12.9, 13.2] {
            range.observe(v);
        }
        let lfp4 = BatteryPack::new(find_profile("lifepo4").unwrap(), 4);
        let li3 = BatteryPack::new(find_profile("li-ion").unwrap(), 3);
        let li1 = BatteryPack::new(find_profile("li-ion").unwrap(), 1);
        assert!(range_score(&lfp4, &range) > range_score(&li3, &range));
        assert_eq!(range_score(&li1, &range), 0.0);
        let (best, _) = detect_from_range(&range).unwrap();
        assert_eq!(best, lfp4);
    }

    #[test]
    fn test_manual_pack_used_unconditionally() {
        let mut detector = ChemistryDetector::new(manual("lead-acid"));
        let pack = detector.ensure_pack(12.4).unwrap().pack();
        assert_eq!(pack.chemistry(), "lead-acid");
        assert_eq!(pack.cell_count, 6);

        // Far outside the window, still manual
        let outcome = detector.ensure_pack(3.0).unwrap();
        assert_eq!(outcome, DetectionOutcome::Unchanged(pack));
    }

    #[test]
    fn test_manual_cell_hint() {
        let mut selection = manual("li-ion");
        selection.cell_count_hint = Some(4);
        let mut detector = ChemistryDetector::new(selection);
        assert_eq!(detector.ensure_pack(12.0).unwrap().pack().cell_count, 4);
    }

    #[test]
    fn test_manual_unknown_chemistry() {
        let mut detector = ChemistryDetector::new(manual("nickel-iron"));
        assert_eq!(
            detector.ensure_pack(12.0),
            Err(DetectionError::UnknownChemistry("nickel-iron".to_string()))
        );
    }

    #[test]
    fn test_manual_without_chemistry_falls_back() {
        let mut detector = ChemistryDetector::new(ManualSelection {
            enabled: true,
            chemistry: None,
            cell_count_hint: None,
        });
        let pack = detector.ensure_pack(3.86).unwrap().pack();
        assert_eq!(pack.chemistry(), "li-ion");
        assert!(!detector.manual().enabled);
    }

    #[test]
    fn test_apply_manual_transitions() {
        let mut detector = ChemistryDetector::default();
        detector.ensure_pack(3.86).unwrap();

        assert!(detector.apply_manual(manual("lifepo4")));
        assert!(detector.pack().is_none());
        assert_eq!(detector.ensure_pack(3.3).unwrap().pack().chemistry(), "lifepo4");

        // Back to auto-detect resets everything
        assert!(detector.apply_manual(ManualSelection::default()));
        assert_eq!(*detector.state(), DetectionState::Undetected);
        assert!(detector.range().is_empty());

        // Identical settings are a no-op
        assert!(!detector.apply_manual(ManualSelection::default()));
    }

    #[test]
    fn test_restore_pack_ignored_when_manual() {
        let pack = BatteryPack::new(find_profile("li-ion").unwrap(), 2);
        let mut auto = ChemistryDetector::default();
        assert!(auto.restore_pack(pack));
        assert_eq!(auto.pack(), Some(&pack));

        let mut manual_detector = ChemistryDetector::new(manual("lifepo4"));
        assert!(!manual_detector.restore_pack(pack));
        assert!(manual_detector.pack().is_none());
    }

    #[test]
    fn test_seed_from_log() {
        let mut detector = ChemistryDetector::default();
        let pack = detector.seed_from_log(&[3.80, 3.85, 3.90, 3.88, 3.83]).unwrap();
        assert_eq!(pack.chemistry(), "li-ion");
        assert_eq!(detector.range().readings, 5);
        assert!((detector.range().min - 3.80).abs() < 1e-6);
    }
}
