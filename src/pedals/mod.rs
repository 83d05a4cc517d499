pub(crate) mod analyzer;
pub(crate) mod clutch_noise_detector;
pub(crate) mod deadzone_estimator;
pub(crate) mod gas_activity_tracker;
pub(crate) mod gas_drift_detector;

pub use analyzer::{GasState, PedalAnalyzer};
pub use clutch_noise_detector::{ClutchNoiseDetector, ClutchState};
pub use deadzone_estimator::{DeadzoneEstimator, EstimatorOutcome, EstimatorState};
pub use gas_activity_tracker::{ActivityTransition, GasActivityTracker};
pub use gas_drift_detector::GasDriftDetector;

use serde::{Deserialize, Serialize};

use crate::config::{ClutchConfig, GasConfig};

/// One device read, axis values as reported by the hardware.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub raw_gas: u32,
    pub raw_clutch: u32,
    /// Monotonic milliseconds
    pub timestamp_ms: u64,
}

/// Axis values in travel space: 0 is idle, axis max is fully pressed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedSample {
    pub gas: u32,
    pub clutch: u32,
    pub timestamp_ms: u64,
}

impl NormalizedSample {
    pub fn from_sample(sample: &Sample, axis_max: u32, invert: bool) -> Self {
        Self {
            gas: normalize(sample.raw_gas, axis_max, invert),
            clutch: normalize(sample.raw_clutch, axis_max, invert),
            timestamp_ms: sample.timestamp_ms,
        }
    }
}

/// Maps a raw axis reading into travel space.
///
/// Inverted hardware (idle near `axis_max`) is mirrored around `axis_max`.
/// Readings above `axis_max` saturate at idle instead of wrapping.
#[inline]
pub fn normalize(raw: u32, axis_max: u32, invert: bool) -> u32 {
    if invert {
        return axis_max.saturating_sub(raw);
    }
    raw
}

/// Integer percentage of `value` over `axis_max`, truncated. A zero axis reads as 0%.
#[inline]
pub fn percent_of(value: u32, axis_max: u32) -> u32 {
    if axis_max == 0 {
        return 0;
    }
    (u64::from(value) * 100 / u64::from(axis_max)) as u32
}

/// Absolute axis thresholds derived from the percentage config for one device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisThresholds {
    pub axis_max: u32,
    /// Highest gas value still inside the idle band.
    pub gas_idle_max: u32,
    /// Lowest gas value counted as full throttle.
    pub gas_full_min: u32,
    /// Clutch stickiness tolerance in axis units.
    pub axis_margin: u32,
}

impl AxisThresholds {
    pub fn new(axis_max: u32, gas: &GasConfig, clutch: &ClutchConfig) -> Self {
        Self {
            axis_max,
            gas_idle_max: scale_percent(axis_max, gas.deadzone_in_percent),
            gas_full_min: scale_percent(axis_max, gas.deadzone_out_percent),
            axis_margin: scale_percent(axis_max, clutch.margin_percent),
        }
    }

    pub(crate) fn set_full_throttle_percent(&mut self, percent: u32) {
        self.gas_full_min = scale_percent(self.axis_max, percent);
    }
}

fn scale_percent(axis_max: u32, percent: u32) -> u32 {
    (u64::from(axis_max) * u64::from(percent) / 100) as u32
}

/// Something the analyzer wants the user to know about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PedalEvent {
    ClutchNoise {
        clutch_value: u32,
    },
    GasDrift {
        percent_reached: u32,
    },
    /// The learned gas maximum dropped; carries the suggested full throttle percentage.
    EstimateDecreased {
        estimate_percent: u32,
        /// Rate limited: false when the drop happened too soon after the last report.
        report: bool,
    },
    AutoAdjusted {
        deadzone_out_percent: u32,
        minimum_percent: u32,
    },
}

impl PedalEvent {
    /// Text for the notifier, `None` for events that only surface in telemetry.
    pub fn message(&self) -> Option<String> {
        match self {
            PedalEvent::ClutchNoise { .. } => Some("Clutch noise detected".to_string()),
            PedalEvent::GasDrift { percent_reached } => Some(format!(
                "Gas pedal drift. Only {percent_reached} percent reached"
            )),
            PedalEvent::EstimateDecreased {
                estimate_percent,
                report: true,
            } => Some(format!("New deadzone estimation: {estimate_percent}")),
            PedalEvent::EstimateDecreased { report: false, .. } => None,
            PedalEvent::AutoAdjusted {
                deadzone_out_percent,
                minimum_percent,
            } => Some(format!(
                "gas-deadzone-out updated to {deadzone_out_percent} (min={minimum_percent})"
            )),
        }
    }

    /// Whether the notifier should also log the text. Drift and auto-adjust
    /// already have their own log lines.
    pub fn echo_to_log(&self) -> bool {
        matches!(
            self,
            PedalEvent::ClutchNoise { .. } | PedalEvent::EstimateDecreased { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_thresholds_for_raw_axis() {
        let thresholds =
            AxisThresholds::new(1023, &GasConfig::default(), &ClutchConfig::default());
        assert_eq!(thresholds.gas_idle_max, 51);
        assert_eq!(thresholds.gas_full_min, 951);
        assert_eq!(thresholds.axis_margin, 51);
    }

    #[test]
    fn test_thresholds_for_16_bit_axis_do_not_overflow() {
        let gas = GasConfig {
            deadzone_out_percent: 100,
            ..Default::default()
        };
        let thresholds = AxisThresholds::new(u32::MAX, &gas, &ClutchConfig::default());
        assert_eq!(thresholds.gas_full_min, u32::MAX);
    }

    #[test]
    fn test_percent_of_truncates() {
        assert_eq!(percent_of(500, 1023), 48);
        assert_eq!(percent_of(150, 1023), 14);
        assert_eq!(percent_of(1023, 1023), 100);
        assert_eq!(percent_of(500, 0), 0);
    }

    #[test]
    fn test_normalize_inverted_fanatec_reading() {
        assert_eq!(normalize(1023, 1023, true), 0);
        assert_eq!(normalize(0, 1023, true), 1023);
        assert_eq!(normalize(2000, 1023, true), 0);
    }

    #[test]
    fn test_only_clutch_and_estimate_alerts_echo() {
        assert!(PedalEvent::ClutchNoise { clutch_value: 40 }.echo_to_log());
        assert!(
            PedalEvent::EstimateDecreased {
                estimate_percent: 87,
                report: true
            }
            .echo_to_log()
        );
        assert!(!PedalEvent::GasDrift { percent_reached: 48 }.echo_to_log());
        assert!(
            !PedalEvent::AutoAdjusted {
                deadzone_out_percent: 87,
                minimum_percent: 80
            }
            .echo_to_log()
        );
    }

    #[test]
    fn test_event_messages() {
        assert_eq!(
            PedalEvent::GasDrift { percent_reached: 48 }.message().unwrap(),
            "Gas pedal drift. Only 48 percent reached"
        );
        assert_eq!(
            PedalEvent::EstimateDecreased {
                estimate_percent: 87,
                report: true
            }
            .message()
            .unwrap(),
            "New deadzone estimation: 87"
        );
        assert!(
            PedalEvent::EstimateDecreased {
                estimate_percent: 87,
                report: false
            }
            .message()
            .is_none()
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_normalize_without_inversion_is_identity(
            axis_max in 1u32..=65535,
            raw in 0u32..=65535,
        ) {
            let raw = raw.min(axis_max);
            prop_assert_eq!(normalize(raw, axis_max, false), raw);
        }

        #[test]
        fn prop_inverted_normalize_is_an_involution(
            axis_max in 1u32..=65535,
            raw in 0u32..=65535,
        ) {
            let raw = raw.min(axis_max);
            let once = normalize(raw, axis_max, true);
            prop_assert!(once <= axis_max);
            prop_assert_eq!(normalize(once, axis_max, true), raw);
        }
    }
}
