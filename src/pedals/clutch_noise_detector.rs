use serde::{Deserialize, Serialize};

use super::{AxisThresholds, NormalizedSample, PedalEvent};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClutchState {
    pub last_clutch_value: u32,
    /// Consecutive samples the clutch stayed within the stickiness margin.
    pub repeating_count: u32,
}

/// Flags a clutch axis that sits still away from rest while the driver is off the gas.
///
/// A healthy clutch is either released (reads 0) or moving when it's used, so a
/// value that holds within `axis_margin` for `repeat_required` samples in a row
/// is the Hall sensor noise that shows up as rudder spikes in flight sims.
pub struct ClutchNoiseDetector {
    state: ClutchState,
    repeat_required: u32,
}

impl ClutchNoiseDetector {
    pub fn new(repeat_required: u32) -> Self {
        Self {
            state: ClutchState::default(),
            repeat_required,
        }
    }

    pub fn state(&self) -> ClutchState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = ClutchState::default();
    }

    pub fn analyze(
        &mut self,
        sample: &NormalizedSample,
        thresholds: &AxisThresholds,
    ) -> Option<PedalEvent> {
        let clutch = sample.clutch;

        if sample.gas <= thresholds.gas_idle_max && clutch > 0 {
            let closure = clutch.abs_diff(self.state.last_clutch_value);
            if closure <= thresholds.axis_margin {
                self.state.repeating_count += 1;
            } else {
                self.state.repeating_count = 0;
            }
        } else {
            // gas applied or clutch released breaks the streak
            self.state.repeating_count = 0;
        }

        self.state.last_clutch_value = clutch;

        if self.state.repeating_count >= self.repeat_required {
            self.state.repeating_count = 0;
            return Some(PedalEvent::ClutchNoise {
                clutch_value: clutch,
            });
        }
        None
    }
}
