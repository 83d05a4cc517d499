use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{EstimatorConfig, GasConfig};

use super::{AxisThresholds, percent_of};

/// Learned ceiling of the gas axis for the current device attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatorState {
    /// Lowest window peak seen so far, never increases until the device reconnects.
    pub best_estimate_percent: u32,
    pub last_printed_estimate: u32,
    pub window_peak_percent: u32,
    pub window_start_ms: u64,
    pub last_print_ms: Option<u64>,
}

impl Default for EstimatorState {
    fn default() -> Self {
        Self {
            best_estimate_percent: 100,
            last_printed_estimate: 100,
            window_peak_percent: 0,
            window_start_ms: 0,
            last_print_ms: None,
        }
    }
}

/// What closing an estimation window produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EstimatorOutcome {
    /// New best estimate, when it dropped.
    pub estimate_decreased: Option<u32>,
    /// The drop is due for a user facing report.
    pub report: bool,
    /// New full throttle percentage to apply to the live config.
    pub adjusted_deadzone_out: Option<u32>,
}

/// Estimates the gas pedal's real reachable maximum over sliding windows.
///
/// Each window lasts the gas cooldown and records the deepest press above the
/// idle band. A window that saw meaningful use but peaked below the current
/// best estimate lowers it.
pub struct DeadzoneEstimator {
    state: EstimatorState,
    window_ms: u64,
    min_usage_percent: u32,
    auto_adjust_minimum: Option<u32>,
}

impl DeadzoneEstimator {
    pub fn new(gas: &GasConfig, config: &EstimatorConfig) -> Self {
        Self {
            state: EstimatorState::default(),
            window_ms: gas.cooldown_ms(),
            min_usage_percent: gas.min_usage_percent,
            auto_adjust_minimum: config.auto_adjust_minimum,
        }
    }

    pub fn state(&self) -> EstimatorState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = EstimatorState::default();
    }

    pub fn restart_window(&mut self, now_ms: u64) {
        self.state.window_start_ms = now_ms;
        self.state.window_peak_percent = 0;
    }

    pub fn analyze(
        &mut self,
        gas: u32,
        thresholds: &AxisThresholds,
        deadzone_out_percent: u32,
        now_ms: u64,
    ) -> EstimatorOutcome {
        let mut outcome = EstimatorOutcome::default();

        if gas > thresholds.gas_idle_max {
            let current = percent_of(gas, thresholds.axis_max);
            self.state.window_peak_percent = self.state.window_peak_percent.max(current);
        }

        if now_ms.saturating_sub(self.state.window_start_ms) < self.window_ms {
            return outcome;
        }

        let candidate = self.state.window_peak_percent;
        // borderline windows at exactly the minimum still say something about the ceiling
        if candidate >= self.min_usage_percent && candidate < self.state.best_estimate_percent {
            self.state.best_estimate_percent = candidate;
            outcome.estimate_decreased = Some(candidate);
            debug!("Estimate: best gas ceiling now {candidate}%");

            let print_due = self
                .state
                .last_print_ms
                .is_none_or(|last| now_ms.saturating_sub(last) >= self.window_ms);
            if candidate < self.state.last_printed_estimate && print_due {
                info!("[Estimate] Suggested --gas-deadzone-out: {candidate}");
                self.state.last_printed_estimate = candidate;
                self.state.last_print_ms = Some(now_ms);
                outcome.report = true;
            }

            if let Some(minimum) = self.auto_adjust_minimum {
                if candidate < deadzone_out_percent && candidate >= minimum {
                    outcome.adjusted_deadzone_out = Some(candidate);
                }
            }
        }

        self.restart_window(now_ms);
        outcome
    }
}
