use log::info;
use serde::{Deserialize, Serialize};

use crate::config::{ClutchConfig, GasConfig, MonitorConfig};

use super::{
    ActivityTransition, AxisThresholds, ClutchNoiseDetector, ClutchState, DeadzoneEstimator,
    EstimatorState, GasActivityTracker, GasDriftDetector, NormalizedSample, PedalEvent,
};

/// Racing/drift bookkeeping of the gas axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasState {
    pub is_racing: bool,
    pub peak_gas_in_window: u32,
    pub last_full_throttle_ms: u64,
    pub last_gas_activity_ms: u64,
    pub last_gas_alert_ms: Option<u64>,
}

/// Runs every pedal check on one normalized sample per tick.
///
/// Owns the live gas settings: the full throttle threshold is the one value
/// that changes at runtime, lowered by the deadzone estimator's auto-adjust.
pub struct PedalAnalyzer {
    gas_config: GasConfig,
    clutch_config: ClutchConfig,
    auto_adjust_minimum: Option<u32>,
    thresholds: AxisThresholds,
    clutch: Option<ClutchNoiseDetector>,
    gas_enabled: bool,
    activity: GasActivityTracker,
    drift: GasDriftDetector,
    estimator: Option<DeadzoneEstimator>,
}

impl PedalAnalyzer {
    pub fn new(config: &MonitorConfig, axis_max: u32) -> Self {
        let gas_config = config.gas.clone();
        let clutch_config = config.clutch.clone();
        Self {
            thresholds: AxisThresholds::new(axis_max, &gas_config, &clutch_config),
            clutch: clutch_config
                .enabled
                .then(|| ClutchNoiseDetector::new(clutch_config.repeat_required)),
            gas_enabled: gas_config.enabled,
            activity: GasActivityTracker::new(gas_config.timeout_ms()),
            drift: GasDriftDetector::new(&gas_config),
            estimator: (gas_config.enabled && config.estimator.enabled)
                .then(|| DeadzoneEstimator::new(&gas_config, &config.estimator)),
            auto_adjust_minimum: config.estimator.auto_adjust_minimum,
            gas_config,
            clutch_config,
        }
    }

    pub fn thresholds(&self) -> AxisThresholds {
        self.thresholds
    }

    /// Current full throttle percentage, including any auto-adjust.
    pub fn gas_deadzone_out_percent(&self) -> u32 {
        self.gas_config.deadzone_out_percent
    }

    pub fn clutch_state(&self) -> ClutchState {
        self.clutch
            .as_ref()
            .map(ClutchNoiseDetector::state)
            .unwrap_or_default()
    }

    pub fn gas_state(&self) -> GasState {
        GasState {
            is_racing: self.activity.is_racing(),
            peak_gas_in_window: self.drift.peak_gas_in_window(),
            last_full_throttle_ms: self.drift.last_full_throttle_ms(),
            last_gas_activity_ms: self.activity.last_gas_activity_ms(),
            last_gas_alert_ms: self.drift.last_gas_alert_ms(),
        }
    }

    pub fn estimator_state(&self) -> EstimatorState {
        self.estimator
            .as_ref()
            .map(DeadzoneEstimator::state)
            .unwrap_or_default()
    }

    /// Forgets everything learned about the previous attachment and derives
    /// the thresholds for a device with `axis_max` resolution.
    pub fn reset(&mut self, axis_max: u32) {
        self.thresholds = AxisThresholds::new(axis_max, &self.gas_config, &self.clutch_config);
        if let Some(clutch) = self.clutch.as_mut() {
            clutch.reset();
        }
        self.activity.reset();
        self.drift.reset();
        if let Some(estimator) = self.estimator.as_mut() {
            estimator.reset();
        }
    }

    pub fn analyze(&mut self, sample: &NormalizedSample) -> Vec<PedalEvent> {
        let mut output = Vec::new();
        let now = sample.timestamp_ms;

        if let Some(clutch) = self.clutch.as_mut() {
            output.extend(clutch.analyze(sample, &self.thresholds));
        }

        if !self.gas_enabled {
            return output;
        }

        match self
            .activity
            .update(sample.gas, self.thresholds.gas_idle_max, now)
        {
            Some(ActivityTransition::Resumed) => {
                self.drift.start_window(now);
                if let Some(estimator) = self.estimator.as_mut() {
                    estimator.restart_window(now);
                }
            }
            Some(ActivityTransition::Paused) => {
                if let Some(estimator) = self.estimator.as_mut() {
                    estimator.restart_window(now);
                }
            }
            None => {}
        }

        if !self.activity.is_racing() {
            return output;
        }

        output.extend(self.drift.analyze(sample.gas, &self.thresholds, now));

        if let Some(estimator) = self.estimator.as_mut() {
            let outcome = estimator.analyze(
                sample.gas,
                &self.thresholds,
                self.gas_config.deadzone_out_percent,
                now,
            );
            if let Some(estimate_percent) = outcome.estimate_decreased {
                output.push(PedalEvent::EstimateDecreased {
                    estimate_percent,
                    report: outcome.report,
                });
            }
            if let Some(deadzone_out_percent) = outcome.adjusted_deadzone_out {
                self.gas_config.deadzone_out_percent = deadzone_out_percent;
                self.thresholds.set_full_throttle_percent(deadzone_out_percent);
                let minimum_percent = self.auto_adjust_minimum.unwrap_or_default();
                info!(
                    "[AutoAdjust] gas-deadzone-out updated to {deadzone_out_percent} (min={minimum_percent})"
                );
                output.push(PedalEvent::AutoAdjusted {
                    deadzone_out_percent,
                    minimum_percent,
                });
            }
        }

        output
    }
}
