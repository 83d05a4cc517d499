pub(crate) mod slot;
pub(crate) mod writer;

pub use slot::FrameSlot;
pub use writer::JsonLinesTelemetryChannel;

use serde::{Deserialize, Serialize};

use crate::pedals::{
    ClutchState, EstimatorState, GasState, NormalizedSample, PedalAnalyzer, PedalEvent, Sample,
};

/// Per-tick event markers. All are one-shot except `controller_disconnected`,
/// which stays set on every frame until the controller is found again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFlags {
    pub gas_alert_triggered: bool,
    pub clutch_alert_triggered: bool,
    pub controller_reconnected: bool,
    pub estimate_decreased: bool,
    pub auto_adjust_applied: bool,
    pub controller_disconnected: bool,
}

impl FrameFlags {
    /// Raise the flags matching the events of one tick.
    pub fn record(&mut self, events: &[PedalEvent]) {
        for event in events {
            match event {
                PedalEvent::ClutchNoise { .. } => self.clutch_alert_triggered = true,
                PedalEvent::GasDrift { .. } => self.gas_alert_triggered = true,
                PedalEvent::EstimateDecreased { .. } => self.estimate_decreased = true,
                PedalEvent::AutoAdjusted { .. } => self.auto_adjust_applied = true,
            }
        }
    }
}

/// Snapshot of the whole monitor state after one tick.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Increases by one with every published frame
    pub sequence_number: u64,
    pub timestamp_ms: u64,
    pub raw_gas: u32,
    pub raw_clutch: u32,
    pub gas_value: u32,
    pub clutch_value: u32,
    pub axis_max: u32,
    pub gas_idle_max: u32,
    pub gas_full_min: u32,
    pub gas_deadzone_out_percent: u32,
    pub clutch: ClutchState,
    pub gas: GasState,
    pub estimator: EstimatorState,
    pub flags: FrameFlags,
}

impl TelemetryFrame {
    pub fn assemble(
        sequence_number: u64,
        sample: &Sample,
        normalized: &NormalizedSample,
        analyzer: &PedalAnalyzer,
        flags: FrameFlags,
    ) -> Self {
        let thresholds = analyzer.thresholds();
        Self {
            sequence_number,
            timestamp_ms: sample.timestamp_ms,
            raw_gas: sample.raw_gas,
            raw_clutch: sample.raw_clutch,
            gas_value: normalized.gas,
            clutch_value: normalized.clutch,
            axis_max: thresholds.axis_max,
            gas_idle_max: thresholds.gas_idle_max,
            gas_full_min: thresholds.gas_full_min,
            gas_deadzone_out_percent: analyzer.gas_deadzone_out_percent(),
            clutch: analyzer.clutch_state(),
            gas: analyzer.gas_state(),
            estimator: analyzer.estimator_state(),
            flags,
        }
    }
}

/// Hands frames to whoever watches the monitor from outside.
///
/// Publishing must not block the tick loop and a failing consumer must never
/// stop monitoring.
pub trait TelemetryChannel {
    fn publish(&mut self, frame: &TelemetryFrame);
}
