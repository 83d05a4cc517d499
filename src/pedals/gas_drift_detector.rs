use log::debug;

use crate::config::GasConfig;

use super::{AxisThresholds, PedalEvent, percent_of};

/// Detects a gas pedal that can't reach full throttle any more.
///
/// Only runs while racing. Every full throttle sample starts a new window; when
/// a window outlives `window_ms` without one and the deepest press in it was
/// more than `min_usage_percent`, the potentiometer is likely worn.
pub struct GasDriftDetector {
    peak_gas_in_window: u32,
    last_full_throttle_ms: u64,
    last_gas_alert_ms: Option<u64>,
    window_ms: u64,
    cooldown_ms: u64,
    min_usage_percent: u32,
}

impl GasDriftDetector {
    pub fn new(config: &GasConfig) -> Self {
        Self {
            peak_gas_in_window: 0,
            last_full_throttle_ms: 0,
            last_gas_alert_ms: None,
            window_ms: config.window_ms(),
            cooldown_ms: config.cooldown_ms(),
            min_usage_percent: config.min_usage_percent,
        }
    }

    pub fn peak_gas_in_window(&self) -> u32 {
        self.peak_gas_in_window
    }

    pub fn last_full_throttle_ms(&self) -> u64 {
        self.last_full_throttle_ms
    }

    pub fn last_gas_alert_ms(&self) -> Option<u64> {
        self.last_gas_alert_ms
    }

    pub fn reset(&mut self) {
        self.peak_gas_in_window = 0;
        self.last_full_throttle_ms = 0;
        self.last_gas_alert_ms = None;
    }

    /// Anchors a fresh window at `now_ms`, called when racing resumes.
    pub fn start_window(&mut self, now_ms: u64) {
        self.last_full_throttle_ms = now_ms;
        self.peak_gas_in_window = 0;
    }

    pub fn analyze(
        &mut self,
        gas: u32,
        thresholds: &AxisThresholds,
        now_ms: u64,
    ) -> Option<PedalEvent> {
        self.peak_gas_in_window = self.peak_gas_in_window.max(gas);

        if gas >= thresholds.gas_full_min {
            self.start_window(now_ms);
            return None;
        }

        if now_ms.saturating_sub(self.last_full_throttle_ms) <= self.window_ms {
            return None;
        }

        let cooled_down = self
            .last_gas_alert_ms
            .is_none_or(|last| now_ms.saturating_sub(last) > self.cooldown_ms);
        if !cooled_down {
            return None;
        }

        let percent_reached = percent_of(self.peak_gas_in_window, thresholds.axis_max);
        // strictly above the minimum, light throttle windows stay quiet
        if percent_reached > self.min_usage_percent {
            debug!("Gas Alert: {percent_reached}");
            self.last_gas_alert_ms = Some(now_ms);
            return Some(PedalEvent::GasDrift { percent_reached });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClutchConfig;

    fn thresholds(gas: &GasConfig) -> AxisThresholds {
        AxisThresholds::new(1023, gas, &ClutchConfig::default())
    }

    /// Feeds one sample per second from `from_s` to `to_s` inclusive.
    fn drive(
        detector: &mut GasDriftDetector,
        thresholds: &AxisThresholds,
        gas: u32,
        from_s: u64,
        to_s: u64,
    ) -> Vec<PedalEvent> {
        (from_s..=to_s)
            .filter_map(|s| detector.analyze(gas, thresholds, s * 1000))
            .collect()
    }

    #[test]
    fn test_drift_alert_after_window() {
        let config = GasConfig::default();
        let thresholds = thresholds(&config);
        let mut detector = GasDriftDetector::new(&config);
        detector.start_window(0);

        assert!(drive(&mut detector, &thresholds, 500, 0, 30).is_empty());
        let output = drive(&mut detector, &thresholds, 500, 31, 31);
        assert_eq!(
            output,
            vec![PedalEvent::GasDrift {
                percent_reached: 48
            }]
        );
        assert_eq!(detector.last_gas_alert_ms(), Some(31_000));
    }

    #[test]
    fn test_light_usage_is_not_drift() {
        let config = GasConfig::default();
        let thresholds = thresholds(&config);
        let mut detector = GasDriftDetector::new(&config);
        detector.start_window(0);

        assert!(drive(&mut detector, &thresholds, 150, 0, 120).is_empty());
        assert_eq!(detector.peak_gas_in_window(), 150);
    }

    #[test]
    fn test_usage_exactly_at_minimum_does_not_alert() {
        let config = GasConfig::default();
        let thresholds = thresholds(&config);
        let mut detector = GasDriftDetector::new(&config);
        detector.start_window(0);

        // 205 * 100 / 1023 = 20
        assert!(drive(&mut detector, &thresholds, 205, 0, 120).is_empty());
    }

    #[test]
    fn test_full_throttle_resets_window() {
        let config = GasConfig::default();
        let thresholds = thresholds(&config);
        let mut detector = GasDriftDetector::new(&config);
        detector.start_window(0);

        assert!(drive(&mut detector, &thresholds, 500, 0, 25).is_empty());
        assert!(drive(&mut detector, &thresholds, 1000, 26, 26).is_empty());
        assert_eq!(detector.peak_gas_in_window(), 0);
        assert_eq!(detector.last_full_throttle_ms(), 26_000);

        assert!(drive(&mut detector, &thresholds, 500, 27, 56).is_empty());
        assert_eq!(drive(&mut detector, &thresholds, 500, 57, 57).len(), 1);
    }

    #[test]
    fn test_alerts_are_rate_limited_but_window_keeps_running() {
        let config = GasConfig::default();
        let thresholds = thresholds(&config);
        let mut detector = GasDriftDetector::new(&config);
        detector.start_window(0);

        let output = drive(&mut detector, &thresholds, 500, 0, 200);
        // first alert at 31s, then every time the 60s cooldown is exceeded
        assert_eq!(output.len(), 3);
        assert_eq!(detector.last_gas_alert_ms(), Some(153_000));
        assert_eq!(detector.last_full_throttle_ms(), 0);
    }

    #[test]
    fn test_zero_axis_never_alerts() {
        let config = GasConfig::default();
        let thresholds = AxisThresholds {
            axis_max: 0,
            gas_idle_max: 0,
            gas_full_min: 1,
            axis_margin: 0,
        };
        let mut detector = GasDriftDetector::new(&config);
        detector.start_window(0);
        assert!(drive(&mut detector, &thresholds, 0, 0, 200).is_empty());
    }
}
