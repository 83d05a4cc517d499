use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{PedalwatchError, input::DeviceIdentity};

const CONFIG_FILE_NAME: &str = "config.json";

/// Highest device id the legacy joystick API exposes.
pub const MAX_JOYSTICK_ID: u32 = 15;
/// Resolution assumed for a standard 16 bit axis when the device can't tell us.
pub const DEFAULT_AXIS_MAX: u32 = 65535;
/// Longest gas window, timeout or cooldown accepted: one day.
pub const MAX_DURATION_S: u64 = 86_400;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceSelection {
    /// Explicit device id, used as-is until the first read error.
    pub joystick: Option<u32>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    /// Axis resolution used when the device capabilities can't be queried.
    pub fallback_axis_max: u32,
}

impl Default for DeviceSelection {
    fn default() -> Self {
        Self {
            joystick: None,
            vendor_id: None,
            product_id: None,
            fallback_axis_max: DEFAULT_AXIS_MAX,
        }
    }
}

impl DeviceSelection {
    /// The vendor/product pair used for rediscovery, only when both are known.
    pub fn identity(&self) -> Option<DeviceIdentity> {
        match (self.vendor_id, self.product_id) {
            (Some(vendor_id), Some(product_id)) => Some(DeviceIdentity {
                vendor_id,
                product_id,
            }),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClutchConfig {
    pub enabled: bool,
    /// Stickiness tolerance as a percentage of the axis travel.
    pub margin_percent: u32,
    /// Consecutive sticky samples before the clutch alert fires.
    pub repeat_required: u32,
}

impl Default for ClutchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            margin_percent: 5,
            repeat_required: 4,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct GasConfig {
    pub enabled: bool,
    /// Idle band, percentage of travel treated as "not pressed".
    pub deadzone_in_percent: u32,
    /// Full throttle threshold, percentage of travel. Lowered at runtime by auto-adjust.
    pub deadzone_out_percent: u32,
    /// Seconds of racing without full throttle before the drift check runs.
    pub window_s: u64,
    /// Seconds between drift alerts, also the estimation window length.
    pub cooldown_s: u64,
    /// Seconds in the idle band before the session is considered paused.
    pub timeout_s: u64,
    /// Minimum peak usage within a window for it to count.
    pub min_usage_percent: u32,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            deadzone_in_percent: 5,
            deadzone_out_percent: 93,
            window_s: 30,
            cooldown_s: 60,
            timeout_s: 10,
            min_usage_percent: 20,
        }
    }
}

impl GasConfig {
    pub fn window_ms(&self) -> u64 {
        self.window_s.saturating_mul(1000)
    }

    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_s.saturating_mul(1000)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_s.saturating_mul(1000)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Learn the reachable gas maximum and report a suggested full throttle threshold.
    pub enabled: bool,
    /// When set, lower the live full throttle threshold to the estimate, never below this floor.
    pub auto_adjust_minimum: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    pub device: DeviceSelection,
    pub poll_interval_ms: u64,
    /// Number of ticks to run, 0 runs until stopped.
    pub iterations: u32,
    /// Mirror inverted hardware so that 0 is idle and axis max is fully pressed.
    pub axis_normalization: bool,
    pub reconnect_backoff_s: u64,
    pub debug_raw: bool,
    pub clutch: ClutchConfig,
    pub gas: GasConfig,
    pub estimator: EstimatorConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device: DeviceSelection::default(),
            poll_interval_ms: 1000,
            iterations: 1,
            axis_normalization: true,
            reconnect_backoff_s: 60,
            debug_raw: false,
            clutch: ClutchConfig::default(),
            gas: GasConfig::default(),
            estimator: EstimatorConfig::default(),
        }
    }
}

fn check_percent(field: &str, value: u32) -> Result<(), PedalwatchError> {
    if value > 100 {
        return Err(PedalwatchError::invalid_config(field, "must be 0-100"));
    }
    Ok(())
}

fn check_positive(field: &str, value: u64) -> Result<(), PedalwatchError> {
    if value == 0 {
        return Err(PedalwatchError::invalid_config(field, "must be > 0"));
    }
    Ok(())
}

fn check_duration_s(field: &str, value: u64) -> Result<(), PedalwatchError> {
    check_positive(field, value)?;
    if value > MAX_DURATION_S {
        return Err(PedalwatchError::invalid_config(
            field,
            format!("must be <= {MAX_DURATION_S} s"),
        ));
    }
    Ok(())
}

impl MonitorConfig {
    /// Checks every option for range and consistency.
    ///
    /// `require_device` is false when samples come from a replay file, which
    /// carries its own device description.
    pub fn validate(&self, require_device: bool) -> Result<(), PedalwatchError> {
        let identity = self.device.identity();

        if self.device.vendor_id.is_some() != self.device.product_id.is_some() {
            return Err(PedalwatchError::invalid_config(
                "vendor-id/product-id",
                "vendor and product id must be given together",
            ));
        }
        if self.device.joystick.is_some_and(|id| id > MAX_JOYSTICK_ID) && identity.is_none() {
            return Err(PedalwatchError::invalid_config(
                "joystick",
                format!("must be 0-{MAX_JOYSTICK_ID}"),
            ));
        }
        if require_device && self.device.joystick.is_none() && identity.is_none() {
            return Err(PedalwatchError::invalid_config(
                "joystick",
                "select a device with --joystick or --vendor-id/--product-id",
            ));
        }
        if self.device.fallback_axis_max == 0 {
            return Err(PedalwatchError::invalid_config("axis-max", "must be > 0"));
        }

        check_positive("sleep", self.poll_interval_ms)?;
        check_percent("margin", self.clutch.margin_percent)?;
        if self.clutch.repeat_required == 0 {
            return Err(PedalwatchError::invalid_config("clutch-repeat", "must be > 0"));
        }

        check_percent("gas-deadzone-in", self.gas.deadzone_in_percent)?;
        check_percent("gas-deadzone-out", self.gas.deadzone_out_percent)?;
        if self.gas.deadzone_in_percent >= self.gas.deadzone_out_percent {
            return Err(PedalwatchError::invalid_config(
                "gas-deadzone-in",
                format!(
                    "must be lower than gas-deadzone-out ({})",
                    self.gas.deadzone_out_percent
                ),
            ));
        }
        check_duration_s("gas-window", self.gas.window_s)?;
        check_duration_s("gas-timeout", self.gas.timeout_s)?;
        check_duration_s("gas-cooldown", self.gas.cooldown_s)?;
        check_percent("gas-min-usage", self.gas.min_usage_percent)?;

        if self.estimator.enabled && !self.gas.enabled {
            return Err(PedalwatchError::invalid_config(
                "estimate-gas-deadzone-out",
                "requires --monitor-gas",
            ));
        }
        if let Some(minimum) = self.estimator.auto_adjust_minimum {
            check_percent("adjust-deadzone-out-with-minimum", minimum)?;
            if !self.gas.enabled {
                return Err(PedalwatchError::invalid_config(
                    "adjust-deadzone-out-with-minimum",
                    "requires --monitor-gas",
                ));
            }
            if !self.estimator.enabled {
                return Err(PedalwatchError::invalid_config(
                    "adjust-deadzone-out-with-minimum",
                    "also requires --estimate-gas-deadzone-out",
                ));
            }
            if minimum > self.gas.deadzone_out_percent {
                return Err(PedalwatchError::invalid_config(
                    "adjust-deadzone-out-with-minimum",
                    format!(
                        "{minimum} must be <= gas-deadzone-out ({})",
                        self.gas.deadzone_out_percent
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn local_path() -> Result<PathBuf, PedalwatchError> {
        Ok(dirs::config_dir()
            .ok_or(PedalwatchError::NoConfigDir)?
            .join("pedalwatch")
            .join(CONFIG_FILE_NAME))
    }

    pub fn from_file(path: &Path) -> Result<Self, PedalwatchError> {
        debug!("Loading config from {}", path.display());
        let file = File::open(path).map_err(|e| PedalwatchError::ConfigIOError { source: e })?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| PedalwatchError::ConfigParseError { source: e })
    }

    /// Loads the config saved in the user's config directory, if there is one.
    pub fn from_local_file() -> Option<Self> {
        let config_path = Self::local_path().ok()?;
        if config_path.exists() {
            Self::from_file(&config_path).ok()
        } else {
            None
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), PedalwatchError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PedalwatchError::ConfigIOError { source: e })?;
            }
        }

        let file =
            File::create(path).map_err(|e| PedalwatchError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| PedalwatchError::ConfigParseError { source: e })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gas_config() -> MonitorConfig {
        MonitorConfig {
            device: DeviceSelection {
                joystick: Some(0),
                ..Default::default()
            },
            gas: GasConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn invalid_field(result: Result<(), PedalwatchError>) -> String {
        match result {
            Err(PedalwatchError::InvalidConfig { field, .. }) => field,
            other => panic!("Expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(gas_config().validate(true).is_ok());
    }

    #[test]
    fn test_device_required_unless_replaying() {
        let config = MonitorConfig::default();
        assert_eq!(invalid_field(config.validate(true)), "joystick");
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn test_joystick_range_only_without_identity() {
        let mut config = gas_config();
        config.device.joystick = Some(17);
        assert_eq!(invalid_field(config.validate(true)), "joystick");

        config.device.vendor_id = Some(0x0eb7);
        config.device.product_id = Some(0x1839);
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn test_identity_needs_both_ids() {
        let mut config = gas_config();
        config.device.vendor_id = Some(0x0eb7);
        assert_eq!(invalid_field(config.validate(true)), "vendor-id/product-id");
        assert_eq!(config.device.identity(), None);
    }

    #[test]
    fn test_idle_band_must_be_below_full_throttle() {
        let mut config = gas_config();
        config.gas.deadzone_in_percent = 93;
        assert_eq!(invalid_field(config.validate(true)), "gas-deadzone-in");
    }

    #[test]
    fn test_zero_durations_rejected() {
        let mut config = gas_config();
        config.gas.window_s = 0;
        assert_eq!(invalid_field(config.validate(true)), "gas-window");

        let mut config = gas_config();
        config.poll_interval_ms = 0;
        assert_eq!(invalid_field(config.validate(true)), "sleep");

        let mut config = gas_config();
        config.clutch.repeat_required = 0;
        assert_eq!(invalid_field(config.validate(true)), "clutch-repeat");
    }

    #[test]
    fn test_overlong_durations_rejected() {
        let mut config = gas_config();
        config.gas.window_s = u64::MAX / 100;
        assert_eq!(invalid_field(config.validate(true)), "gas-window");

        let mut config = gas_config();
        config.gas.cooldown_s = MAX_DURATION_S + 1;
        assert_eq!(invalid_field(config.validate(true)), "gas-cooldown");

        let mut config = gas_config();
        config.gas.timeout_s = MAX_DURATION_S;
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn test_duration_conversion_saturates() {
        let gas = GasConfig {
            window_s: u64::MAX / 100,
            ..Default::default()
        };
        assert_eq!(gas.window_ms(), u64::MAX);
    }

    #[test]
    fn test_estimation_requires_gas_monitoring() {
        let mut config = gas_config();
        config.gas.enabled = false;
        config.estimator.enabled = true;
        assert_eq!(
            invalid_field(config.validate(true)),
            "estimate-gas-deadzone-out"
        );
    }

    #[test]
    fn test_auto_adjust_rules() {
        let mut config = gas_config();
        config.estimator.auto_adjust_minimum = Some(80);
        assert_eq!(
            invalid_field(config.validate(true)),
            "adjust-deadzone-out-with-minimum"
        );

        config.estimator.enabled = true;
        assert!(config.validate(true).is_ok());

        config.estimator.auto_adjust_minimum = Some(95);
        assert_eq!(
            invalid_field(config.validate(true)),
            "adjust-deadzone-out-with-minimum"
        );
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = gas_config();
        config.estimator.enabled = true;
        config.estimator.auto_adjust_minimum = Some(85);

        config.save(&path).unwrap();
        let loaded = MonitorConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"gas": {"enabled": true, "window_s": 45}}"#).unwrap();

        let loaded = MonitorConfig::from_file(&path).unwrap();
        assert!(loaded.gas.enabled);
        assert_eq!(loaded.gas.window_s, 45);
        assert_eq!(loaded.gas.deadzone_out_percent, 93);
        assert_eq!(loaded.poll_interval_ms, 1000);
    }
}
