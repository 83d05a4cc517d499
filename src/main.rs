use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::atomic::Ordering,
};

use clap::Parser;
use log::{LevelFilter, error, info, warn};
use pedalwatch::{
    CommandNotifier, InputSource, JsonLinesTelemetryChannel, LogNotifier, Monitor, MonitorConfig,
    Notifier, PedalwatchError,
    input::ReplayInputSource,
    instance::{InstanceGuard, default_lock_path},
    notifier::ALREADY_RUNNING,
};

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(s, 16).map_err(|e| format!("invalid hex value '{s}': {e}"))
}

/// Watches sim racing pedals for a sticky clutch and a gas pedal that no
/// longer reaches full throttle.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Controller id to read (0-15)
    #[arg(long)]
    joystick: Option<u32>,

    /// Vendor id (hex) used to find the controller again after a disconnect
    #[arg(long, value_parser = parse_hex_u16)]
    vendor_id: Option<u16>,

    /// Product id (hex), given together with --vendor-id
    #[arg(long, value_parser = parse_hex_u16)]
    product_id: Option<u16>,

    /// Number of samples to take, 0 runs until stopped [default: 1]
    #[arg(long)]
    iterations: Option<u32>,

    /// Milliseconds between samples [default: 1000]
    #[arg(long)]
    sleep: Option<u64>,

    /// Clutch stickiness tolerance in percent of the axis [default: 5]
    #[arg(long)]
    margin: Option<u32>,

    #[arg(long)]
    monitor_clutch: bool,

    #[arg(long)]
    monitor_gas: bool,

    /// Gas idle band in percent [default: 5]
    #[arg(long)]
    gas_deadzone_in: Option<u32>,

    /// Full throttle threshold in percent [default: 93]
    #[arg(long)]
    gas_deadzone_out: Option<u32>,

    /// Seconds without full throttle before checking for drift [default: 30]
    #[arg(long)]
    gas_window: Option<u64>,

    /// Minimum seconds between gas alerts [default: 60]
    #[arg(long)]
    gas_cooldown: Option<u64>,

    /// Idle seconds before racing is considered paused [default: 10]
    #[arg(long)]
    gas_timeout: Option<u64>,

    /// Peak usage in percent needed before drift is reported [default: 20]
    #[arg(long)]
    gas_min_usage: Option<u32>,

    /// Sticky samples in a row before the clutch alert [default: 4]
    #[arg(long)]
    clutch_repeat: Option<u32>,

    /// Learn the real maximum of the gas pedal and suggest a --gas-deadzone-out
    #[arg(long)]
    estimate_gas_deadzone_out: bool,

    /// Apply the estimate to --gas-deadzone-out at runtime, never below this percentage
    #[arg(long)]
    adjust_deadzone_out_with_minimum: Option<u32>,

    /// Read axes as reported instead of mirroring inverted hardware
    #[arg(long)]
    no_axis_normalization: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Log raw axis values next to the normalized ones
    #[arg(long)]
    debug_raw: bool,

    /// Axis resolution used when the controller doesn't report one [default: 65535]
    #[arg(long)]
    axis_max: Option<u32>,

    /// Seconds between attempts to find a disconnected controller [default: 60]
    #[arg(long)]
    reconnect_backoff: Option<u64>,

    /// Read samples from a JSON Lines replay file instead of a controller
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Write every telemetry frame to this JSON Lines file
    #[arg(long)]
    telemetry_output: Option<PathBuf>,

    /// Program run with the alert text as its last argument
    #[arg(long)]
    alert_command: Option<String>,

    /// Extra argument for --alert-command, can be repeated
    #[arg(long = "alert-arg", allow_hyphen_values = true)]
    alert_args: Vec<String>,

    #[arg(long)]
    lock_file: Option<PathBuf>,

    /// Base configuration, command line options override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to this file
    #[arg(long)]
    save_config: Option<PathBuf>,
}

impl Args {
    fn monitor_config(&self) -> Result<MonitorConfig, PedalwatchError> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::from_file(path)?,
            None => MonitorConfig::from_local_file().unwrap_or_default(),
        };

        let device = &mut config.device;
        device.joystick = self.joystick.or(device.joystick);
        device.vendor_id = self.vendor_id.or(device.vendor_id);
        device.product_id = self.product_id.or(device.product_id);
        device.fallback_axis_max = self.axis_max.unwrap_or(device.fallback_axis_max);

        config.iterations = self.iterations.unwrap_or(config.iterations);
        config.poll_interval_ms = self.sleep.unwrap_or(config.poll_interval_ms);
        config.reconnect_backoff_s = self
            .reconnect_backoff
            .unwrap_or(config.reconnect_backoff_s);
        config.axis_normalization &= !self.no_axis_normalization;
        config.debug_raw |= self.debug_raw;

        let clutch = &mut config.clutch;
        clutch.enabled |= self.monitor_clutch;
        clutch.margin_percent = self.margin.unwrap_or(clutch.margin_percent);
        clutch.repeat_required = self.clutch_repeat.unwrap_or(clutch.repeat_required);

        let gas = &mut config.gas;
        gas.enabled |= self.monitor_gas;
        gas.deadzone_in_percent = self.gas_deadzone_in.unwrap_or(gas.deadzone_in_percent);
        gas.deadzone_out_percent = self.gas_deadzone_out.unwrap_or(gas.deadzone_out_percent);
        gas.window_s = self.gas_window.unwrap_or(gas.window_s);
        gas.cooldown_s = self.gas_cooldown.unwrap_or(gas.cooldown_s);
        gas.timeout_s = self.gas_timeout.unwrap_or(gas.timeout_s);
        gas.min_usage_percent = self.gas_min_usage.unwrap_or(gas.min_usage_percent);

        let estimator = &mut config.estimator;
        estimator.enabled |= self.estimate_gas_deadzone_out;
        estimator.auto_adjust_minimum = self
            .adjust_deadzone_out_with_minimum
            .or(estimator.auto_adjust_minimum);

        Ok(config)
    }

    fn notifier(&self) -> Box<dyn Notifier> {
        match &self.alert_command {
            Some(program) => Box::new(CommandNotifier::new(program, self.alert_args.clone())),
            None => Box::new(LogNotifier),
        }
    }
}

fn monitor<S: InputSource>(
    config: MonitorConfig,
    source: S,
    notifier: Box<dyn Notifier>,
    telemetry_output: Option<&Path>,
) -> Result<(), PedalwatchError> {
    let mut monitor = Monitor::new(config, source, notifier);
    if let Some(path) = telemetry_output {
        info!("Writing telemetry to {}", path.display());
        monitor = monitor.with_channel(Box::new(JsonLinesTelemetryChannel::create(path)?));
    }

    let stop = monitor.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("Exiting...");
        stop.store(true, Ordering::SeqCst);
    }) {
        warn!("Could not set Ctrl-C handler: {e}");
    }

    let ticks = monitor.run()?;
    info!("Done after {ticks} ticks");
    Ok(())
}

#[cfg(feature = "hid")]
fn live(
    config: MonitorConfig,
    notifier: Box<dyn Notifier>,
    telemetry_output: Option<&Path>,
) -> Result<(), PedalwatchError> {
    use pedalwatch::input::hid::{HidInputSource, HidReportLayout};

    let source = HidInputSource::new(HidReportLayout {
        axis_max: config.device.fallback_axis_max,
        inverted: config.axis_normalization,
        ..Default::default()
    })?;
    monitor(config, source, notifier, telemetry_output)
}

#[cfg(not(feature = "hid"))]
fn live(
    _config: MonitorConfig,
    _notifier: Box<dyn Notifier>,
    _telemetry_output: Option<&Path>,
) -> Result<(), PedalwatchError> {
    Err(PedalwatchError::Hid {
        description: "built without the hid feature, only --replay is available".to_string(),
    })
}

fn run(args: &Args) -> Result<(), PedalwatchError> {
    let config = args.monitor_config()?;
    config.validate(args.replay.is_none())?;
    if let Some(path) = &args.save_config {
        config.save(path)?;
        info!("Saved configuration to {}", path.display());
    }

    let mut notifier = args.notifier();
    let lock_path = args.lock_file.clone().unwrap_or_else(default_lock_path);
    let _guard = match InstanceGuard::acquire(&lock_path) {
        Ok(guard) => guard,
        Err(e @ PedalwatchError::AlreadyRunning { .. }) => {
            notifier.notify(ALREADY_RUNNING, false);
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let telemetry_output = args.telemetry_output.as_deref();
    match &args.replay {
        Some(path) => monitor(
            config,
            ReplayInputSource::from_file(path)?,
            notifier,
            telemetry_output,
        ),
        None => live(config, notifier, telemetry_output),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    colog::default_builder()
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match std::error::Error::source(&e) {
                Some(source) => error!("{e}: {source}"),
                None => error!("{e}"),
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(std::iter::once("pedalwatch").chain(args.iter().copied()))
    }

    #[test]
    fn test_hex_ids() {
        assert_eq!(parse_hex_u16("0x0EB7"), Ok(0x0eb7));
        assert_eq!(parse_hex_u16("1839"), Ok(0x1839));
        assert!(parse_hex_u16("pedal").is_err());
    }

    #[test]
    fn test_command_line_overrides_base_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base.json");
        std::fs::write(
            &path,
            r#"{"gas": {"enabled": true, "deadzone_out_percent": 90}, "iterations": 50}"#,
        )
        .unwrap();

        let args = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--iterations",
            "0",
            "--monitor-clutch",
            "--vendor-id",
            "0eb7",
            "--product-id",
            "0x1839",
            "--adjust-deadzone-out-with-minimum",
            "80",
            "--no-axis-normalization",
        ]);
        let config = args.monitor_config().unwrap();

        assert_eq!(config.iterations, 0);
        assert!(config.gas.enabled);
        assert!(config.clutch.enabled);
        assert_eq!(config.gas.deadzone_out_percent, 90);
        assert_eq!(config.estimator.auto_adjust_minimum, Some(80));
        assert!(!config.axis_normalization);
        assert_eq!(config.device.identity().unwrap().vendor_id, 0x0eb7);
    }

    #[test]
    fn test_auto_adjust_without_estimation_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, "{}").unwrap();

        let args = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--joystick",
            "0",
            "--monitor-gas",
            "--adjust-deadzone-out-with-minimum",
            "80",
        ]);
        let config = args.monitor_config().unwrap();
        assert!(matches!(
            config.validate(true),
            Err(PedalwatchError::InvalidConfig { .. })
        ));
    }
}
