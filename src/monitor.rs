use std::{
    mem,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    PedalwatchError,
    config::MonitorConfig,
    input::{DeviceId, DeviceIdentity, InputSource},
    notifier::{self, Notifier},
    pedals::{NormalizedSample, PedalAnalyzer, Sample},
    telemetry::{FrameFlags, TelemetryChannel, TelemetryFrame},
};

/// Longest stretch slept without looking at the stop flag.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// What a single tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickResult {
    /// A sample was analyzed and its frame published.
    Processed,
    /// The read failed and no identity is configured to look for the device again.
    Skipped,
    /// The read failed and the device was found again. Poll again right away.
    Reconnected,
    /// A finite input source ran out, or it can never give the lost device back.
    Exhausted,
    Stopped,
}

/// The tick loop: reads a sample, runs the pedal checks, alerts and publishes
/// telemetry. A failed read of an identity-configured device suspends
/// monitoring until the device is found again, then starts over with fresh
/// state.
pub struct Monitor<S: InputSource> {
    config: MonitorConfig,
    source: S,
    analyzer: PedalAnalyzer,
    notifier: Box<dyn Notifier>,
    channels: Vec<Box<dyn TelemetryChannel>>,
    sequence_number: u64,
    reconnected: bool,
    disconnected: bool,
    stop: Arc<AtomicBool>,
}

impl<S: InputSource> Monitor<S> {
    pub fn new(config: MonitorConfig, source: S, notifier: Box<dyn Notifier>) -> Self {
        let analyzer = PedalAnalyzer::new(&config, config.device.fallback_axis_max);
        Self {
            config,
            source,
            analyzer,
            notifier,
            channels: Vec::new(),
            sequence_number: 0,
            reconnected: false,
            disconnected: false,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_channel(mut self, channel: Box<dyn TelemetryChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Flag checked between ticks and between rediscovery attempts, set it to
    /// end `run()`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn analyzer(&self) -> &PedalAnalyzer {
        &self.analyzer
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Picks the device to read and derives the thresholds from its resolution.
    ///
    /// The configured identity wins when it can be found. Otherwise the
    /// explicit joystick id (or the first device) is read until the first
    /// read error.
    pub fn start(&mut self) -> Result<(), PedalwatchError> {
        let identity = self.config.device.identity();
        let fallback = DeviceId(self.config.device.joystick.unwrap_or(0));
        let device = match identity {
            Some(identity) => match self.source.find_by_identity(identity) {
                Ok(Some(device)) => device,
                Ok(None) => {
                    warn!("Controller {identity} not found, using controller {fallback}");
                    fallback
                }
                Err(e) => {
                    warn!("Controller {identity} not available ({e}), using controller {fallback}");
                    fallback
                }
            },
            None => fallback,
        };

        if let Err(e) = self.source.select(device) {
            // without an identity there is no way to ever find the device again
            if identity.is_none() {
                return Err(e);
            }
            warn!("Could not open controller {device}: {e}");
        }

        let axis_max = self.axis_max_of(device);
        self.analyzer.reset(axis_max);
        self.log_summary(device, identity);
        Ok(())
    }

    fn log_summary(&self, device: DeviceId, identity: Option<DeviceIdentity>) {
        let thresholds = self.analyzer.thresholds();
        match identity {
            Some(identity) => info!("Monitoring controller {device} ({identity})"),
            None => info!("Monitoring controller {device}"),
        }
        info!(
            "Clutch monitoring: {}, gas monitoring: {}, deadzone estimation: {}",
            self.config.clutch.enabled, self.config.gas.enabled, self.config.estimator.enabled
        );
        debug!(
            "Axis max {}, gas idle <= {}, full throttle >= {}, clutch margin {}",
            thresholds.axis_max,
            thresholds.gas_idle_max,
            thresholds.gas_full_min,
            thresholds.axis_margin
        );
        debug!(
            "Gas window {}s, cooldown {}s, timeout {}s, min usage {}%",
            self.config.gas.window_s,
            self.config.gas.cooldown_s,
            self.config.gas.timeout_s,
            self.config.gas.min_usage_percent
        );
        if let Some(minimum) = self.config.estimator.auto_adjust_minimum {
            info!("Auto adjusting gas-deadzone-out, never below {minimum}");
        }
    }

    fn axis_max_of(&mut self, device: DeviceId) -> u32 {
        match self.source.capabilities(device) {
            Ok(capabilities) if capabilities.axis_max > 0 => capabilities.axis_max,
            Ok(_) => {
                warn!("Controller {device} reports a zero axis range");
                self.config.device.fallback_axis_max
            }
            Err(e) => {
                debug!("No capabilities for controller {device} ({e}), using --axis-max");
                self.config.device.fallback_axis_max
            }
        }
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless stopped first. Returns false when stopped.
    fn pause(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_stopped() {
                return false;
            }
            let step = remaining.min(STOP_CHECK_INTERVAL);
            thread::sleep(step);
            remaining -= step;
        }
        !self.is_stopped()
    }

    fn publish(&mut self, sample: &Sample, normalized: &NormalizedSample, flags: FrameFlags) {
        let frame = TelemetryFrame::assemble(
            self.sequence_number,
            sample,
            normalized,
            &self.analyzer,
            flags,
        );
        self.sequence_number += 1;
        for channel in self.channels.iter_mut() {
            channel.publish(&frame);
        }
    }

    pub fn tick(&mut self) -> TickResult {
        if self.is_stopped() {
            return TickResult::Stopped;
        }

        match self.source.poll() {
            Ok(sample) => {
                self.process(&sample);
                TickResult::Processed
            }
            Err(PedalwatchError::InputExhausted) => TickResult::Exhausted,
            Err(e) => match self.config.device.identity() {
                Some(identity) => self.reconnect(identity, &e),
                None => {
                    debug!("Read failed, skipping tick: {e}");
                    TickResult::Skipped
                }
            },
        }
    }

    fn process(&mut self, sample: &Sample) {
        let axis_max = self.analyzer.thresholds().axis_max;
        let normalized =
            NormalizedSample::from_sample(sample, axis_max, self.config.axis_normalization);

        if self.config.debug_raw {
            debug!(
                "{}, gas={} (raw {}), clutch={} (raw {})",
                normalized.timestamp_ms,
                normalized.gas,
                sample.raw_gas,
                normalized.clutch,
                sample.raw_clutch
            );
        } else {
            debug!(
                "{}, gas={}, clutch={}",
                normalized.timestamp_ms, normalized.gas, normalized.clutch
            );
        }

        let events = self.analyzer.analyze(&normalized);
        for event in &events {
            if let Some(text) = event.message() {
                self.notifier.notify(&text, event.echo_to_log());
            }
        }

        let mut flags = FrameFlags {
            controller_reconnected: mem::take(&mut self.reconnected),
            controller_disconnected: self.disconnected,
            ..Default::default()
        };
        flags.record(&events);
        self.publish(sample, &normalized, flags);
    }

    fn reconnect(&mut self, identity: DeviceIdentity, error: &PedalwatchError) -> TickResult {
        warn!("Lost controller {identity}: {error}");
        let backoff_s = self.config.reconnect_backoff_s;
        self.notifier
            .notify(&notifier::controller_disconnected(backoff_s), false);
        self.disconnected = true;
        self.publish(
            &Sample::default(),
            &NormalizedSample::default(),
            FrameFlags {
                controller_disconnected: true,
                ..Default::default()
            },
        );

        loop {
            if !self.pause(Duration::from_secs(backoff_s)) {
                return TickResult::Stopped;
            }

            let device = match self.source.find_by_identity(identity) {
                Ok(Some(device)) => device,
                Ok(None) => {
                    info!("Controller {identity} not found, retrying");
                    self.notifier.notify(notifier::CONTROLLER_NOT_FOUND, false);
                    continue;
                }
                Err(e) => {
                    warn!("Giving up on controller {identity}: {e}");
                    return TickResult::Exhausted;
                }
            };
            if let Err(e) = self.source.select(device) {
                warn!("Found controller {device} but could not open it: {e}");
                self.notifier.notify(notifier::CONTROLLER_NOT_FOUND, false);
                continue;
            }

            let axis_max = self.axis_max_of(device);
            self.analyzer.reset(axis_max);
            info!("Controller {identity} back as {device}, axis max {axis_max}");
            self.notifier.notify(notifier::CONTROLLER_FOUND, false);
            self.disconnected = false;
            self.reconnected = true;
            return TickResult::Reconnected;
        }
    }

    /// Runs `start()` and then ticks until the configured number of
    /// iterations is done, the input runs out or the stop flag is set.
    /// Returns the number of ticks run.
    pub fn run(&mut self) -> Result<u64, PedalwatchError> {
        self.start()?;

        let iterations = u64::from(self.config.iterations);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut ticks = 0u64;

        while iterations == 0 || ticks < iterations {
            let result = self.tick();
            match result {
                TickResult::Exhausted => {
                    info!("Input exhausted after {ticks} ticks");
                    break;
                }
                TickResult::Stopped => {
                    info!("Stopped after {ticks} ticks");
                    break;
                }
                TickResult::Processed | TickResult::Skipped | TickResult::Reconnected => {
                    ticks += 1
                }
            }

            let more = iterations == 0 || ticks < iterations;
            // read the reconnected device right away
            if more && result != TickResult::Reconnected && !self.pause(poll_interval) {
                info!("Stopped after {ticks} ticks");
                break;
            }
        }
        Ok(ticks)
    }
}
