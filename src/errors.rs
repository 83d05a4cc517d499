// Error types for pedalwatch

use crate::telemetry::TelemetryFrame;
use snafu::Snafu;
use std::{io, path::PathBuf, sync::mpsc::SendError};

#[derive(Debug, Snafu)]
pub enum PedalwatchError {
    // Configuration errors, reported before any device access
    #[snafu(display("Invalid configuration: {field} - {reason}"))]
    InvalidConfig { field: String, reason: String },
    #[snafu(display("Could not find application data directory for the config file"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error parsing config file"))]
    ConfigParseError { source: serde_json::Error },

    // Errors while reading the pedal device
    #[snafu(display("Error reading controller: {description}"))]
    DeviceRead { description: String },
    #[snafu(display("Controller {device} not found"))]
    DeviceNotFound { device: String },
    #[snafu(display("Input source exhausted"))]
    InputExhausted,
    #[snafu(display("Unable to open replay file"))]
    ReplayIO { source: io::Error },
    #[snafu(display("Invalid replay record: {description}"))]
    ReplayParse { description: String },
    #[snafu(display("HID backend error: {description}"))]
    Hid { description: String },

    // Single instance guard
    #[snafu(display("Another instance is already running (lock held on {})", path.display()))]
    AlreadyRunning { path: PathBuf },
    #[snafu(display("Error creating instance lock file"))]
    InstanceLockIO { source: io::Error },

    // Errors while publishing telemetry frames
    #[snafu(display("Error writing telemetry file"))]
    WriterError { source: io::Error },
    #[snafu(display("Error broadcasting telemetry frame"))]
    TelemetryBroadcastError {
        source: Box<SendError<TelemetryFrame>>,
    },
}

impl PedalwatchError {
    pub(crate) fn invalid_config(field: &str, reason: impl Into<String>) -> Self {
        PedalwatchError::InvalidConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<SendError<TelemetryFrame>> for PedalwatchError {
    fn from(value: SendError<TelemetryFrame>) -> Self {
        PedalwatchError::TelemetryBroadcastError {
            source: Box::new(value),
        }
    }
}
