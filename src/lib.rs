// Library interface for pedalwatch
// The binary and the integration tests drive the monitor through these modules

pub mod config;
pub mod errors;
pub mod input;
pub mod instance;
pub mod monitor;
pub mod notifier;
pub mod pedals;
pub mod telemetry;

// Re-export commonly used types
pub use config::MonitorConfig;
pub use errors::PedalwatchError;
pub use input::{DeviceCapabilities, DeviceId, DeviceIdentity, InputSource};
pub use monitor::{Monitor, TickResult};
pub use notifier::{CommandNotifier, LogNotifier, Notifier};
pub use pedals::{NormalizedSample, PedalAnalyzer, PedalEvent, Sample};
pub use telemetry::{
    FrameFlags, FrameSlot, JsonLinesTelemetryChannel, TelemetryChannel, TelemetryFrame,
};
