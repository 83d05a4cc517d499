use std::time::Instant;

use hidapi::{DeviceInfo, HidApi, HidDevice};
use log::{debug, info, warn};

use crate::{PedalwatchError, pedals::Sample};

use super::{DeviceCapabilities, DeviceId, DeviceIdentity, InputSource};

const GENERIC_DESKTOP_PAGE: u16 = 0x01;
const USAGE_JOYSTICK: u16 = 0x04;
const USAGE_GAMEPAD: u16 = 0x05;
const REPORT_SIZE: usize = 64;

/// Where the two pedal axes sit in the device's input report.
///
/// Both axes are read as little endian u16 at the given byte offsets. The
/// defaults fit the common layout of pedal boxes reporting one axis per
/// 16 bit field right after the report id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HidReportLayout {
    pub gas_offset: usize,
    pub clutch_offset: usize,
    pub axis_max: u32,
    /// The hardware reports `axis_max` for a released pedal.
    pub inverted: bool,
}

impl Default for HidReportLayout {
    fn default() -> Self {
        Self {
            gas_offset: 1,
            clutch_offset: 3,
            axis_max: 65535,
            inverted: true,
        }
    }
}

impl HidReportLayout {
    /// Raw reading of a released pedal.
    pub fn rest_value(&self) -> u32 {
        if self.inverted { self.axis_max } else { 0 }
    }

    fn rest_axes(&self) -> (u32, u32) {
        (self.rest_value(), self.rest_value())
    }

    fn decode(&self, report: &[u8]) -> Option<(u32, u32)> {
        Some((
            read_u16_le(report, self.gas_offset)?,
            read_u16_le(report, self.clutch_offset)?,
        ))
    }
}

fn read_u16_le(report: &[u8], offset: usize) -> Option<u32> {
    let bytes = report.get(offset..offset + 2)?;
    Some(u32::from(u16::from_le_bytes([bytes[0], bytes[1]])))
}

fn is_game_controller(info: &DeviceInfo) -> bool {
    info.usage_page() == GENERIC_DESKTOP_PAGE
        && matches!(info.usage(), USAGE_JOYSTICK | USAGE_GAMEPAD)
}

/// Live pedal input through hidapi.
///
/// Device ids are indices into the list of attached joysticks and gamepads,
/// in hidapi enumeration order.
pub struct HidInputSource {
    api: HidApi,
    layout: HidReportLayout,
    controllers: Vec<DeviceInfo>,
    device: Option<HidDevice>,
    last_axes: Option<(u32, u32)>,
    started: Instant,
}

impl HidInputSource {
    pub fn new(layout: HidReportLayout) -> Result<Self, PedalwatchError> {
        let api = HidApi::new().map_err(|e| PedalwatchError::Hid {
            description: e.to_string(),
        })?;
        let mut source = Self {
            api,
            layout,
            controllers: Vec::new(),
            device: None,
            last_axes: None,
            started: Instant::now(),
        };
        source.scan();
        Ok(source)
    }

    fn scan(&mut self) {
        if let Err(e) = self.api.refresh_devices() {
            warn!("Could not refresh HID device list: {e}");
        }
        self.controllers = self
            .api
            .device_list()
            .filter(|info| is_game_controller(info))
            .cloned()
            .collect();
        debug!("Found {} game controllers", self.controllers.len());
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn read_error(&mut self, description: String) -> PedalwatchError {
        self.device = None;
        self.last_axes = None;
        PedalwatchError::DeviceRead { description }
    }
}

impl InputSource for HidInputSource {
    fn select(&mut self, device: DeviceId) -> Result<(), PedalwatchError> {
        let info = self.controllers.get(device.0 as usize).ok_or_else(|| {
            PedalwatchError::DeviceNotFound {
                device: device.to_string(),
            }
        })?;
        let handle = info
            .open_device(&self.api)
            .map_err(|e| PedalwatchError::Hid {
                description: e.to_string(),
            })?;
        handle
            .set_blocking_mode(false)
            .map_err(|e| PedalwatchError::Hid {
                description: e.to_string(),
            })?;

        info!(
            "Reading controller {} (VID:{:04X} PID:{:04X} {})",
            device,
            info.vendor_id(),
            info.product_id(),
            info.product_string().unwrap_or("unknown"),
        );
        self.device = Some(handle);
        self.last_axes = None;
        Ok(())
    }

    fn poll(&mut self) -> Result<Sample, PedalwatchError> {
        let Some(device) = self.device.as_ref() else {
            return Err(PedalwatchError::DeviceRead {
                description: "no controller selected".to_string(),
            });
        };

        // drain everything queued since the last tick, only the newest report matters
        let mut buf = [0u8; REPORT_SIZE];
        let mut latest = self.last_axes;
        let failure = loop {
            match device.read(&mut buf) {
                Ok(0) => break None,
                Ok(n) => {
                    if let Some(axes) = self.layout.decode(&buf[..n]) {
                        latest = Some(axes);
                    }
                }
                Err(e) => break Some(e.to_string()),
            }
        };
        if let Some(description) = failure {
            return Err(self.read_error(description));
        }

        // joysticks only report on change, before the first report the pedals are at rest
        let (raw_gas, raw_clutch) = latest.unwrap_or_else(|| self.layout.rest_axes());
        self.last_axes = latest;
        Ok(Sample {
            raw_gas,
            raw_clutch,
            timestamp_ms: self.now_ms(),
        })
    }

    fn find_by_identity(
        &mut self,
        identity: DeviceIdentity,
    ) -> Result<Option<DeviceId>, PedalwatchError> {
        self.scan();
        Ok(self
            .controllers
            .iter()
            .position(|info| {
                info.vendor_id() == identity.vendor_id && info.product_id() == identity.product_id
            })
            .map(|index| DeviceId(index as u32)))
    }

    fn capabilities(&mut self, device: DeviceId) -> Result<DeviceCapabilities, PedalwatchError> {
        if device.0 as usize >= self.controllers.len() {
            return Err(PedalwatchError::DeviceNotFound {
                device: device.to_string(),
            });
        }
        Ok(DeviceCapabilities {
            axis_max: self.layout.axis_max,
        })
    }
}
