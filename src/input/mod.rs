#[cfg(feature = "hid")]
pub mod hid;
pub mod replay;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{PedalwatchError, pedals::Sample};

pub use replay::{ReplayInputSource, ReplayRecord};

/// Index of a device as enumerated by the input backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// USB vendor/product pair used to find a pedal set again after it was unplugged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VID:{:04X} PID:{:04X}", self.vendor_id, self.product_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// Highest value an axis reports.
    pub axis_max: u32,
}

/// A source of pedal samples.
///
/// # Lifecycle
///
/// 1. Call `select()` with the device to read, either configured explicitly or
///    found with `find_by_identity()`
/// 2. Call `capabilities()` to learn the axis resolution
/// 3. Call `poll()` once per tick
///
/// A failed `poll()` is not fatal: the caller either skips the tick or looks
/// for the device again with `find_by_identity()`.
/// An error from `find_by_identity()` means the device can never come back
/// and ends the search.
pub trait InputSource {
    /// Switch reading to `device`.
    fn select(&mut self, device: DeviceId) -> Result<(), PedalwatchError>;

    /// Read both pedal axes.
    ///
    /// # Errors
    ///
    /// `DeviceRead` when the device can't be read, `InputExhausted` when a
    /// finite source has nothing left to give.
    fn poll(&mut self) -> Result<Sample, PedalwatchError>;

    /// Enumerate the attached devices looking for `identity`.
    ///
    /// `Ok(None)` when it isn't attached right now.
    ///
    /// # Errors
    ///
    /// `InputExhausted` or `DeviceNotFound` when a finite source knows the
    /// device will never show up.
    fn find_by_identity(
        &mut self,
        identity: DeviceIdentity,
    ) -> Result<Option<DeviceId>, PedalwatchError>;

    fn capabilities(&mut self, device: DeviceId) -> Result<DeviceCapabilities, PedalwatchError>;
}
