use std::{collections::VecDeque, fs::File, io::BufReader, path::Path};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_jsonlines::JsonLinesReader;

use crate::{PedalwatchError, pedals::Sample};

use super::{DeviceCapabilities, DeviceId, DeviceIdentity, InputSource};

/// One line of a replay file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayRecord {
    /// The device the following samples come from.
    Device {
        vendor_id: u16,
        product_id: u16,
        axis_max: u32,
    },
    Sample(Sample),
    /// A single failed read.
    ReadError,
    /// The device went away: the read fails and the next `failed_scans`
    /// rediscovery attempts come back empty.
    Disconnect { failed_scans: u32 },
}

#[derive(Clone, Copy, Debug)]
struct ReplayDevice {
    identity: DeviceIdentity,
    axis_max: u32,
}

/// Replays a recorded (or hand written) pedal session.
///
/// Makes every scenario reproducible without hardware: stuck clutches, worn
/// gas pedals and unplugged devices are all just lines in a JSON Lines file.
pub struct ReplayInputSource {
    records: VecDeque<ReplayRecord>,
    device: Option<ReplayDevice>,
    failed_scans_left: u32,
    samples_read: usize,
}

impl ReplayInputSource {
    pub fn from_records(records: Vec<ReplayRecord>) -> Self {
        let mut source = Self {
            records: records.into(),
            device: None,
            failed_scans_left: 0,
            samples_read: 0,
        };
        source.take_device_records();
        source
    }

    /// Load a replay from a JSON Lines file of `ReplayRecord`s.
    ///
    /// # Errors
    ///
    /// `ReplayIO` when the file can't be opened, `ReplayParse` with the line
    /// number of the first record that doesn't parse.
    pub fn from_file(path: &Path) -> Result<Self, PedalwatchError> {
        let file = File::open(path).map_err(|e| PedalwatchError::ReplayIO { source: e })?;
        let records = JsonLinesReader::new(BufReader::new(file))
            .read_all::<ReplayRecord>()
            .enumerate()
            .map(|(line, record)| {
                record.map_err(|e| PedalwatchError::ReplayParse {
                    description: format!("line {}: {}", line + 1, e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Loaded {} replay records from {}",
            records.len(),
            path.display()
        );
        Ok(Self::from_records(records))
    }

    pub fn samples_read(&self) -> usize {
        self.samples_read
    }

    /// Adopt any device description waiting at the head of the queue.
    fn take_device_records(&mut self) {
        while let Some(ReplayRecord::Device {
            vendor_id,
            product_id,
            axis_max,
        }) = self.records.front().cloned()
        {
            self.records.pop_front();
            debug!("Replay device VID:{vendor_id:04X} PID:{product_id:04X} axis max {axis_max}");
            self.device = Some(ReplayDevice {
                identity: DeviceIdentity {
                    vendor_id,
                    product_id,
                },
                axis_max,
            });
        }
    }
}

impl InputSource for ReplayInputSource {
    fn select(&mut self, _device: DeviceId) -> Result<(), PedalwatchError> {
        Ok(())
    }

    fn poll(&mut self) -> Result<Sample, PedalwatchError> {
        self.take_device_records();
        match self.records.pop_front() {
            None => Err(PedalwatchError::InputExhausted),
            Some(ReplayRecord::Sample(sample)) => {
                self.samples_read += 1;
                Ok(sample)
            }
            Some(ReplayRecord::ReadError) => Err(PedalwatchError::DeviceRead {
                description: "recorded read failure".to_string(),
            }),
            Some(ReplayRecord::Disconnect { failed_scans }) => {
                self.failed_scans_left = failed_scans;
                Err(PedalwatchError::DeviceRead {
                    description: "device unplugged".to_string(),
                })
            }
            Some(ReplayRecord::Device { .. }) => Err(PedalwatchError::ReplayParse {
                description: "unexpected device record".to_string(),
            }),
        }
    }

    fn find_by_identity(
        &mut self,
        identity: DeviceIdentity,
    ) -> Result<Option<DeviceId>, PedalwatchError> {
        if self.failed_scans_left > 0 {
            self.failed_scans_left -= 1;
            return Ok(None);
        }
        // a replugged device may announce new capabilities
        self.take_device_records();
        if self.device.is_some_and(|device| device.identity == identity) {
            return Ok(Some(DeviceId(0)));
        }
        // nothing is read while searching, so a different device stays different
        if self.records.is_empty() {
            Err(PedalwatchError::InputExhausted)
        } else {
            Err(PedalwatchError::DeviceNotFound {
                device: identity.to_string(),
            })
        }
    }

    fn capabilities(&mut self, device: DeviceId) -> Result<DeviceCapabilities, PedalwatchError> {
        self.device
            .map(|d| DeviceCapabilities {
                axis_max: d.axis_max,
            })
            .ok_or_else(|| PedalwatchError::DeviceNotFound {
                device: device.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const IDENTITY: DeviceIdentity = DeviceIdentity {
        vendor_id: 0x0eb7,
        product_id: 0x1839,
    };

    fn device(axis_max: u32) -> ReplayRecord {
        ReplayRecord::Device {
            vendor_id: IDENTITY.vendor_id,
            product_id: IDENTITY.product_id,
            axis_max,
        }
    }

    fn sample(raw_gas: u32, timestamp_ms: u64) -> ReplayRecord {
        ReplayRecord::Sample(Sample {
            raw_gas,
            raw_clutch: 1023,
            timestamp_ms,
        })
    }

    #[test]
    fn test_replays_samples_then_exhausts() {
        let mut source = ReplayInputSource::from_records(vec![
            device(1023),
            sample(1000, 0),
            sample(900, 1000),
        ]);

        assert_eq!(
            source.capabilities(DeviceId(0)).unwrap(),
            DeviceCapabilities { axis_max: 1023 }
        );
        assert_eq!(source.poll().unwrap().raw_gas, 1000);
        assert_eq!(source.poll().unwrap().raw_gas, 900);
        assert!(matches!(
            source.poll(),
            Err(PedalwatchError::InputExhausted)
        ));
        assert_eq!(source.samples_read(), 2);
    }

    #[test]
    fn test_disconnect_fails_scans_then_finds_new_device() {
        let mut source = ReplayInputSource::from_records(vec![
            device(1023),
            ReplayRecord::Disconnect { failed_scans: 2 },
            device(65535),
            sample(65535, 5000),
        ]);

        assert!(matches!(
            source.poll(),
            Err(PedalwatchError::DeviceRead { .. })
        ));
        assert_eq!(source.find_by_identity(IDENTITY).unwrap(), None);
        assert_eq!(source.find_by_identity(IDENTITY).unwrap(), None);
        assert_eq!(source.find_by_identity(IDENTITY).unwrap(), Some(DeviceId(0)));
        assert_eq!(source.capabilities(DeviceId(0)).unwrap().axis_max, 65535);
        assert_eq!(source.poll().unwrap().timestamp_ms, 5000);
    }

    #[test]
    fn test_other_identity_never_found() {
        let other = DeviceIdentity {
            vendor_id: 0x046d,
            product_id: 0xc24f,
        };

        let mut source = ReplayInputSource::from_records(vec![device(1023), sample(0, 0)]);
        assert!(matches!(
            source.find_by_identity(other),
            Err(PedalwatchError::DeviceNotFound { .. })
        ));

        let mut source = ReplayInputSource::from_records(vec![device(1023)]);
        assert!(matches!(
            source.find_by_identity(other),
            Err(PedalwatchError::InputExhausted)
        ));
    }

    #[test]
    fn test_disconnect_at_end_of_replay() {
        let mut source = ReplayInputSource::from_records(vec![
            device(1023),
            ReplayRecord::Disconnect { failed_scans: 1 },
        ]);

        assert!(source.poll().is_err());
        assert_eq!(source.find_by_identity(IDENTITY).unwrap(), None);
        assert_eq!(source.find_by_identity(IDENTITY).unwrap(), Some(DeviceId(0)));
        assert!(matches!(
            source.poll(),
            Err(PedalwatchError::InputExhausted)
        ));
    }

    #[test]
    fn test_no_device_record_has_no_capabilities() {
        let mut source = ReplayInputSource::from_records(vec![sample(0, 0)]);
        assert!(matches!(
            source.capabilities(DeviceId(3)),
            Err(PedalwatchError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"Device":{{"vendor_id":3767,"product_id":6201,"axis_max":1023}}}}"#
        )
        .unwrap();
        writeln!(
            file,
            r#"{{"Sample":{{"raw_gas":1023,"raw_clutch":983,"timestamp_ms":0}}}}"#
        )
        .unwrap();
        writeln!(file, r#""ReadError""#).unwrap();

        let mut source = ReplayInputSource::from_file(file.path()).unwrap();
        assert_eq!(source.find_by_identity(IDENTITY).unwrap(), Some(DeviceId(0)));
        assert_eq!(source.poll().unwrap().raw_clutch, 983);
        assert!(matches!(
            source.poll(),
            Err(PedalwatchError::DeviceRead { .. })
        ));
    }

    #[test]
    fn test_from_file_reports_bad_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#""ReadError""#).unwrap();
        writeln!(file, r#"{{"Sample":{{"raw_gas":"full"}}}}"#).unwrap();

        match ReplayInputSource::from_file(file.path()) {
            Err(PedalwatchError::ReplayParse { description }) => {
                assert!(description.starts_with("line 2:"))
            }
            other => panic!("Expected ReplayParse, got {:?}", other.map(|_| ())),
        }
    }
}
