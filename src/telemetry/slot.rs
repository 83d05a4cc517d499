use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use super::{TelemetryChannel, TelemetryFrame};

type Shared = Arc<(Mutex<Option<TelemetryFrame>>, Condvar)>;

/// In-process home of the most recent frame.
///
/// Every publish swaps in a complete frame under the lock and then wakes the
/// waiting readers, so a reader always sees one whole tick. Clones share the
/// same slot; hand one to each consumer thread.
#[derive(Clone, Default)]
pub struct FrameSlot {
    shared: Shared,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<TelemetryFrame>> {
        self.shared.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn latest(&self) -> Option<TelemetryFrame> {
        self.lock().clone()
    }

    /// Blocks until a frame newer than `after_sequence` is published or
    /// `timeout` runs out. Returns the latest frame if it is newer.
    pub fn wait_newer(
        &self,
        after_sequence: Option<u64>,
        timeout: Duration,
    ) -> Option<TelemetryFrame> {
        let is_newer = |frame: &Option<TelemetryFrame>| {
            frame
                .as_ref()
                .is_some_and(|f| after_sequence.is_none_or(|seq| f.sequence_number > seq))
        };
        let (guard, _) = self
            .shared
            .1
            .wait_timeout_while(self.lock(), timeout, |frame| !is_newer(frame))
            .unwrap_or_else(PoisonError::into_inner);
        guard.clone().filter(|_| is_newer(&guard))
    }
}

impl TelemetryChannel for FrameSlot {
    fn publish(&mut self, frame: &TelemetryFrame) {
        *self.lock() = Some(frame.clone());
        self.shared.1.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(sequence_number: u64) -> TelemetryFrame {
        TelemetryFrame {
            sequence_number,
            ..Default::default()
        }
    }

    #[test]
    fn test_latest_frame_replaces_previous() {
        let mut slot = FrameSlot::new();
        assert_eq!(slot.latest(), None);
        slot.publish(&frame(1));
        slot.publish(&frame(2));
        assert_eq!(slot.latest().unwrap().sequence_number, 2);
    }

    #[test]
    fn test_wait_times_out_without_newer_frame() {
        let mut slot = FrameSlot::new();
        slot.publish(&frame(1));
        assert_eq!(slot.wait_newer(Some(1), Duration::from_millis(20)), None);
        assert_eq!(
            slot.wait_newer(None, Duration::from_millis(20))
                .unwrap()
                .sequence_number,
            1
        );
    }

    #[test]
    fn test_reader_sees_whole_frames_from_other_thread() {
        let mut slot = FrameSlot::new();
        let reader = slot.clone();
        let handle = thread::spawn(move || {
            let mut seen = None;
            while seen.is_none_or(|seq| seq < 50) {
                if let Some(frame) = reader.wait_newer(seen, Duration::from_secs(5)) {
                    // every field of a frame comes from the same tick
                    assert_eq!(u64::from(frame.raw_gas), frame.sequence_number);
                    assert_eq!(frame.timestamp_ms, frame.sequence_number * 10);
                    seen = Some(frame.sequence_number);
                } else {
                    break;
                }
            }
            seen
        });

        for seq in 0..=50 {
            slot.publish(&TelemetryFrame {
                sequence_number: seq,
                timestamp_ms: seq * 10,
                raw_gas: seq as u32,
                ..Default::default()
            });
        }
        assert_eq!(handle.join().unwrap(), Some(50));
    }
}
