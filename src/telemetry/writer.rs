use std::{
    fs::File,
    io::BufWriter,
    path::Path,
    sync::mpsc::{self, Receiver, Sender},
    thread::{self, JoinHandle},
};

use log::{error, warn};
use serde_jsonlines::JsonLinesWriter;

use crate::PedalwatchError;

use super::{TelemetryChannel, TelemetryFrame};

fn write_telemetry(
    telemetry_file: File,
    telemetry_receiver: Receiver<TelemetryFrame>,
) -> Result<(), PedalwatchError> {
    let mut telemetry_writer = JsonLinesWriter::new(BufWriter::new(telemetry_file));
    for frame in &telemetry_receiver {
        telemetry_writer
            .write(&frame)
            .map_err(|e| PedalwatchError::WriterError { source: e })?;
        // dashboards tail the file, keep it current
        telemetry_writer
            .flush()
            .map_err(|e| PedalwatchError::WriterError { source: e })?;
    }
    Ok(())
}

/// Appends every frame to a JSON Lines file from a background thread.
pub struct JsonLinesTelemetryChannel {
    sender: Option<Sender<TelemetryFrame>>,
    writer: Option<JoinHandle<Result<(), PedalwatchError>>>,
}

impl JsonLinesTelemetryChannel {
    /// Creates (or truncates) `path` and starts the writer thread.
    pub fn create(path: &Path) -> Result<Self, PedalwatchError> {
        let telemetry_file =
            File::create(path).map_err(|e| PedalwatchError::WriterError { source: e })?;
        let (sender, receiver) = mpsc::channel::<TelemetryFrame>();
        let writer = thread::spawn(move || write_telemetry(telemetry_file, receiver));
        Ok(Self {
            sender: Some(sender),
            writer: Some(writer),
        })
    }

    fn send(&mut self, frame: &TelemetryFrame) -> Result<(), PedalwatchError> {
        match self.sender.as_ref() {
            Some(sender) => Ok(sender.send(frame.clone())?),
            None => Ok(()),
        }
    }
}

impl TelemetryChannel for JsonLinesTelemetryChannel {
    fn publish(&mut self, frame: &TelemetryFrame) {
        if let Err(e) = self.send(frame) {
            // the writer thread is gone, its error surfaces on drop
            warn!("Telemetry writer stopped, no longer recording frames: {e}");
            self.sender = None;
        }
    }
}

impl Drop for JsonLinesTelemetryChannel {
    fn drop(&mut self) {
        // closing the channel ends the writer loop
        self.sender.take();
        if let Some(writer) = self.writer.take() {
            match writer.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Error while writing telemetry: {e}"),
                Err(_) => error!("Telemetry writer thread panicked"),
            }
        }
    }
}
