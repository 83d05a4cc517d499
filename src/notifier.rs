use std::process::{Child, Command, Stdio};

use log::{info, warn};

pub const CONTROLLER_NOT_FOUND: &str = "Controller not found. Retrying.";
pub const CONTROLLER_FOUND: &str = "Controller found. Resuming monitoring.";
pub const ALREADY_RUNNING: &str = "Error. Another instance of pedalwatch is already running.";

pub fn controller_disconnected(backoff_s: u64) -> String {
    format!("Controller disconnected. Waiting {backoff_s} seconds.")
}

/// Delivers alert texts to the user.
///
/// Delivery is best effort: implementations must return quickly and never fail
/// the caller.
pub trait Notifier {
    /// `echo_to_log` asks for the text to also show up in the log output.
    fn notify(&mut self, text: &str, echo_to_log: bool);
}

/// Writes alerts to the log only.
///
/// The log is where these alerts are delivered, so every text is written
/// whatever `echo_to_log` says.
#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, text: &str, _echo_to_log: bool) {
        warn!("{text}");
    }
}

/// Runs an external program for every alert with the text as its last
/// argument, e.g. a text to speech script.
///
/// Children are never waited on in the tick loop, finished ones are reaped on
/// the next notification.
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
    children: Vec<Child>,
}

impl CommandNotifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            children: Vec::new(),
        }
    }

    fn reap(&mut self) {
        self.children
            .retain_mut(|child| matches!(child.try_wait(), Ok(None)));
    }

    #[cfg(test)]
    fn running(&mut self) -> usize {
        self.reap();
        self.children.len()
    }
}

impl Notifier for CommandNotifier {
    fn notify(&mut self, text: &str, echo_to_log: bool) {
        if echo_to_log {
            info!("{text}");
        }
        self.reap();

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(child) => self.children.push(child),
            Err(e) => warn!("Could not run alert command {}: {}", self.program, e),
        }
    }
}

impl Drop for CommandNotifier {
    fn drop(&mut self) {
        self.reap();
        if !self.children.is_empty() {
            info!("Leaving {} alert commands running", self.children.len());
        }
    }
}
