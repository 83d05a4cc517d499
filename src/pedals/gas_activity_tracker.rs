use log::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityTransition {
    /// Gas left the idle band while idle, a racing stint starts.
    Resumed,
    /// Gas stayed in the idle band longer than the timeout, session looks paused.
    Paused,
}

/// Decides whether the driver is racing or sitting in a menu/pause.
///
/// A paused sim produces a pedal resting in the idle band for a long time, while
/// racing keeps moving the gas out of it every few seconds.
pub struct GasActivityTracker {
    is_racing: bool,
    last_gas_activity_ms: u64,
    timeout_ms: u64,
}

impl GasActivityTracker {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            is_racing: false,
            last_gas_activity_ms: 0,
            timeout_ms,
        }
    }

    pub fn is_racing(&self) -> bool {
        self.is_racing
    }

    pub fn last_gas_activity_ms(&self) -> u64 {
        self.last_gas_activity_ms
    }

    pub fn reset(&mut self) {
        self.is_racing = false;
        self.last_gas_activity_ms = 0;
    }

    pub fn update(&mut self, gas: u32, gas_idle_max: u32, now_ms: u64) -> Option<ActivityTransition> {
        if gas > gas_idle_max {
            self.last_gas_activity_ms = now_ms;
            if !self.is_racing {
                self.is_racing = true;
                debug!("Gas: Activity resumed");
                return Some(ActivityTransition::Resumed);
            }
        } else if self.is_racing
            && now_ms.saturating_sub(self.last_gas_activity_ms) > self.timeout_ms
        {
            self.is_racing = false;
            debug!("Gas: Auto-pause (idle for {} s)", self.timeout_ms / 1000);
            return Some(ActivityTransition::Paused);
        }
        None
    }
}
