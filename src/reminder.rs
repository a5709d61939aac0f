//! Hourly reminder suppression.
//!
//! Reminders fire once an hour; one is hidden when the user already drank during that hour.

use std::sync::atomic::{AtomicI32, Ordering};

const NO_INTAKE: i32 = -1;

#[derive(Debug)]
pub struct ReminderGate {
    last_intake_hour: AtomicI32,
}

impl Default for ReminderGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReminderGate {
    pub fn new() -> Self {
        Self {
            last_intake_hour: AtomicI32::new(NO_INTAKE),
        }
    }

    pub fn record_intake(&self, hour: u32) {
        self.last_intake_hour.store(hour as i32, Ordering::Relaxed);
    }

    pub fn last_intake_hour(&self) -> Option<u32> {
        match self.last_intake_hour.load(Ordering::Relaxed) {
            NO_INTAKE => None,
            hour => Some(hour as u32),
        }
    }

    pub fn should_remind(&self, hour: u32) -> bool {
        self.last_intake_hour() != Some(hour)
    }
}
