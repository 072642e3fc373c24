use crate::prelude::*;
use crate::SendSync;
use core::time::Duration;
use std::sync::Arc;
use std::time::SystemTime;

/// A clock provider
///
/// Use the [`StandardClock`] implementation outside of tests
pub trait Clock: SendSync {
    /// A duration since the UNIX epoch
    fn now(&self) -> Duration;

    /// Seconds since the UNIX epoch
    fn now_secs(&self) -> u64 {
        self.now().as_secs()
    }
}

/// A clock provider using the std::time::SystemTime
pub struct StandardClock();

impl SendSync for StandardClock {}

impl Clock for StandardClock {
    fn now(&self) -> Duration {
        // a system clock before the epoch is treated as the epoch
        SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default()
    }
}

/// A clock provider with manually updated notion of "now"
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<Duration>>);

impl SendSync for ManualClock {}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ManualClock {
    /// Create a manual clock
    pub fn new(now: Duration) -> Self {
        ManualClock(Arc::new(Mutex::new(now)))
    }

    /// Set the current time as duration since the UNIX epoch
    pub fn set(&self, now: Duration) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}
