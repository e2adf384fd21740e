// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A clock that provides the current wall-clock time as epoch seconds.
///
/// Incidents carry `started_at` as epoch seconds (§3); the sweeper compares
/// it against `now()` to age out stuck incidents.
pub trait Clock: Send + Sync {
    fn epoch_secs(&self) -> u64;
}

/// Real system clock.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_secs(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }
}

/// Fake clock for testing with controllable time.
#[derive(Clone)]
pub struct FakeClock {
    epoch_secs: Arc<Mutex<u64>>,
}

impl FakeClock {
    pub fn new(epoch_secs: u64) -> Self {
        Self { epoch_secs: Arc::new(Mutex::new(epoch_secs)) }
    }

    pub fn advance_secs(&self, secs: u64) {
        *self.epoch_secs.lock() += secs;
    }

    pub fn set_epoch_secs(&self, secs: u64) {
        *self.epoch_secs.lock() = secs;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(1_700_000_000)
    }
}

impl Clock for FakeClock {
    fn epoch_secs(&self) -> u64 {
        *self.epoch_secs.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances() {
        let clock = FakeClock::new(100);
        assert_eq!(clock.epoch_secs(), 100);
        clock.advance_secs(50);
        assert_eq!(clock.epoch_secs(), 150);
    }

    #[test]
    fn system_clock_is_recent() {
        let now = SystemClock.epoch_secs();
        assert!(now > 1_700_000_000);
    }
}
