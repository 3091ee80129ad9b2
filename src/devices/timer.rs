//! Interval timer
//!
//! Counts cycles handed to it by the dispatcher and fires once the count
//! reaches the guest-programmed timeout, then starts over. A timeout of zero
//! disables it.

use serde::{Deserialize, Serialize};

/// Interval timer device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalTimer {
    /// Cycles counted since the last expiry
    timer: u32,
    /// Expiry threshold (0 = disabled)
    timeout: u32,
}

impl IntervalTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by `ticks`. Returns true when the timer expires.
    pub fn tick(&mut self, ticks: u32) -> bool {
        if self.timeout == 0 {
            return false;
        }
        self.timer = self.timer.wrapping_add(ticks);
        if self.timer >= self.timeout {
            self.timer = 0;
            true
        } else {
            false
        }
    }

    pub fn set_timeout(&mut self, timeout: u32) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    pub fn count(&self) -> u32 {
        self.timer
    }

    pub fn enabled(&self) -> bool {
        self.timeout != 0
    }

    pub fn reset(&mut self) {
        self.timer = 0;
        self.timeout = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_never_fires() {
        let mut t = IntervalTimer::new();
        for _ in 0..100 {
            assert!(!t.tick(4096));
        }
        assert_eq!(t.count(), 0);
    }

    #[test]
    fn test_fires_and_rearms() {
        let mut t = IntervalTimer::new();
        t.set_timeout(10_000);
        assert!(!t.tick(4096));
        assert!(!t.tick(4096));
        assert!(t.tick(4096));
        assert_eq!(t.count(), 0);
        assert!(!t.tick(4096));
        assert_eq!(t.count(), 4096);
    }
}
