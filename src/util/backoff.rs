//! Bounded backoff for the polling loops used throughout the crate.
//!
//! Every wait in gatework is an active retry loop; this only throttles how
//! hard a loop hammers the condition it is polling. It never blocks on a
//! wakeup, so a loop always observes its condition within one sleep quantum.

use std::hint::spin_loop;
use std::thread;
use std::time::Duration;

/// Spin, then yield, then sleep briefly between attempts.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;
    const YIELD_LIMIT: u32 = 10;
    const SLEEP: Duration = Duration::from_micros(50);

    pub fn new() -> Self {
        Self { step: 0 }
    }

    /// Reset after the polled condition made progress.
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Wait one step before the next attempt.
    pub fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                spin_loop();
            }
        } else if self.step <= Self::YIELD_LIMIT {
            thread::yield_now();
        } else {
            thread::sleep(Self::SLEEP);
        }

        if self.step <= Self::YIELD_LIMIT {
            self.step += 1;
        }
    }

    /// Whether the backoff has escalated to sleeping.
    pub fn is_completed(&self) -> bool {
        self.step > Self::YIELD_LIMIT
    }
}
