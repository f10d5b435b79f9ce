use std::time::{Duration, SystemTime};

use tally_common::next_interval_boundary;

/// Tracks the wall-clock boundaries at which the agent flushes.
///
/// The first boundary is the next multiple of the interval counted from the start of the UTC day,
/// so that independent agents flush in sync. Afterwards, boundaries advance by exactly one interval
/// per flush, regardless of when the flush actually happened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FlushSchedule {
    next: SystemTime,
    interval: Duration,
}

impl FlushSchedule {
    /// Creates a schedule with the first boundary after `now`.
    pub fn new(now: SystemTime, interval: Duration) -> Self {
        Self {
            next: next_interval_boundary(now, interval),
            interval,
        }
    }

    /// Returns the next boundary.
    pub fn next(&self) -> SystemTime {
        self.next
    }

    /// Returns the flush interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the due boundary if `now` has reached it and advances to the following one.
    ///
    /// After missed boundaries, every poll returns the next missed boundary until the schedule has
    /// caught up.
    pub fn poll(&mut self, now: SystemTime) -> Option<SystemTime> {
        if now < self.next {
            return None;
        }

        let due = self.next;
        self.next += self.interval;
        Some(due)
    }
}
