//! Unix timestamps and alignment of wall-clock time to intervals.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Number of nanoseconds in a calendar day (UTC, without leap seconds).
const NANOS_PER_DAY: u128 = 86_400 * 1_000_000_000;

/// Rounds `time` down to a multiple of `interval`, counted from the start of its UTC day.
///
/// Aligning to the start of the day rather than to the UNIX epoch means that all processes with
/// the same interval agree on the boundaries, even for intervals that do not evenly divide the
/// epoch offset. A zero interval returns `time` unchanged.
///
/// # Example
///
/// ```
/// use std::time::{Duration, SystemTime};
/// use tally_common::align_to_interval;
///
/// let time = SystemTime::UNIX_EPOCH + Duration::from_millis(12_345);
/// let aligned = align_to_interval(time, Duration::from_secs(10));
/// assert_eq!(aligned, SystemTime::UNIX_EPOCH + Duration::from_secs(10));
/// ```
pub fn align_to_interval(time: SystemTime, interval: Duration) -> SystemTime {
    let interval = interval.as_nanos();
    if interval == 0 {
        return time;
    }

    let Ok(since_epoch) = time.duration_since(SystemTime::UNIX_EPOCH) else {
        return time;
    };

    let time_of_day = since_epoch.as_nanos() % NANOS_PER_DAY;
    // Always less than a day, so this fits into 64 bits.
    let offset = (time_of_day % interval) as u64;
    time - Duration::from_nanos(offset)
}

/// Returns the first interval boundary strictly after `now`.
///
/// This is the boundary computed by [`align_to_interval`] for `now + interval`.
pub fn next_interval_boundary(now: SystemTime, interval: Duration) -> SystemTime {
    align_to_interval(now + interval, interval)
}

/// A unix timestamp (full seconds elapsed since 1970-01-01 00:00 UTC).
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnixTimestamp(u64);

impl UnixTimestamp {
    /// Creates a unix timestamp from the given number of seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Creates a unix timestamp from the given system time.
    ///
    /// Times before the UNIX epoch are clamped to `0`.
    pub fn from_system(time: SystemTime) -> Self {
        let duration = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self(duration)
    }

    /// Returns the current timestamp.
    #[inline]
    pub fn now() -> Self {
        Self::from_system(SystemTime::now())
    }

    /// Returns the number of seconds since the UNIX epoch start.
    pub fn as_secs(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixTimestamp({})", self.as_secs())
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_secs(), f)
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.as_secs())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Self::from_secs(secs))
    }
}
