use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::protocol::{Metric, MetricValue, TimeValue};

/// An error returned when sending metrics to a [`StatsClient`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// A single encoded metric does not fit into one datagram.
    #[error("metric of {len} bytes exceeds the maximum datagram size of {max} bytes")]
    MetricTooLong {
        /// The encoded length of the metric including its line terminator.
        len: usize,
        /// The configured maximum datagram size.
        max: usize,
    },
    /// The endpoint could not be resolved to an address.
    #[error("metrics endpoint could not be resolved")]
    Unresolved,
    /// The underlying socket failed.
    #[error("failed to send metrics")]
    Io(#[from] io::Error),
}

/// A sink for metrics.
///
/// This is implemented by the aggregating [`StatsCollection`](crate::StatsCollection), by network
/// transports, and by decorators such as [`ScopedStatsClient`]. Convenience methods for sending
/// individual measurements are provided by [`StatsClientExt`].
pub trait StatsClient: Send + Sync {
    /// Sends a single metric.
    fn send(&self, metric: &Metric) -> Result<(), SendError>;

    /// Sends a batch of metrics.
    ///
    /// The batch is not atomic as a whole. The default implementation sends each metric in order
    /// and stops at the first error.
    fn send_all(&self, metrics: &[Metric]) -> Result<(), SendError> {
        for metric in metrics {
            self.send(metric)?;
        }
        Ok(())
    }
}

impl<T: StatsClient + ?Sized> StatsClient for &T {
    fn send(&self, metric: &Metric) -> Result<(), SendError> {
        (**self).send(metric)
    }

    fn send_all(&self, metrics: &[Metric]) -> Result<(), SendError> {
        (**self).send_all(metrics)
    }
}

impl<T: StatsClient + ?Sized> StatsClient for Arc<T> {
    fn send(&self, metric: &Metric) -> Result<(), SendError> {
        (**self).send(metric)
    }

    fn send_all(&self, metrics: &[Metric]) -> Result<(), SendError> {
        (**self).send_all(metrics)
    }
}

impl<T: StatsClient + ?Sized> StatsClient for Box<T> {
    fn send(&self, metric: &Metric) -> Result<(), SendError> {
        (**self).send(metric)
    }

    fn send_all(&self, metrics: &[Metric]) -> Result<(), SendError> {
        (**self).send_all(metrics)
    }
}

/// Converts a duration into a timer value in milliseconds.
///
/// Whole milliseconds are sent as integers, anything else keeps its fractional part.
fn duration_to_time(duration: Duration) -> TimeValue {
    let nanos = duration.as_nanos();
    match u64::try_from(nanos / 1_000_000) {
        Ok(millis) if nanos % 1_000_000 == 0 => TimeValue::Integer(millis),
        _ => TimeValue::Float(nanos as f64 / 1_000_000.0),
    }
}

/// Convenience methods for sending individual measurements to a [`StatsClient`].
pub trait StatsClientExt: StatsClient {
    /// Increments the counter `name` by one.
    fn counter(&self, name: &str) -> Result<(), SendError> {
        self.counter_by(name, 1)
    }

    /// Adds `value` to the counter `name`.
    fn counter_by(&self, name: &str, value: i64) -> Result<(), SendError> {
        self.send(&Metric::new(name, MetricValue::Counter(value)))
    }

    /// Records a timer sample in milliseconds.
    fn timer(&self, name: &str, duration: Duration) -> Result<(), SendError> {
        self.send(&Metric::new(name, MetricValue::Time(duration_to_time(duration))))
    }

    /// Sets the gauge `name` to an absolute value.
    fn gauge(&self, name: &str, value: u64) -> Result<(), SendError> {
        self.send(&Metric::new(name, MetricValue::Gauge(value)))
    }

    /// Adjusts the gauge `name` by a signed amount.
    fn gauge_delta(&self, name: &str, delta: i64) -> Result<(), SendError> {
        self.send(&Metric::new(name, MetricValue::GaugeDelta(delta)))
    }

    /// Sets the gauge `name` to a signed absolute value.
    ///
    /// Gauges are unsigned on the wire. Negative values are sent as a reset to `0` followed by a
    /// negative delta in a single batch.
    fn gauge_absolute_value(&self, name: &str, value: i64) -> Result<(), SendError> {
        match u64::try_from(value) {
            Ok(value) => self.gauge(name, value),
            Err(_) => self.send_all(&[
                Metric::new(name, MetricValue::Gauge(0)),
                Metric::new(name, MetricValue::GaugeDelta(value)),
            ]),
        }
    }

    /// Returns a client that prefixes all metric names with `prefix`.
    fn scope(&self, prefix: impl Into<StatsPrefix>) -> ScopedStatsClient<&Self> {
        ScopedStatsClient::new(self, prefix)
    }
}

impl<T: StatsClient + ?Sized> StatsClientExt for T {}

/// A client that discards all metrics.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStatsClient;

impl StatsClient for NullStatsClient {
    fn send(&self, _metric: &Metric) -> Result<(), SendError> {
        Ok(())
    }

    fn send_all(&self, _metrics: &[Metric]) -> Result<(), SendError> {
        Ok(())
    }
}

/// A dot-terminated prefix for metric names.
///
/// A trailing `.` is added if missing. An empty prefix leaves names unchanged.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct StatsPrefix(String);

impl StatsPrefix {
    /// Creates a new prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('.') {
            prefix.push('.');
        }
        Self(prefix)
    }

    /// Returns the prefix including its trailing `.`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the full name of `name` within this prefix.
    pub fn apply(&self, name: &str) -> String {
        let mut full = String::with_capacity(self.0.len() + name.len());
        full.push_str(&self.0);
        full.push_str(name);
        full
    }
}

impl From<&str> for StatsPrefix {
    fn from(prefix: &str) -> Self {
        Self::new(prefix)
    }
}

impl From<String> for StatsPrefix {
    fn from(prefix: String) -> Self {
        Self::new(prefix)
    }
}

impl fmt::Display for StatsPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A client that prefixes the names of all metrics before passing them on.
///
/// Batches are forwarded as batches, so transports can still pack them together.
#[derive(Clone, Debug)]
pub struct ScopedStatsClient<C> {
    inner: C,
    prefix: StatsPrefix,
}

impl<C: StatsClient> ScopedStatsClient<C> {
    /// Wraps `inner` with the given prefix.
    pub fn new(inner: C, prefix: impl Into<StatsPrefix>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    /// Returns the prefix of this client.
    pub fn prefix(&self) -> &StatsPrefix {
        &self.prefix
    }

    /// Returns the wrapped client.
    pub fn into_inner(self) -> C {
        self.inner
    }

    fn scoped(&self, metric: &Metric) -> Metric {
        Metric::new(self.prefix.apply(&metric.name), metric.value)
    }
}

impl<C: StatsClient> StatsClient for ScopedStatsClient<C> {
    fn send(&self, metric: &Metric) -> Result<(), SendError> {
        self.inner.send(&self.scoped(metric))
    }

    fn send_all(&self, metrics: &[Metric]) -> Result<(), SendError> {
        let scoped: Vec<_> = metrics.iter().map(|m| self.scoped(m)).collect();
        self.inner.send_all(&scoped)
    }
}
