use std::fmt;
use std::iter::FusedIterator;

/// The unsigned integer type carried by gauges and integral timers.
pub type GaugeType = u64;

/// The signed integer type carried by counters and gauge deltas.
pub type CounterType = i64;

/// The value of a [timer](MetricValue::Time) measurement.
///
/// Timers are sent as integers on the wire. Floating point durations keep their full precision in
/// memory and are truncated only when encoded.
///
/// Values compare by magnitude, so an integral float equals the integer it encodes to.
#[derive(Clone, Copy, Debug)]
pub enum TimeValue {
    /// A whole number of milliseconds.
    Integer(u64),
    /// A fractional number of milliseconds.
    Float(f64),
}

impl TimeValue {
    /// Returns the full precision value.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Integer(value) => value as f64,
            Self::Float(value) => value,
        }
    }

    /// Returns the value as it is rendered on the wire.
    ///
    /// Floats are truncated towards zero. Negative values and `NaN` saturate to `0`.
    pub fn as_u64(&self) -> u64 {
        match *self {
            Self::Integer(value) => value,
            Self::Float(value) => value as u64,
        }
    }
}

impl PartialEq for TimeValue {
    fn eq(&self, other: &Self) -> bool {
        match (*self, *other) {
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Integer(int), Self::Float(float)) | (Self::Float(float), Self::Integer(int)) => {
                // `u64::MAX as f64` rounds up to 2^64, which is out of range.
                float.fract() == 0.0
                    && (0.0..u64::MAX as f64).contains(&float)
                    && float as u64 == int
            }
        }
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_u64(), f)
    }
}

/// The [typed value](Metric::value) of a metric.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    /// Stores an absolute snapshot of a value. See [`MetricType::Gauge`].
    Gauge(GaugeType),
    /// Adjusts the gauge of the same name by a signed amount. See [`MetricType::GaugeDelta`].
    GaugeDelta(CounterType),
    /// Counts instances of an event. See [`MetricType::Counter`].
    Counter(CounterType),
    /// Records a duration or size sample. See [`MetricType::Time`].
    Time(TimeValue),
}

impl MetricValue {
    /// Creates a [`MetricValue::Gauge`].
    pub fn gauge(value: u64) -> Self {
        Self::Gauge(value)
    }

    /// Creates a [`MetricValue::GaugeDelta`].
    pub fn gauge_delta(delta: i64) -> Self {
        Self::GaugeDelta(delta)
    }

    /// Creates a [`MetricValue::Counter`].
    pub fn counter(value: i64) -> Self {
        Self::Counter(value)
    }

    /// Creates a [`MetricValue::Time`] from whole milliseconds.
    pub fn time(millis: u64) -> Self {
        Self::Time(TimeValue::Integer(millis))
    }

    /// Creates a [`MetricValue::Time`] from fractional milliseconds.
    pub fn time_f64(millis: f64) -> Self {
        Self::Time(TimeValue::Float(millis))
    }

    /// Returns the type of this value.
    pub fn ty(&self) -> MetricType {
        match self {
            Self::Gauge(_) => MetricType::Gauge,
            Self::GaugeDelta(_) => MetricType::GaugeDelta,
            Self::Counter(_) => MetricType::Counter,
            Self::Time(_) => MetricType::Time,
        }
    }

    /// Returns the numeric value with full precision.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Gauge(value) => *value as f64,
            Self::GaugeDelta(value) | Self::Counter(value) => *value as f64,
            Self::Time(value) => value.as_f64(),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gauge(value) => write!(f, "{value}|{}", MetricType::Gauge),
            Self::GaugeDelta(delta) => write!(f, "{delta:+}|{}", MetricType::GaugeDelta),
            Self::Counter(value) => write!(f, "{value}|{}", MetricType::Counter),
            Self::Time(value) => write!(f, "{value}|{}", MetricType::Time),
        }
    }
}

/// The type of a [`MetricValue`], determining its aggregation and evaluation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MetricType {
    /// Stores absolute snapshots of values.
    ///
    /// Within one flush window, the last reported value wins.
    Gauge,
    /// Adjusts a gauge relative to its current value.
    ///
    /// Deltas share the wire suffix with gauges and are told apart by their explicit sign.
    GaugeDelta,
    /// Counts instances of an event.
    ///
    /// Counters are summed up over the flush window and reported both as total and as rate.
    Counter,
    /// Records duration samples in milliseconds.
    ///
    /// Timers keep every sample of the flush window and are summarized with statistics and
    /// percentiles.
    Time,
}

impl MetricType {
    /// Return the shortcode for this metric type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge | MetricType::GaugeDelta => "g",
            MetricType::Counter => "c",
            MetricType::Time => "ms",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned by [`Metric::parse`] and [`Metric::parse_all`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseMetricError {
    /// The line is not valid UTF-8.
    #[error("metric is not valid utf-8")]
    InvalidUtf8,
    /// The `|` separator before the type is missing.
    #[error("missing metric type")]
    MissingType,
    /// The type is not one of `g`, `c` or `ms`.
    #[error("unknown metric type")]
    InvalidType,
    /// The `:` separator before the value is missing.
    #[error("missing metric value")]
    MissingValue,
    /// The name before the `:` separator is empty.
    #[error("empty metric name")]
    EmptyName,
    /// The value is not a valid number for the metric type.
    #[error("invalid metric value")]
    InvalidValue,
}

/// Splits an optional sign from the value and validates the remaining digits.
///
/// Returns the sign, if any, and the digits.
fn split_sign(string: &str) -> Result<(Option<char>, &str), ParseMetricError> {
    let (sign, digits) = match string.as_bytes().first() {
        Some(b'+') => (Some('+'), &string[1..]),
        Some(b'-') => (Some('-'), &string[1..]),
        _ => (None, string),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseMetricError::InvalidValue);
    }

    Ok((sign, digits))
}

/// Parses a metric value given its type shortcode.
fn parse_value(string: &str, ty: &str) -> Result<MetricValue, ParseMetricError> {
    let (sign, digits) = split_sign(string)?;

    let value = match (ty, sign) {
        ("g", None) => MetricValue::Gauge(digits.parse().or(Err(ParseMetricError::InvalidValue))?),
        ("g", Some(_)) => {
            MetricValue::GaugeDelta(string.parse().or(Err(ParseMetricError::InvalidValue))?)
        }
        ("c", _) => MetricValue::Counter(string.parse().or(Err(ParseMetricError::InvalidValue))?),
        ("ms", None) => MetricValue::time(digits.parse().or(Err(ParseMetricError::InvalidValue))?),
        ("ms", Some(_)) => return Err(ParseMetricError::InvalidValue),
        _ => return Err(ParseMetricError::InvalidType),
    };

    Ok(value)
}

/// A single measurement as it is sent by clients.
///
/// # Submission Protocol
///
/// ```text
/// <name>:<value>|<type>
/// ```
///
/// The type is one of `g` for gauges, `c` for counters and `ms` for timers. A gauge value with an
/// explicit `+` or `-` sign is a [gauge delta](MetricValue::GaugeDelta). An example submission
/// looks like this:
///
/// ```text
/// endpoint.response_time:57|ms
/// endpoint.hits:1|c
/// queue.size:120|g
/// queue.size:-3|g
/// ```
///
/// To parse a submission payload, use [`Metric::parse_all`].
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    /// The dot-delimited name of the metric.
    ///
    /// Names are not validated beyond what the wire grammar requires: they must not be empty.
    pub name: String,
    /// The value of the metric.
    pub value: MetricValue,
}

impl Metric {
    /// Creates a new metric.
    pub fn new(name: impl Into<String>, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    fn parse_str(string: &str) -> Result<Self, ParseMetricError> {
        let (name_value, ty) = string
            .rsplit_once('|')
            .ok_or(ParseMetricError::MissingType)?;
        let (name, value) = name_value
            .rsplit_once(':')
            .ok_or(ParseMetricError::MissingValue)?;

        if name.is_empty() {
            return Err(ParseMetricError::EmptyName);
        }

        Ok(Self::new(name, parse_value(value, ty)?))
    }

    /// Parses a single metric value from the raw protocol.
    ///
    /// See the [`Metric`] for more information on the protocol.
    ///
    /// # Example
    ///
    /// ```
    /// use tally_metrics::{Metric, MetricValue};
    ///
    /// let metric = Metric::parse(b"response_time:57|ms").expect("metric should parse");
    /// assert_eq!(metric.value, MetricValue::time(57));
    /// ```
    pub fn parse(slice: &[u8]) -> Result<Self, ParseMetricError> {
        let string = std::str::from_utf8(slice).or(Err(ParseMetricError::InvalidUtf8))?;
        Self::parse_str(string)
    }

    /// Parses a set of metric values from the raw protocol.
    ///
    /// Returns a metric result for each line in `slice`, ignoring empty lines. Both UNIX newlines
    /// (`\n`) and Windows newlines (`\r\n`) are supported.
    ///
    /// It is possible to continue consuming the iterator after `Err` is yielded.
    ///
    /// # Example
    ///
    /// ```
    /// use tally_metrics::Metric;
    ///
    /// let data = br#"
    /// endpoint.response_time:57|ms
    /// endpoint.hits:1|c
    /// "#;
    ///
    /// for metric_result in Metric::parse_all(data) {
    ///     let metric = metric_result.expect("metric should parse");
    ///     println!("Metric {}: {}", metric.name, metric.value);
    /// }
    /// ```
    pub fn parse_all(slice: &[u8]) -> ParseMetrics<'_> {
        ParseMetrics { slice }
    }

    /// Returns the number of bytes of the encoded metric, without a trailing newline.
    pub fn encoded_len(&self) -> usize {
        let mut counter = ByteCounter(0);
        fmt::write(&mut counter, format_args!("{self}")).ok();
        counter.0
    }

    /// Appends the encoded metric to `buf`, without a trailing newline.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        use std::io::Write;
        // Writing into a vector cannot fail.
        write!(buf, "{self}").ok();
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.value)
    }
}

impl std::str::FromStr for Metric {
    type Err = ParseMetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

/// Counts the bytes of formatted output without storing it.
struct ByteCounter(usize);

impl fmt::Write for ByteCounter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 += s.len();
        Ok(())
    }
}

/// Iterator over parsed metrics returned from [`Metric::parse_all`].
#[derive(Clone, Debug, Default)]
pub struct ParseMetrics<'a> {
    slice: &'a [u8],
}

impl Iterator for ParseMetrics<'_> {
    type Item = Result<Metric, ParseMetricError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut split = self.slice.splitn(2, |&b| b == b'\n');
            let current = split.next()?;
            self.slice = split.next().unwrap_or_default();

            let string = match std::str::from_utf8(current) {
                Ok(string) => string.strip_suffix('\r').unwrap_or(string),
                Err(_) => return Some(Err(ParseMetricError::InvalidUtf8)),
            };

            if !string.is_empty() {
                return Some(Metric::parse_str(string));
            }
        }
    }
}

impl FusedIterator for ParseMetrics<'_> {}
