//! Graphite plaintext protocol client.
//!
//! The [`GraphiteTextClient`] keeps one persistent TCP connection to a Graphite collector and writes
//! one line per value:
//!
//! ```text
//! <name> <value> <unix-seconds>
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tally_graphite::{GraphiteTextClient, GraphiteValue};
//! use tally_metrics::UnixTimestamp;
//!
//! let client = GraphiteTextClient::connect("localhost", 2003)?;
//! client.send(&GraphiteValue::new("servers.web.load", 0.42, UnixTimestamp::now()))?;
//! client.close();
//! # Ok::<(), std::io::Error>(())
//! ```

#![warn(missing_docs)]

use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tally_metrics::{Metric, SendError, StatsClient, StatsSummary, StatsValue, UnixTimestamp};

/// The default port of the Graphite plaintext protocol.
pub const DEFAULT_PORT: u16 = 2003;

/// Encoded lines up to this size are assembled on the stack.
const INLINE_BUFFER_SIZE: usize = 1024;

type LineBuffer = SmallVec<[u8; INLINE_BUFFER_SIZE]>;

/// A single timestamped value in the Graphite plaintext protocol.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphiteValue {
    /// The dot-delimited series name.
    pub name: String,
    /// The measured value.
    pub value: f64,
    /// The time of the measurement.
    pub timestamp: UnixTimestamp,
}

impl GraphiteValue {
    /// Creates a new value.
    pub fn new(name: impl Into<String>, value: f64, timestamp: UnixTimestamp) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
        }
    }

    /// Creates a value from an entry of a [`StatsSummary`].
    pub fn from_stats(stats: &StatsValue, timestamp: UnixTimestamp) -> Self {
        Self::new(stats.name.as_str(), stats.value, timestamp)
    }
}

impl fmt::Display for GraphiteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.value, self.timestamp)
    }
}

/// Appends a line for the value, unless it is `NaN` or infinite, which Graphite rejects.
fn write_line(buf: &mut LineBuffer, name: &str, value: f64, timestamp: UnixTimestamp) {
    if !value.is_finite() {
        tally_log::debug!(series = name, value, "skipping non-finite graphite value");
        return;
    }

    // Writing into a buffer cannot fail.
    writeln!(buf, "{name} {value} {timestamp}").ok();
}

fn connect_stream(host: &str, port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((host, port))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn write_stream(stream: &mut Option<TcpStream>, buf: &[u8]) -> io::Result<()> {
    match stream {
        Some(stream) => {
            stream.write_all(buf)?;
            stream.flush()
        }
        None => Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "graphite connection is closed",
        )),
    }
}

/// A client for the Graphite plaintext protocol over TCP.
///
/// If a write fails and reconnecting is enabled, the client opens a new connection to the same
/// endpoint and retries the write exactly once. A second failure is returned to the caller.
/// Concurrent sends are serialized internally.
#[derive(Debug)]
pub struct GraphiteTextClient {
    host: String,
    port: u16,
    reconnect: bool,
    stream: Mutex<Option<TcpStream>>,
}

impl GraphiteTextClient {
    /// Connects to a Graphite collector with reconnecting enabled.
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let stream = connect_stream(host, port)?;
        tally_log::debug!(host, port, "connected to graphite");

        Ok(Self {
            host: host.to_owned(),
            port,
            reconnect: true,
            stream: Mutex::new(Some(stream)),
        })
    }

    /// Enables or disables reconnecting after a failed write.
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Returns `true` if the client holds an open connection.
    pub fn is_connected(&self) -> bool {
        self.stream.lock().is_some()
    }

    /// Sends a single value.
    pub fn send(&self, value: &GraphiteValue) -> io::Result<()> {
        let mut buf = LineBuffer::new();
        write_line(&mut buf, &value.name, value.value, value.timestamp);
        self.write(&buf)
    }

    /// Sends multiple values with a single write.
    pub fn send_all(&self, values: &[GraphiteValue]) -> io::Result<()> {
        let mut buf = LineBuffer::new();
        for value in values {
            write_line(&mut buf, &value.name, value.value, value.timestamp);
        }
        self.write(&buf)
    }

    /// Sends all values of a summary with the summary's timestamp.
    pub fn send_summary(&self, summary: &StatsSummary) -> io::Result<()> {
        if summary.is_empty() {
            return Ok(());
        }

        let timestamp = summary.timestamp();
        let mut buf = LineBuffer::new();
        for stats in summary {
            write_line(&mut buf, &stats.name, stats.value, timestamp);
        }
        self.write(&buf)
    }

    /// Closes the connection.
    ///
    /// Subsequent sends reconnect if reconnecting is enabled, and fail otherwise.
    pub fn close(&self) {
        if let Some(stream) = self.stream.lock().take() {
            stream.shutdown(Shutdown::Both).ok();
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }

        let mut stream = self.stream.lock();

        let error = match write_stream(&mut stream, buf) {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };

        *stream = None;
        if !self.reconnect {
            return Err(error);
        }

        tally_log::debug!(
            error = &error as &dyn std::error::Error,
            "graphite write failed, reconnecting"
        );

        let mut retry = Some(connect_stream(&self.host, self.port)?);
        write_stream(&mut retry, buf)?;
        *stream = retry;
        Ok(())
    }

    /// Shuts down the socket while keeping it, so that the next write fails.
    #[cfg(test)]
    fn break_connection(&self) {
        if let Some(stream) = self.stream.lock().as_ref() {
            stream.shutdown(Shutdown::Both).ok();
        }
    }
}

impl StatsClient for GraphiteTextClient {
    fn send(&self, metric: &Metric) -> Result<(), SendError> {
        let mut buf = LineBuffer::new();
        write_line(
            &mut buf,
            &metric.name,
            metric.value.as_f64(),
            UnixTimestamp::now(),
        );
        Ok(self.write(&buf)?)
    }

    fn send_all(&self, metrics: &[Metric]) -> Result<(), SendError> {
        let timestamp = UnixTimestamp::now();
        let mut buf = LineBuffer::new();
        for metric in metrics {
            write_line(&mut buf, &metric.name, metric.value.as_f64(), timestamp);
        }
        Ok(self.write(&buf)?)
    }
}
