//! StatsD client sending packed UDP datagrams.
//!
//! The [`UdpStatsClient`] encodes metrics in the StatsD line protocol and packs as many records as
//! possible into each datagram, without ever splitting a record across datagrams:
//!
//! ```text
//! endpoint.response_time:57|ms
//! endpoint.hits:1|c
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tally_metrics::StatsClientExt;
//! use tally_statsd::UdpStatsClient;
//!
//! let client = UdpStatsClient::connect("localhost", 8125)?;
//! client.counter("endpoint.hits")?;
//! # Ok::<(), tally_metrics::SendError>(())
//! ```

#![warn(missing_docs)]

use std::net::SocketAddr;

use parking_lot::Mutex;
use tally_metrics::{Metric, SendError, StatsClient};

use self::upstream::Upstream;

mod upstream;

/// The default maximum size of a datagram, which is safe for UDP on all common networks.
pub const DEFAULT_DATAGRAM_SIZE: usize = 512;

/// The default port of StatsD servers.
pub const DEFAULT_PORT: u16 = 8125;

/// A [`StatsClient`] sending metrics to a StatsD server over UDP.
///
/// Sending is fire-and-forget: the client reports local socket errors, but cannot detect whether
/// the server received a datagram. Concurrent sends are serialized internally.
#[derive(Debug)]
pub struct UdpStatsClient {
    upstream: Mutex<Upstream>,
}

impl UdpStatsClient {
    /// Resolves the server address and binds a local socket.
    ///
    /// Uses datagrams of at most [`DEFAULT_DATAGRAM_SIZE`] bytes.
    pub fn connect(host: &str, port: u16) -> Result<Self, SendError> {
        Self::with_datagram_size(host, port, DEFAULT_DATAGRAM_SIZE)
    }

    /// Resolves the server address and binds a local socket with a custom datagram size.
    pub fn with_datagram_size(
        host: &str,
        port: u16,
        datagram_size: usize,
    ) -> Result<Self, SendError> {
        let upstream = Upstream::connect(host, port, datagram_size)?;
        tally_log::debug!(addr = ?upstream.addr(), datagram_size, "connected statsd client");

        Ok(Self {
            upstream: Mutex::new(upstream),
        })
    }

    /// Returns the maximum size of a single datagram.
    pub fn datagram_size(&self) -> usize {
        self.upstream.lock().datagram_size()
    }

    /// Returns the currently resolved server address.
    ///
    /// Returns `None` if the last resolution failed.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.upstream.lock().addr()
    }

    /// Resolves the server host again, for instance after a DNS change.
    ///
    /// If resolution fails, the previous address is discarded and sends fail with
    /// [`SendError::Unresolved`] until the host resolves again.
    pub fn refresh_endpoint(&self) -> Result<SocketAddr, SendError> {
        self.upstream.lock().refresh()
    }
}

impl StatsClient for UdpStatsClient {
    fn send(&self, metric: &Metric) -> Result<(), SendError> {
        self.upstream.lock().submit(std::slice::from_ref(metric))
    }

    fn send_all(&self, metrics: &[Metric]) -> Result<(), SendError> {
        self.upstream.lock().submit(metrics)
    }
}

#[cfg(test)]
mod tests {
    use std::net::UdpSocket;
    use std::time::Duration;

    use tally_metrics::{MetricValue, StatsClientExt};

    use super::*;

    /// A loopback StatsD server collecting raw datagrams.
    struct Receiver {
        socket: UdpSocket,
    }

    impl Receiver {
        fn bind() -> Self {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            socket
                .set_read_timeout(Some(Duration::from_millis(200)))
                .unwrap();
            Self { socket }
        }

        fn client(&self, datagram_size: usize) -> UdpStatsClient {
            let port = self.socket.local_addr().unwrap().port();
            UdpStatsClient::with_datagram_size("127.0.0.1", port, datagram_size).unwrap()
        }

        /// Receives datagrams until none arrives within the read timeout.
        fn datagrams(&self) -> Vec<String> {
            let mut datagrams = Vec::new();
            let mut buf = [0; 1024];
            while let Ok(len) = self.socket.recv(&mut buf) {
                datagrams.push(String::from_utf8_lossy(&buf[..len]).into_owned());
            }
            datagrams
        }
    }

    fn counter(name: &str) -> Metric {
        Metric::new(name, MetricValue::Counter(1))
    }

    #[test]
    fn test_single_metric() {
        tally_log::init_test!();

        let receiver = Receiver::bind();
        let client = receiver.client(DEFAULT_DATAGRAM_SIZE);
        client.gauge_delta("queue.size", -3).unwrap();

        assert_eq!(receiver.datagrams(), ["queue.size:-3|g\n"]);
    }

    #[test]
    fn test_exact_fill_is_one_datagram() {
        let receiver = Receiver::bind();
        // Each record "a:1|c\n" is 6 bytes.
        let client = receiver.client(12);
        client.send_all(&[counter("a"), counter("b")]).unwrap();

        assert_eq!(receiver.datagrams(), ["a:1|c\nb:1|c\n"]);
    }

    #[test]
    fn test_overflow_starts_new_datagram() {
        let receiver = Receiver::bind();
        let client = receiver.client(12);
        client
            .send_all(&[counter("a"), counter("b"), counter("c")])
            .unwrap();

        assert_eq!(receiver.datagrams(), ["a:1|c\nb:1|c\n", "c:1|c\n"]);
    }

    #[test]
    fn test_metric_too_long() {
        let receiver = Receiver::bind();
        let client = receiver.client(12);

        let result = client.send(&counter("much.too.long"));
        assert!(matches!(
            result,
            Err(SendError::MetricTooLong { len: 18, max: 12 })
        ));
        assert!(receiver.datagrams().is_empty());
    }

    #[test]
    fn test_metric_too_long_flushes_pending() {
        let receiver = Receiver::bind();
        let client = receiver.client(12);

        let result = client.send_all(&[counter("a"), counter("much.too.long"), counter("b")]);
        assert!(matches!(result, Err(SendError::MetricTooLong { .. })));
        assert_eq!(receiver.datagrams(), ["a:1|c\n"]);
    }

    #[test]
    fn test_refresh_endpoint() {
        let receiver = Receiver::bind();
        let client = receiver.client(DEFAULT_DATAGRAM_SIZE);
        assert!(client.addr().is_some());

        let addr = client.refresh_endpoint().unwrap();
        assert_eq!(Some(addr), client.addr());
    }
}
