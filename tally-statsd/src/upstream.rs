use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use tally_metrics::{Metric, SendError};

/// A resolved target address with a socket of the matching address family.
#[derive(Debug)]
struct Remote {
    addr: SocketAddr,
    socket: UdpSocket,
}

impl Remote {
    fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = match addr {
            SocketAddr::V4(_) => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?,
            SocketAddr::V6(_) => UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?,
        };

        Ok(Self { addr, socket })
    }

    fn send(&self, buf: &[u8]) -> io::Result<()> {
        self.socket.send_to(buf, self.addr).map(drop)
    }
}

/// Resolves `host` and prefers IPv4 addresses over IPv6.
fn resolve(host: &str, port: u16) -> io::Result<Option<SocketAddr>> {
    let addrs: Vec<_> = (host, port).to_socket_addrs()?.collect();
    let preferred = addrs.iter().find(|addr| addr.is_ipv4()).or(addrs.first());
    Ok(preferred.copied())
}

/// Packs encoded metrics into datagrams of bounded size.
///
/// Every record is terminated by a newline, which counts towards the datagram size.
#[derive(Debug)]
pub struct Upstream {
    host: String,
    port: u16,
    remote: Option<Remote>,
    buffer: Vec<u8>,
    datagram_size: usize,
}

impl Upstream {
    pub fn connect(host: &str, port: u16, datagram_size: usize) -> Result<Self, SendError> {
        let mut upstream = Self {
            host: host.to_owned(),
            port,
            remote: None,
            buffer: Vec::with_capacity(datagram_size),
            datagram_size,
        };

        upstream.refresh()?;
        Ok(upstream)
    }

    pub fn datagram_size(&self) -> usize {
        self.datagram_size
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.remote.as_ref().map(|remote| remote.addr)
    }

    /// Resolves the host again and replaces the target address.
    ///
    /// On failure, the previous address is discarded so that it is not used anymore.
    pub fn refresh(&mut self) -> Result<SocketAddr, SendError> {
        let addr = match resolve(&self.host, self.port) {
            Ok(Some(addr)) => addr,
            Ok(None) => {
                tally_log::warn!(host = self.host, "statsd host resolved to no addresses");
                self.remote = None;
                return Err(SendError::Unresolved);
            }
            Err(err) => {
                tally_log::warn!(
                    error = &err as &dyn std::error::Error,
                    host = self.host,
                    "failed to resolve statsd host"
                );
                self.remote = None;
                return Err(SendError::Unresolved);
            }
        };

        match self.remote.take() {
            Some(remote) if remote.addr.is_ipv4() == addr.is_ipv4() => {
                self.remote = Some(Remote { addr, ..remote });
            }
            _ => self.remote = Some(Remote::bind(addr)?),
        }

        Ok(addr)
    }

    /// Sends the pending buffer as one datagram, if it is not empty.
    fn flush(&mut self) -> Result<(), SendError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let result = match self.remote {
            Some(ref remote) => remote.send(&self.buffer).map_err(SendError::from),
            None => Err(SendError::Unresolved),
        };

        self.buffer.clear();
        result
    }

    /// Packs all metrics into as few datagrams as possible and sends them.
    ///
    /// A metric that does not fit into a datagram on its own is never sent. All metrics before it
    /// are flushed and [`SendError::MetricTooLong`] is returned.
    pub fn submit(&mut self, metrics: &[Metric]) -> Result<(), SendError> {
        if self.remote.is_none() {
            self.refresh()?;
        }

        for metric in metrics {
            let len = metric.encoded_len() + 1;

            if len > self.datagram_size {
                self.flush()?;
                return Err(SendError::MetricTooLong {
                    len,
                    max: self.datagram_size,
                });
            }

            if self.buffer.len() + len > self.datagram_size {
                self.flush()?;
            }

            metric.write_to(&mut self.buffer);
            self.buffer.push(b'\n');
        }

        self.flush()
    }
}
