use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tally_agent::{AgentConfig, StatsAgent};
use tally_config::Config;
use tally_graphite::GraphiteTextClient;
use tally_metrics::{Metric, StatsClient, StatsClientExt, StatsCollection, UnixTimestamp};
use tally_statsd::UdpStatsClient;
use tokio::net::UdpSocket;

/// Counts lines of incoming datagrams that could not be parsed.
const PARSE_ERRORS: &str = "tally.parse_errors";

/// Reports the time since the agent was launched in seconds.
const UPTIME: &str = "tally.uptime";

/// The largest payload of a UDP datagram.
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Receives StatsD datagrams and feeds them into the collection.
#[derive(Debug)]
struct Listener {
    collection: Arc<StatsCollection>,
    forward: Option<UdpStatsClient>,
}

impl Listener {
    /// Parses a datagram and records every valid line.
    ///
    /// Valid metrics are additionally sent to the forwarding client, if configured.
    fn handle(&self, payload: &[u8]) {
        let mut accepted = Vec::new();

        for result in Metric::parse_all(payload) {
            match result {
                Ok(metric) => accepted.push(metric),
                Err(error) => {
                    tally_log::debug!(
                        error = &error as &dyn std::error::Error,
                        "dropping invalid statsd line"
                    );
                    self.collection.counter(PARSE_ERRORS).ok();
                }
            }
        }

        self.collection.send_all(&accepted).ok();

        if let Some(ref forward) = self.forward {
            if let Err(error) = forward.send_all(&accepted) {
                tally_log::warn!(
                    error = &error as &dyn std::error::Error,
                    "failed to forward metrics"
                );
            }
        }
    }

    async fn run(&self, socket: UdpSocket) {
        let mut buf = vec![0; MAX_DATAGRAM_SIZE];

        loop {
            match socket.recv(&mut buf).await {
                Ok(len) => self.handle(&buf[..len]),
                Err(error) => tally_log::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to receive statsd datagram"
                ),
            }
        }
    }
}

/// Runs the listener until Ctrl-C is pressed.
async fn serve(addr: Option<SocketAddr>, listener: Listener) -> Result<()> {
    let shutdown = tokio::signal::ctrl_c();

    let Some(addr) = addr else {
        return shutdown.await.context("failed to wait for shutdown signal");
    };

    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("failed to bind statsd listener to {addr}"))?;
    tally_log::info!("listening for statsd metrics on {addr}");

    tokio::select! {
        () = listener.run(socket) => Ok(()),
        result = shutdown => result.context("failed to wait for shutdown signal"),
    }
}

fn create_agent(config: &Config, collection: Arc<StatsCollection>) -> Result<StatsAgent> {
    let agent_config = AgentConfig {
        sample_interval: config.sample_interval(),
        flush_interval: config.flush_interval(),
    };
    let agent = StatsAgent::with_collection(agent_config, collection);

    let launched = Instant::now();
    agent.add_gauge(UPTIME, move || launched.elapsed().as_secs());

    if let Some(graphite) = config.graphite() {
        let client = GraphiteTextClient::connect(&graphite.host, graphite.port)
            .with_context(|| {
                format!(
                    "failed to connect to graphite at {}:{}",
                    graphite.host, graphite.port
                )
            })?
            .reconnect(graphite.reconnect);

        agent.on_flushed(move |summary| Ok(client.send_summary(summary)?));
    }

    Ok(agent)
}

fn create_forward(config: &Config) -> Result<Option<UdpStatsClient>> {
    let Some(statsd) = config.statsd() else {
        return Ok(None);
    };

    let client = UdpStatsClient::with_datagram_size(&statsd.host, statsd.port, statsd.datagram_size)
        .with_context(|| format!("failed to resolve statsd at {}:{}", statsd.host, statsd.port))?;

    Ok(Some(client))
}

/// Runs the agent in the foreground until it is shut down.
pub fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("failed to create runtime")?;

    let collection = Arc::new(StatsCollection::with_config(config.collection_config()));
    let agent = create_agent(&config, Arc::clone(&collection))?;
    let listener = Listener {
        collection,
        forward: create_forward(&config)?,
    };

    agent.start().context("failed to start sample agent")?;
    let result = runtime.block_on(serve(config.listen_addr(), listener));

    tally_log::info!("shutting down");
    agent.stop();
    let summary = agent.flush(UnixTimestamp::now());
    tally_log::info!(values = summary.len(), "flushed remaining metrics");

    result
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::time::Duration;

    use super::*;

    fn listener(forward: Option<UdpStatsClient>) -> Listener {
        Listener {
            collection: Arc::new(StatsCollection::new()),
            forward,
        }
    }

    #[test]
    fn test_handle_datagram() {
        tally_log::init_test!();

        let listener = listener(None);
        listener.handle(b"requests:1|c\nbroken\nqueue:4|g\r\nlatency:12|ms\nqueue:+2|g\n");

        let summary = listener.collection.summarize(Duration::from_secs(10));
        assert_eq!(summary.get("stats_counts.requests"), Some(1.0));
        assert_eq!(summary.get("stats.gauges.queue"), Some(6.0));
        assert_eq!(summary.get("stats.timers.latency.upper"), Some(12.0));
        assert_eq!(summary.get("stats_counts.tally.parse_errors"), Some(1.0));
    }

    #[test]
    fn test_forward_valid_lines() {
        let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let forward = UdpStatsClient::connect("127.0.0.1", port).unwrap();
        let listener = listener(Some(forward));
        listener.handle(b"a:1|c\nnot a metric\nb:2|g");

        let mut buf = [0; 512];
        let len = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"a:1|c\nb:2|g\n");
    }

    #[test]
    fn test_agent_ships_to_graphite() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = server.local_addr().unwrap().port();
        let yaml = format!("graphite:\n  port: {port}\n");
        let config = Config::from_yaml_str(&yaml).unwrap();

        let collection = Arc::new(StatsCollection::new());
        let agent = create_agent(&config, Arc::clone(&collection)).unwrap();
        let (stream, _) = server.accept().unwrap();

        collection.counter("requests").unwrap();
        agent.flush(UnixTimestamp::from_secs(4711));

        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut line = String::new();
        std::io::BufRead::read_line(&mut std::io::BufReader::new(stream), &mut line).unwrap();
        assert_eq!(line, "stats_counts.requests 1 4711\n");
    }

    #[test]
    fn test_graphite_unreachable() {
        let port = {
            let server = TcpListener::bind("127.0.0.1:0").unwrap();
            server.local_addr().unwrap().port()
        };
        let config = Config::from_yaml_str(&format!("graphite:\n  port: {port}\n")).unwrap();

        let error = create_agent(&config, Arc::new(StatsCollection::new())).unwrap_err();
        assert_eq!(
            error.to_string(),
            format!("failed to connect to graphite at 127.0.0.1:{port}")
        );
    }
}
