use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_log::LogConfig;
use tally_metrics::CollectionConfig;

/// The name of the configuration file within the config folder.
const CONFIG_FILE_NAME: &str = "config.yml";

/// Defines the source of a config error.
#[derive(Debug)]
enum ConfigErrorSource {
    /// An error occurring independently.
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error caused by the value of a single field.
    Field(&'static str),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<Box<dyn Error + Send + Sync>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            inner: Some(Box::new(inner)),
            ..Self::new(kind)
        }
    }

    #[inline]
    fn invalid(field: &'static str) -> Self {
        Self::new(ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::Field(name);
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }

    /// Returns the file that caused the error, if any.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ConfigErrorSource::File(path) => Some(path),
            _ => None,
        }
    }

    /// Returns the name of the invalid field, if any.
    pub fn field_name(&self) -> Option<&'static str> {
        match self.source {
            ConfigErrorSource::Field(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => fmt::Display::fmt(&self.kind, f),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::Field(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner
            .as_deref()
            .map(|inner| inner as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to serialize the configuration.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// A value is out of its valid range.
    #[error("invalid config value")]
    InvalidValue,
}

/// Sampling, flushing and aggregation options.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Agent {
    /// The time between two sampling passes in milliseconds.
    ///
    /// Defaults to `1000`.
    pub sample_interval: u64,

    /// The length of a flush window in seconds.
    ///
    /// Defaults to `10`.
    pub flush_interval: u64,

    /// Percentiles computed for every timer, each in `(0, 100]`.
    ///
    /// Defaults to none.
    pub percentiles: Vec<f64>,

    /// Factors applied to gauge and timer values by metric name.
    pub scales: BTreeMap<String, f64>,
}

impl Default for Agent {
    fn default() -> Self {
        Self {
            sample_interval: 1000,
            flush_interval: 10,
            percentiles: Vec::new(),
            scales: BTreeMap::new(),
        }
    }
}

/// A StatsD server that receives a copy of every metric accepted by the listener.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Statsd {
    /// The host name or address of the server.
    pub host: String,

    /// The UDP port of the server.
    ///
    /// Defaults to `8125`.
    pub port: u16,

    /// The maximum size of a datagram in bytes.
    ///
    /// Defaults to `512`, which fits into the smallest common MTU.
    pub datagram_size: usize,
}

impl Default for Statsd {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8125,
            datagram_size: 512,
        }
    }
}

/// The Graphite collector receiving flushed summaries.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Graphite {
    /// The host name or address of the collector.
    pub host: String,

    /// The TCP port of the plaintext protocol.
    ///
    /// Defaults to `2003`.
    pub port: u16,

    /// Reconnects and retries once if a write fails.
    ///
    /// Defaults to `true`.
    pub reconnect: bool,
}

impl Default for Graphite {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 2003,
            reconnect: true,
        }
    }
}

/// The StatsD UDP listener of the agent.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Listen {
    /// The address to bind to.
    ///
    /// Defaults to `127.0.0.1`.
    pub host: IpAddr,

    /// The UDP port to bind to.
    ///
    /// Defaults to `8125`.
    pub port: u16,

    /// Disables the listener if set to `false`.
    pub enabled: bool,
}

impl Listen {
    /// Returns `true` if datagrams sent to the given host and port reach this listener.
    ///
    /// Host names other than `localhost` are not resolved.
    fn receives_from(&self, host: &str, port: u16) -> bool {
        if !self.enabled || port != self.port {
            return false;
        }

        let target = if host.eq_ignore_ascii_case("localhost") {
            None
        } else {
            match host.parse::<IpAddr>() {
                Ok(ip) => Some(ip),
                Err(_) => return false,
            }
        };

        match target {
            Some(ip) if ip == self.host => true,
            // The unspecified address accepts datagrams sent to any local address.
            Some(ip) => self.host.is_unspecified() && (ip.is_loopback() || ip.is_unspecified()),
            None => self.host.is_loopback() || self.host.is_unspecified(),
        }
    }
}

impl Default for Listen {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8125,
            enabled: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
struct ConfigValues {
    agent: Agent,
    #[serde(skip_serializing_if = "Option::is_none")]
    statsd: Option<Statsd>,
    #[serde(skip_serializing_if = "Option::is_none")]
    graphite: Option<Graphite>,
    listen: Listen,
    logging: LogConfig,
}

impl ConfigValues {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.sample_interval == 0 {
            return Err(ConfigError::invalid("agent.sample_interval"));
        }

        if self.agent.flush_interval == 0 {
            return Err(ConfigError::invalid("agent.flush_interval"));
        }

        if !self.agent.percentiles.iter().all(|&p| p > 0.0 && p <= 100.0) {
            return Err(ConfigError::invalid("agent.percentiles"));
        }

        if !self.agent.scales.values().all(|scale| scale.is_finite()) {
            return Err(ConfigError::invalid("agent.scales"));
        }

        if let Some(ref statsd) = self.statsd {
            if statsd.datagram_size == 0 {
                return Err(ConfigError::invalid("statsd.datagram_size"));
            }

            // Forwarded datagrams would be received and forwarded again.
            if self.listen.receives_from(&statsd.host, statsd.port) {
                return Err(ConfigError::invalid("statsd.port"));
            }
        }

        Ok(())
    }
}

/// The static configuration of the agent.
///
/// Loaded from `config.yml` in a config folder. Every section and field is optional and falls
/// back to its default.
///
/// ```yaml
/// agent:
///   flush_interval: 10
///   percentiles: [90, 99.5]
/// graphite:
///   host: graphite.internal
/// ```
#[derive(Clone, Debug, Default)]
pub struct Config {
    values: ConfigValues,
    path: Option<PathBuf>,
}

impl Config {
    /// Loads the configuration file from the given config folder.
    pub fn from_path<P: AsRef<Path>>(folder: P) -> Result<Self, ConfigError> {
        let path = folder.as_ref().join(CONFIG_FILE_NAME);

        let file = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        let values: ConfigValues = serde_yaml::from_reader(io::BufReader::new(file))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))?;
        values.validate()?;

        Ok(Self {
            values,
            path: Some(path),
        })
    }

    /// Parses the configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let values: ConfigValues = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))?;
        values.validate()?;

        Ok(Self { values, path: None })
    }

    /// Serializes the effective configuration to YAML.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the file this configuration was loaded from.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the time between two sampling passes.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.values.agent.sample_interval)
    }

    /// Returns the length of a flush window.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.values.agent.flush_interval)
    }

    /// Returns the aggregation options of the collection.
    pub fn collection_config(&self) -> CollectionConfig {
        CollectionConfig {
            percentiles: self.values.agent.percentiles.clone(),
            scales: self.values.agent.scales.clone(),
        }
    }

    /// Returns the StatsD server that receives forwarded metrics, if configured.
    pub fn statsd(&self) -> Option<&Statsd> {
        self.values.statsd.as_ref()
    }

    /// Returns the Graphite collector, if configured.
    pub fn graphite(&self) -> Option<&Graphite> {
        self.values.graphite.as_ref()
    }

    /// Returns the address of the StatsD listener, or `None` if it is disabled.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        let listen = &self.values.listen;
        listen
            .enabled
            .then(|| SocketAddr::new(listen.host, listen.port))
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }
}

#[cfg(test)]
mod tests {
    use tally_log::Level;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.sample_interval(), Duration::from_secs(1));
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert_eq!(config.collection_config(), CollectionConfig::default());
        assert_eq!(config.statsd(), None);
        assert_eq!(config.graphite(), None);
        assert_eq!(
            config.listen_addr(),
            Some("127.0.0.1:8125".parse().unwrap())
        );
        assert_eq!(config.logging().level, Level::Info);
        assert_eq!(config.path(), None);
    }

    #[test]
    fn test_empty_document() {
        let config = Config::from_yaml_str("{}").unwrap();
        assert_eq!(config.values, ConfigValues::default());
    }

    #[test]
    fn test_parse_full() {
        let yaml = r#"
agent:
  sample_interval: 250
  flush_interval: 60
  percentiles: [90, 99.5]
  scales:
    memory.rss: 0.001
statsd:
  host: statsd.internal
  datagram_size: 1432
graphite:
  host: graphite.internal
  reconnect: false
listen:
  host: 0.0.0.0
  port: 9125
logging:
  level: debug
"#;
        let config = Config::from_yaml_str(yaml).unwrap();

        assert_eq!(config.sample_interval(), Duration::from_millis(250));
        assert_eq!(config.flush_interval(), Duration::from_secs(60));

        let collection = config.collection_config();
        assert_eq!(collection.percentiles, vec![90.0, 99.5]);
        assert_eq!(collection.scale("memory.rss"), 0.001);

        let statsd = config.statsd().unwrap();
        assert_eq!(statsd.host, "statsd.internal");
        assert_eq!(statsd.port, 8125);
        assert_eq!(statsd.datagram_size, 1432);

        let graphite = config.graphite().unwrap();
        assert_eq!(graphite.host, "graphite.internal");
        assert_eq!(graphite.port, 2003);
        assert!(!graphite.reconnect);

        assert_eq!(config.listen_addr(), Some("0.0.0.0:9125".parse().unwrap()));
        assert_eq!(config.logging().level, Level::Debug);
    }

    #[test]
    fn test_listener_disabled() {
        let config = Config::from_yaml_str("listen:\n  enabled: false\n").unwrap();
        assert_eq!(config.listen_addr(), None);
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            ("agent:\n  sample_interval: 0\n", "agent.sample_interval"),
            ("agent:\n  flush_interval: 0\n", "agent.flush_interval"),
            ("agent:\n  percentiles: [0]\n", "agent.percentiles"),
            ("agent:\n  percentiles: [100.5]\n", "agent.percentiles"),
            ("statsd:\n  datagram_size: 0\n", "statsd.datagram_size"),
            ("agent:\n  scales:\n    a: .nan\n", "agent.scales"),
            ("agent:\n  scales:\n    a: .inf\n", "agent.scales"),
        ];

        for (yaml, field) in cases {
            let error = Config::from_yaml_str(yaml).unwrap_err();
            assert_eq!(error.kind(), ConfigErrorKind::InvalidValue, "{yaml}");
            assert_eq!(error.field_name(), Some(field));
        }

        let error = Config::from_yaml_str("agent:\n  percentiles: [100]\n");
        assert!(error.is_ok());
    }

    #[test]
    fn test_forward_to_own_listener() {
        let cases = [
            "statsd: {}\n",
            "statsd:\n  host: localhost\n",
            "statsd:\n  host: 127.0.0.1\nlisten:\n  host: 0.0.0.0\n",
            "statsd:\n  host: 10.0.0.1\nlisten:\n  host: 10.0.0.1\n",
            "statsd:\n  port: 9125\nlisten:\n  port: 9125\n",
        ];

        for yaml in cases {
            let error = Config::from_yaml_str(yaml).unwrap_err();
            assert_eq!(error.kind(), ConfigErrorKind::InvalidValue, "{yaml}");
            assert_eq!(error.field_name(), Some("statsd.port"), "{yaml}");
        }

        let cases = [
            "statsd:\n  port: 9125\n",
            "statsd:\n  host: statsd.internal\n",
            "statsd:\n  host: 10.0.0.1\n",
            "statsd: {}\nlisten:\n  enabled: false\n",
        ];

        for yaml in cases {
            let config = Config::from_yaml_str(yaml).unwrap();
            assert!(config.statsd().is_some(), "{yaml}");
        }
    }

    #[test]
    fn test_error_display() {
        let error = Config::from_yaml_str("agent:\n  flush_interval: 0\n").unwrap_err();
        insta::assert_snapshot!(error.to_string(), @"invalid config value (field agent.flush_interval)");
    }

    #[test]
    fn test_bad_yaml() {
        let error = Config::from_yaml_str("agent: [").unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);
        assert!(error.source().is_some());

        let error = Config::from_yaml_str("agent:\n  flush_interval: soon\n").unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);
    }

    #[test]
    fn test_from_path() {
        let folder = tempfile::tempdir().unwrap();
        let path = folder.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "agent:\n  flush_interval: 30\n").unwrap();

        let config = Config::from_path(folder.path()).unwrap();
        assert_eq!(config.flush_interval(), Duration::from_secs(30));
        assert_eq!(config.path(), Some(path.as_path()));
    }

    #[test]
    fn test_from_path_errors() {
        let folder = tempfile::tempdir().unwrap();
        let path = folder.path().join(CONFIG_FILE_NAME);

        let error = Config::from_path(folder.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::CouldNotOpenFile);
        assert_eq!(error.path(), Some(path.as_path()));

        fs::write(&path, "listen:\n  host: nowhere\n").unwrap();
        let error = Config::from_path(folder.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);
        assert!(error.to_string().ends_with(&format!("(file {})", path.display())));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::from_yaml_str("graphite:\n  host: graphite.internal\n").unwrap();
        let yaml = config.to_yaml_string().unwrap();

        assert!(yaml.contains("sample_interval: 1000"));
        assert!(!yaml.contains("statsd"));

        let reparsed = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(reparsed.values, config.values);
    }
}
