use std::path::Path;

use anyhow::{Context, Result};
use tally_config::Config;

/// Loads the configuration from the config folder, or the defaults without one.
pub fn load_config(folder: Option<&Path>) -> Result<Config> {
    match folder {
        Some(folder) => Config::from_path(folder)
            .with_context(|| format!("failed to load config from {}", folder.display())),
        None => Ok(Config::default()),
    }
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    match config.path() {
        Some(path) => tally_log::info!("launching tally with config {}", path.display()),
        None => tally_log::info!("launching tally without config folder"),
    }

    tally_log::info!("  sample interval: {:?}", config.sample_interval());
    tally_log::info!("  flush interval: {:?}", config.flush_interval());

    match config.listen_addr() {
        Some(addr) => tally_log::info!("  statsd listener: {addr}"),
        None => tally_log::info!("  statsd listener: disabled"),
    }

    match config.graphite() {
        Some(graphite) => tally_log::info!("  graphite: {}:{}", graphite.host, graphite.port),
        None => tally_log::info!("  graphite: -"),
    }

    if let Some(statsd) = config.statsd() {
        tally_log::info!("  forwarding to statsd: {}:{}", statsd.host, statsd.port);
    }
}
