use std::io::{self, Write};

use anyhow::{Context, Result};
use tally_config::Config;

use crate::cliapp::{config_folder, make_app};
use crate::{run, setup};

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();

    let folder = config_folder(&matches).map(|path| path.as_path());
    let config = setup::load_config(folder)?;

    // Logging is initialized before dispatching so that all commands log the same way.
    tally_log::init(config.logging());

    match matches.subcommand() {
        Some(("run", _)) => run_agent(config),
        Some(("config", _)) => dump_config(&config),
        // Clap requires a subcommand.
        _ => unreachable!(),
    }
}

fn run_agent(config: Config) -> Result<()> {
    setup::dump_spawn_infos(&config);
    run::run(config)
}

fn dump_config(config: &Config) -> Result<()> {
    let yaml = config.to_yaml_string()?;

    let mut stdout = io::stdout().lock();
    stdout
        .write_all(yaml.as_bytes())
        .context("failed to write config to stdout")?;

    Ok(())
}
