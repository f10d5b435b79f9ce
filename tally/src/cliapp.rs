//! This module implements the definition of the command line app.

use std::path::PathBuf;

use clap::builder::ValueParser;
use clap::{Arg, Command};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Aggregates StatsD metrics and ships them to Graphite.";

pub fn make_app() -> Command {
    Command::new("tally")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("CONFIG")
                .value_parser(ValueParser::path_buf())
                .env("TALLY_CONFIG")
                .help("The path to the config folder."),
        )
        .subcommand(
            Command::new("run")
                .about("Run the agent")
                .after_help(
                    "This runs the agent in the foreground until it's shut down with Ctrl-C. \
                     It listens for StatsD metrics on the configured UDP port, aggregates \
                     them and sends every flushed summary to the configured Graphite \
                     collector.",
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .after_help(
                    "This prints the configuration as YAML, with defaults filled in for \
                     every value missing from the config file.",
                ),
        )
}

/// Returns the config folder passed on the command line, if any.
pub fn config_folder(matches: &clap::ArgMatches) -> Option<&PathBuf> {
    matches.get_one::<PathBuf>("config")
}
