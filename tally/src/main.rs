//! The tally command line agent.
//!
//! Tally listens for metrics in the StatsD line protocol on a UDP socket, aggregates them over a
//! flush window and ships the summary to a Graphite collector:
//!
//! ```text
//! tally --config ./config run
//! ```
//!
//! Run `tally config` to print the effective configuration including all defaults.

mod cli;
mod cliapp;
mod run;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            tally_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
