//! Configuration for the tally agent.
//!
//! The configuration is read from `config.yml` in a config folder. See [`Config`] for the file
//! layout and defaults.

#![warn(missing_docs)]

mod config;

pub use crate::config::*;
