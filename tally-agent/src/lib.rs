//! Background sampling and flushing of metrics.
//!
//! A [`SampleAgent`] owns a [`StatsCollection`](tally_metrics::StatsCollection) and drives it from
//! a dedicated thread. On every sampling pass, registered hooks push fresh readings into the
//! collection. At wall-clock aligned flush boundaries, the collection is flushed into a
//! [`StatsSummary`](tally_metrics::StatsSummary) that is handed to the flushed hooks, for instance
//! to forward it to Graphite.
//!
//! The [`StatsAgent`] adds named samplers on top, which read a single value each per pass.
//!
//! Faults in hooks and samplers are isolated: they are logged, passed to the
//! [error hooks](SampleAgent::on_error), and the agent keeps running.

#![warn(missing_docs)]

mod agent;
mod error;
mod hooks;
mod schedule;
mod stats_agent;

pub use crate::agent::*;
pub use crate::error::*;
pub use crate::schedule::*;
pub use crate::stats_agent::*;
