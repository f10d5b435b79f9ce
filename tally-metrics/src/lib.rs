//! Metrics protocol, aggregation and summaries.
//!
//! Applications record measurements as [`Metric`]s, which pair a dot-delimited name with a typed
//! [`MetricValue`]. Four kinds of values are supported:
//!
//!  - **Gauges** store an absolute snapshot of a value. Within a flush window, the last reported
//!    value wins.
//!  - **Gauge deltas** adjust a gauge relative to its current value.
//!  - **Counters** are summed up and reported both as total and as rate per second.
//!  - **Timers** keep all samples and are reported with summary statistics and percentiles.
//!
//! # Submission Protocol
//!
//! ```text
//! <name>:<value>|<type>
//! ```
//!
//! See [`Metric`] for the grammar. To parse a payload with multiple lines, use
//! [`Metric::parse_all`].
//!
//! # Aggregation
//!
//! The [`StatsCollection`] aggregates metrics sent from any number of threads. On
//! [`flush`](StatsCollection::flush), it atomically rotates to an empty generation and returns a
//! [`StatsSummary`] of the retired one:
//!
//! ```text
//! stats.gauges.<name>
//! stats.timers.<name>.{mean,upper,sum}_<percentile>
//! stats.timers.<name>.{upper,lower,count,sum,mean}
//! stats_counts.<name>
//! stats.<name>
//! ```
//!
//! # Clients
//!
//! Everything that accepts metrics implements [`StatsClient`]. [`StatsClientExt`] adds convenience
//! methods for individual measurements, and [`ScopedStatsClient`] prefixes names before passing
//! metrics on.

#![warn(missing_docs)]

mod client;
mod collection;
mod config;
mod percentile;
mod protocol;
mod summary;

pub use self::client::*;
pub use self::collection::*;
pub use self::config::*;
pub use self::percentile::*;
pub use self::protocol::*;
pub use self::summary::*;

#[doc(inline)]
pub use tally_common::UnixTimestamp;
