//! Common functionality for the tally crates.
#![warn(missing_docs)]

mod panic;
mod time;

pub use crate::panic::*;
pub use crate::time::*;
