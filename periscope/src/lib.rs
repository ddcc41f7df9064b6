//! The periscope telemetry agent.
//!
//! This library supports the periscope binary found elsewhere in this
//! project. Periscope polls the management APIs of a Splunk Enterprise
//! deployment on a fixed interval. Search job results arrive as XML and REST
//! entry lists as JSON; both are folded into one uniform batch of metric data
//! points per cycle.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod capture;
pub mod client;
pub mod config;
pub mod metric;
pub mod scrape;
