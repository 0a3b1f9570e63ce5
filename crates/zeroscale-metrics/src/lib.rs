//! zeroscale-metrics — in-memory status tables rendered to disk on a tick.
//!
//! Four tables: container utilization, service replicas, armed wake ports,
//! and (optionally) the event log. When logging is enabled the writer task
//! rewrites `logging/autoscaler.log` every second.

pub mod tables;
pub mod writer;

pub use tables::LogTables;
pub use writer::run_writer;
