#![forbid(unsafe_code)]
//! jobwave: compile dataflow plans into a DAG of map/combine/reduce jobs and
//! drive it wave by wave against a batch cluster.
//!
//! This crate only re-exports the workspace members.

pub use jobwave_core;
pub use jobwave_exec;
pub use jobwave_planner;
