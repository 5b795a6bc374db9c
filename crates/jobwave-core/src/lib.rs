#![forbid(unsafe_code)]
//! jobwave-core: shared vocabulary for the plan compiler and the wave launcher.
//!
//! - strongly-typed ids (`OpId`, `NodeId`, `JobId`)
//! - the input `PhysicalPlan` handed over by the upstream planner
//! - `RunConfig` and its immutable `ConfigSnapshot`
//! - the error taxonomy shared by every stage of a launch
//!
//! No I/O and no threads here; exec owns those.

pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod plan;
pub mod prelude;
pub mod schema;

pub use error::{Error, Result};

/// Version string stamped into job configuration snapshots.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
