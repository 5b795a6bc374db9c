#![forbid(unsafe_code)]
//! jobwave-exec: wave compilation, the execution driver, output commit, and a
//! simulated cluster to run against.
//!
//! The driver (`Launcher`) is substrate-agnostic: anything implementing
//! `ExecutionSubstrate` can run a job graph. `SimulatedCluster` is a
//! deterministic in-process one, used by the CLI and the tests.

pub mod commit;
pub mod job;
pub mod launcher;
pub mod metrics;
pub mod progress;
pub mod simulated;
pub mod stats;
pub mod substrate;
pub mod wave;

pub use commit::{FsCommitter, NoopCommitter, OutputCommitter};
pub use job::{CompiledJob, JobStatus};
pub use launcher::{ExecError, JobRecord, Launcher, RunOutcome};
pub use progress::ProgressTracker;
pub use simulated::{JobScript, SimulatedCluster};
pub use stats::{JobStats, RunSummary};
pub use substrate::ExecutionSubstrate;
pub use wave::{JobControlCompiler, Wave, WaveCompiler};
