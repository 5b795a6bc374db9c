//! The execution substrate the driver submits waves to.

use jobwave_core::id::JobId;

use crate::job::JobStatus;
use crate::launcher::ExecError;
use crate::stats::JobStats;
use crate::wave::Wave;

/// A cluster that runs a wave's jobs with its own parallelism. The driver
/// only ever observes it through polling.
pub trait ExecutionSubstrate {
    /// Start every job of the wave. Returns once submitted, not once finished.
    fn submit(&mut self, wave: &Wave) -> Result<(), ExecError>;

    /// Whether every job of the current wave reached a terminal status.
    fn all_finished(&mut self) -> Result<bool, ExecError>;

    /// Completed fraction of one job, in `0.0..=1.0`.
    fn job_progress(&self, job: JobId) -> f64;

    fn job_status(&self, job: JobId) -> JobStatus;

    /// Diagnostic for a failed job.
    fn job_message(&self, job: JobId) -> Option<String>;

    /// Kill whatever is still running.
    fn stop(&mut self) -> Result<(), ExecError>;

    fn job_stats(&self, job: JobId) -> Result<JobStats, ExecError>;
}
