//! The execution driver.
//!
//! One controller loop per launch: compile a wave, submit it, poll it to
//! completion, commit what succeeded, and either move on or stop. A failed
//! job ends the run after its wave; there is no retry at this layer.

use std::io::Write;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use jobwave_core::config::RunConfig;
use jobwave_core::id::{JobId, NodeId};
use jobwave_core::plan::PhysicalPlan;
use jobwave_planner::explain::{explain, ExplainFormat};
use jobwave_planner::job_graph::JobGraph;

use crate::commit::OutputCommitter;
use crate::job::{CompiledJob, JobStatus};
use crate::metrics;
use crate::progress::{job_fraction, ProgressTracker};
use crate::stats::{JobStats, RunSummary};
use crate::substrate::ExecutionSubstrate;
use crate::wave::{JobControlCompiler, Wave, WaveCompiler};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Core(#[from] jobwave_core::Error),
    #[error("substrate: {0}")]
    Substrate(String),
    #[error("output: {0}")]
    Io(#[from] std::io::Error),
    #[error("outcome: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: JobId,
    pub name: String,
    pub nodes: Vec<NodeId>,
    pub status: JobStatus,
    pub message: Option<String>,
    /// Filled for failed jobs when the run fails, for every job when it succeeds.
    pub stats: Option<JobStats>,
}

impl JobRecord {
    fn new(job: &CompiledJob, status: JobStatus) -> Self {
        Self {
            job: job.id,
            name: job.name.clone(),
            nodes: job.nodes.clone(),
            status,
            message: None,
            stats: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub group_id: String,
    pub succeeded: bool,
    pub successful: Vec<JobRecord>,
    pub failed: Vec<JobRecord>,
    /// Job ids per wave, in submission order.
    pub waves: Vec<Vec<JobId>>,
    /// Progress observed at every poll.
    pub progress: Vec<f64>,
    /// Progress and result lines, in the order they were logged.
    pub lines: Vec<String>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            jobs: self.successful.len() + self.failed.len(),
            failed_jobs: self.failed.len(),
            ..Default::default()
        };
        for stats in self
            .successful
            .iter()
            .chain(self.failed.iter())
            .filter_map(|r| r.stats.as_ref())
        {
            summary.add(stats);
        }
        summary
    }

    pub fn to_json_pretty(&self) -> Result<String, ExecError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Per-launch state, owned by the controller loop only.
struct RunState {
    progress: ProgressTracker,
    successful: Vec<JobRecord>,
    failed: Vec<JobRecord>,
    waves: Vec<Vec<JobId>>,
    samples: Vec<f64>,
    lines: Vec<String>,
}

impl RunState {
    fn new(total: usize) -> Self {
        Self {
            progress: ProgressTracker::new(total),
            successful: Vec::new(),
            failed: Vec::new(),
            waves: Vec::new(),
            samples: Vec::new(),
            lines: Vec::new(),
        }
    }

    fn info(&mut self, line: String) {
        info!("{line}");
        self.lines.push(line);
    }

    fn error(&mut self, line: String) {
        error!("{line}");
        self.lines.push(line);
    }

    fn into_outcome(self, group_id: &str, succeeded: bool) -> RunOutcome {
        RunOutcome {
            run_id: Uuid::new_v4(),
            group_id: group_id.to_string(),
            succeeded,
            successful: self.successful,
            failed: self.failed,
            waves: self.waves,
            progress: self.samples,
            lines: self.lines,
        }
    }
}

pub struct Launcher {
    config: RunConfig,
    poll_interval: Duration,
}

impl Launcher {
    pub fn new(config: RunConfig) -> Self {
        let poll_interval = Duration::from_millis(config.poll_interval_ms);
        Self {
            config,
            poll_interval,
        }
    }

    /// Override the sleep between polls (tests poll without sleeping).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn compile(&self, plan: &PhysicalPlan) -> Result<JobGraph, ExecError> {
        Ok(jobwave_planner::compile(plan, &self.config)?)
    }

    /// Compile `plan` and run it with a `JobControlCompiler`.
    pub fn launch_plan(
        &self,
        plan: &PhysicalPlan,
        group_id: &str,
        committer: Box<dyn OutputCommitter>,
        substrate: &mut dyn ExecutionSubstrate,
    ) -> Result<RunOutcome, ExecError> {
        let graph = self.compile(plan)?;
        let mut compiler = JobControlCompiler::new(self.config.clone(), committer);
        self.launch(&graph, group_id, &mut compiler, substrate)
    }

    pub fn explain(
        &self,
        plan: &PhysicalPlan,
        sink: &mut dyn Write,
        format: ExplainFormat,
        verbose: bool,
    ) -> Result<(), ExecError> {
        let graph = self.compile(plan)?;
        explain(&graph, sink, format, verbose)?;
        Ok(())
    }

    /// Run every wave of `graph`. Job failures are reported through the
    /// outcome; errors are reserved for compile, commit and substrate faults.
    pub fn launch(
        &self,
        graph: &JobGraph,
        group_id: &str,
        compiler: &mut dyn WaveCompiler,
        substrate: &mut dyn ExecutionSubstrate,
    ) -> Result<RunOutcome, ExecError> {
        let mut state = RunState::new(graph.len());
        debug!(group_id, jobs = graph.len(), "launching");

        while let Some(wave) = compiler.next_wave(graph, group_id)? {
            metrics::record_wave("submit", &wave);
            substrate.submit(&wave)?;
            state.waves.push(wave.job_ids());

            self.poll(&wave, substrate, &mut state)?;

            let mut succeeded = Vec::new();
            let mut failed = Vec::new();
            for job in &wave.jobs {
                match substrate.job_status(job.id) {
                    JobStatus::Succeeded => {
                        succeeded.push(job.id);
                        state.successful.push(JobRecord::new(job, JobStatus::Succeeded));
                    }
                    status => {
                        let mut record = JobRecord::new(job, status);
                        record.message = substrate.job_message(job.id);
                        failed.push(record);
                    }
                }
            }

            compiler.commit_results(&wave, &succeeded)?;
            metrics::record_wave("commit", &wave);
            state.progress.wave_finished(wave.jobs.len());

            if !failed.is_empty() {
                substrate.stop()?;
                compiler.cleanup()?;
                state.failed.extend(failed);
                return self.fail(state, group_id, substrate);
            }
        }
        compiler.cleanup()?;

        for record in &mut state.successful {
            record.stats = Some(substrate.job_stats(record.job)?);
            metrics::record_job(record);
        }
        state.info("100% complete".to_string());
        state.info("Success!".to_string());
        Ok(state.into_outcome(group_id, true))
    }

    fn poll(
        &self,
        wave: &Wave,
        substrate: &mut dyn ExecutionSubstrate,
        state: &mut RunState,
    ) -> Result<(), ExecError> {
        loop {
            let finished = substrate.all_finished()?;
            let done: f64 = wave
                .jobs
                .iter()
                .map(|j| job_fraction(substrate.job_progress(j.id)))
                .sum();
            if let Some(pct) = state.progress.update(done) {
                state.info(format!("{pct}% complete"));
            }
            state.samples.push(state.progress.value());
            if finished {
                return Ok(());
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn fail(
        &self,
        mut state: RunState,
        group_id: &str,
        substrate: &mut dyn ExecutionSubstrate,
    ) -> Result<RunOutcome, ExecError> {
        state.error("Map reduce job failed".to_string());
        let mut lines = Vec::new();
        for record in &mut state.failed {
            let message = record
                .message
                .clone()
                .unwrap_or_else(|| "no diagnostic reported".to_string());
            lines.push(format!("{} ({}) failed: {message}", record.name, record.job));
            record.stats = Some(substrate.job_stats(record.job)?);
            metrics::record_job(record);
        }
        for line in lines {
            state.error(line);
        }
        Ok(state.into_outcome(group_id, false))
    }
}
