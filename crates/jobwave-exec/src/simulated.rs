//! A deterministic in-process cluster.
//!
//! Every job runs for a scripted number of ticks; one tick passes per
//! `all_finished` poll. Jobs can be scripted to fail. With staging output
//! enabled, a successful job leaves a `_SUCCESS` marker in its staging
//! directory so that `FsCommitter` has something to move.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use jobwave_core::id::{JobId, NodeId};

use crate::job::{CompiledJob, JobStatus};
use crate::launcher::ExecError;
use crate::stats::JobStats;
use crate::substrate::ExecutionSubstrate;
use crate::wave::Wave;

pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// Milliseconds of simulated work per tick, for reported durations.
const TICK_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobScript {
    pub ticks: u32,
    /// Diagnostic to fail with once the ticks are used up.
    pub fail: Option<String>,
    pub records: u64,
}

impl Default for JobScript {
    fn default() -> Self {
        Self {
            ticks: 3,
            fail: None,
            records: 1000,
        }
    }
}

impl JobScript {
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct SimJob {
    job: CompiledJob,
    script: JobScript,
    ticks_done: u32,
    status: JobStatus,
    message: Option<String>,
}

#[derive(Debug, Default)]
pub struct SimulatedCluster {
    default_script: JobScript,
    scripts: HashMap<NodeId, JobScript>,
    write_staging: bool,
    jobs: BTreeMap<JobId, SimJob>,
    current: Vec<JobId>,
    submissions: Vec<Vec<JobId>>,
}

impl SimulatedCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_script(mut self, script: JobScript) -> Self {
        self.default_script = script;
        self
    }

    /// Script the job that runs `node`.
    pub fn with_script(mut self, node: NodeId, script: JobScript) -> Self {
        self.scripts.insert(node, script);
        self
    }

    pub fn fail_node(self, node: NodeId, message: impl Into<String>) -> Self {
        self.with_script(node, JobScript::failing(message))
    }

    pub fn with_staging_output(mut self, enabled: bool) -> Self {
        self.write_staging = enabled;
        self
    }

    /// Job ids per submitted wave, in submission order.
    pub fn submissions(&self) -> &[Vec<JobId>] {
        &self.submissions
    }

    pub fn submitted_jobs(&self) -> usize {
        self.submissions.iter().map(Vec::len).sum()
    }

    /// Node a submitted job runs.
    pub fn node_of(&self, job: JobId) -> Option<NodeId> {
        self.jobs.get(&job).and_then(|j| j.job.nodes.first().copied())
    }

    fn script_for(&self, job: &CompiledJob) -> JobScript {
        job.nodes
            .iter()
            .find_map(|n| self.scripts.get(n))
            .unwrap_or(&self.default_script)
            .clone()
    }

    fn tick(&mut self) -> Result<(), ExecError> {
        let write_staging = self.write_staging;
        for id in &self.current {
            let Some(sim) = self.jobs.get_mut(id) else {
                continue;
            };
            if sim.status.is_terminal() {
                continue;
            }
            sim.ticks_done += 1;
            if sim.ticks_done < sim.script.ticks {
                continue;
            }
            match &sim.script.fail {
                Some(message) => {
                    sim.status = JobStatus::Failed;
                    sim.message = Some(message.clone());
                }
                None => {
                    if write_staging {
                        write_marker(&sim.job.staging)?;
                    }
                    sim.status = JobStatus::Succeeded;
                }
            }
        }
        Ok(())
    }

    fn sim(&self, job: JobId) -> Result<&SimJob, ExecError> {
        self.jobs
            .get(&job)
            .ok_or_else(|| ExecError::Substrate(format!("{job} was never submitted")))
    }
}

fn write_marker(staging: &str) -> Result<(), ExecError> {
    let dir = Path::new(staging);
    fs::create_dir_all(dir)
        .and_then(|_| fs::write(dir.join(SUCCESS_MARKER), b""))
        .map_err(|e| ExecError::Substrate(format!("write {staging}: {e}")))
}

impl ExecutionSubstrate for SimulatedCluster {
    fn submit(&mut self, wave: &Wave) -> Result<(), ExecError> {
        if let Some(running) = self
            .current
            .iter()
            .find(|id| self.jobs.get(*id).is_some_and(|j| !j.status.is_terminal()))
        {
            return Err(ExecError::Substrate(format!(
                "{running} is still running; wave {} submitted too early",
                wave.seq
            )));
        }

        self.current = wave.job_ids();
        self.submissions.push(self.current.clone());
        for job in &wave.jobs {
            let script = self.script_for(job);
            self.jobs.insert(
                job.id,
                SimJob {
                    job: job.clone(),
                    script,
                    ticks_done: 0,
                    status: JobStatus::Running,
                    message: None,
                },
            );
        }
        Ok(())
    }

    fn all_finished(&mut self) -> Result<bool, ExecError> {
        self.tick()?;
        Ok(self
            .current
            .iter()
            .all(|id| self.jobs.get(id).map_or(true, |j| j.status.is_terminal())))
    }

    fn job_progress(&self, job: JobId) -> f64 {
        match self.jobs.get(&job) {
            Some(sim) if sim.status.is_terminal() => 1.0,
            Some(sim) if sim.script.ticks > 0 => {
                f64::from(sim.ticks_done) / f64::from(sim.script.ticks)
            }
            _ => 0.0,
        }
    }

    fn job_status(&self, job: JobId) -> JobStatus {
        self.jobs
            .get(&job)
            .map_or(JobStatus::Waiting, |sim| sim.status)
    }

    fn job_message(&self, job: JobId) -> Option<String> {
        self.jobs.get(&job).and_then(|sim| sim.message.clone())
    }

    fn stop(&mut self) -> Result<(), ExecError> {
        for id in &self.current {
            if let Some(sim) = self.jobs.get_mut(id) {
                if !sim.status.is_terminal() {
                    sim.status = JobStatus::Failed;
                    sim.message = Some("killed by driver".to_string());
                }
            }
        }
        Ok(())
    }

    fn job_stats(&self, job: JobId) -> Result<JobStats, ExecError> {
        let sim = self.sim(job)?;
        let records_in = sim.script.records;
        let records_out = match sim.status {
            JobStatus::Succeeded if sim.job.is_map_only() => records_in,
            JobStatus::Succeeded => records_in / 2,
            _ => 0,
        };
        Ok(JobStats {
            job,
            nodes: sim.job.nodes.clone(),
            map_tasks: sim.job.map_tasks() as u32,
            reduce_tasks: sim.job.reduce_tasks,
            records_in,
            records_out,
            bytes_written: records_out * 64,
            duration_ms: u64::from(sim.ticks_done) * TICK_MS,
        })
    }
}
