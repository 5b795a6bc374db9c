//! Submittable jobs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use jobwave_core::config::ConfigSnapshot;
use jobwave_core::id::{JobId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Waiting,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// One cluster job materialized from a ready graph node. Immutable once
/// submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledJob {
    pub id: JobId,
    /// `{group}-{node}`, unique within a run.
    pub name: String,
    pub group_id: String,
    /// Graph nodes this job runs; stats are reported against them.
    pub nodes: Vec<NodeId>,
    /// Resolved input locations, one per map branch.
    pub inputs: Vec<String>,
    /// Where the substrate writes before commit.
    pub staging: String,
    /// Where commit moves the output.
    pub destination: String,
    pub temporary: bool,
    /// Reduce tasks; zero for map-only jobs.
    pub reduce_tasks: u32,
    pub config: Arc<ConfigSnapshot>,
}

impl CompiledJob {
    pub fn map_tasks(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_map_only(&self) -> bool {
        self.reduce_tasks == 0
    }
}
