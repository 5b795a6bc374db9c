//! Per-job statistics and run totals.

use serde::{Deserialize, Serialize};

use jobwave_core::id::{JobId, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub job: JobId,
    pub nodes: Vec<NodeId>,
    pub map_tasks: u32,
    pub reduce_tasks: u32,
    pub records_in: u64,
    pub records_out: u64,
    pub bytes_written: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub jobs: usize,
    pub failed_jobs: usize,
    pub map_tasks: u64,
    pub reduce_tasks: u64,
    pub records_in: u64,
    pub records_out: u64,
    pub bytes_written: u64,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn add(&mut self, stats: &JobStats) {
        self.map_tasks += u64::from(stats.map_tasks);
        self.reduce_tasks += u64::from(stats.reduce_tasks);
        self.records_in += stats.records_in;
        self.records_out += stats.records_out;
        self.bytes_written += stats.bytes_written;
        self.duration_ms += stats.duration_ms;
    }
}
