//! Structured trace events for waves and jobs.
//!
//! Kept at TRACE so they cost nothing unless a subscriber asks for them.

use tracing::{trace, trace_span};

use crate::launcher::JobRecord;
use crate::wave::Wave;

pub fn record_wave(event: &str, wave: &Wave) {
    let span = trace_span!("jobwave.wave", group = %wave.group_id, seq = wave.seq);
    let _entered = span.enter();
    for job in &wave.jobs {
        trace!(
            %event,
            job = %job.id,
            name = %job.name,
            inputs = job.inputs.len(),
            reduce_tasks = job.reduce_tasks,
            "wave job"
        );
    }
}

pub fn record_job(record: &JobRecord) {
    match &record.stats {
        Some(stats) => trace!(
            job = %record.job,
            status = ?record.status,
            records_in = stats.records_in,
            records_out = stats.records_out,
            duration_ms = stats.duration_ms,
            "job stats"
        ),
        None => trace!(job = %record.job, status = ?record.status, "job without stats"),
    }
}
