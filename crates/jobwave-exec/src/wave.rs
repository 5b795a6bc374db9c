//! Wave compilation: the cursor that turns ready graph nodes into jobs.
//!
//! A node is ready once every predecessor has been committed. `next_wave`
//! takes all ready, not-yet-compiled nodes in ascending id order, so the same
//! graph and completed set always yield the same wave.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use jobwave_core::config::{RunConfig, KEY_LAST_INPUT_CHUNK_SIZE};
use jobwave_core::error::{Error, Result};
use jobwave_core::id::{JobId, NodeId};
use jobwave_planner::job_graph::{JobGraph, MapReduceNode};

use crate::commit::OutputCommitter;
use crate::job::CompiledJob;

pub const KEY_JOB_NAME: &str = "job.name";
pub const KEY_JOB_GROUP: &str = "job.group";
pub const KEY_JOB_NODES: &str = "job.nodes";
pub const KEY_SPECULATIVE: &str = "exec.speculative";
pub const KEY_REDUCE_TASKS: &str = "exec.reduce.tasks";
pub const KEY_COMBINE_CHUNK_SIZE: &str = "exec.combine.chunksize";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    pub group_id: String,
    /// Position of the wave within the run, from zero.
    pub seq: u64,
    pub jobs: Vec<CompiledJob>,
}

impl Wave {
    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|j| j.id).collect()
    }
}

pub trait WaveCompiler {
    /// Compile every ready node, or `None` once the whole graph was compiled.
    fn next_wave(&mut self, graph: &JobGraph, group_id: &str) -> Result<Option<Wave>>;

    /// Commit the output of the wave's successful jobs and mark their nodes
    /// completed. At most once per wave.
    fn commit_results(&mut self, wave: &Wave, succeeded: &[JobId]) -> Result<()>;

    /// Drop the temporary outputs committed so far. Called once, when the
    /// run ends either way.
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct JobControlCompiler {
    config: RunConfig,
    committer: Box<dyn OutputCommitter>,
    compiled: BTreeSet<NodeId>,
    completed: BTreeSet<NodeId>,
    committed_waves: BTreeSet<u64>,
    /// Committed jobs whose output only feeds later jobs.
    temporaries: Vec<CompiledJob>,
    next_job: u64,
    next_seq: u64,
}

impl JobControlCompiler {
    pub fn new(config: RunConfig, committer: Box<dyn OutputCommitter>) -> Self {
        Self {
            config,
            committer,
            compiled: BTreeSet::new(),
            completed: BTreeSet::new(),
            committed_waves: BTreeSet::new(),
            temporaries: Vec::new(),
            next_job: 0,
            next_seq: 0,
        }
    }

    pub fn completed(&self) -> &BTreeSet<NodeId> {
        &self.completed
    }

    fn ready(&self, graph: &JobGraph) -> Vec<NodeId> {
        graph
            .nodes()
            .iter()
            .map(|n| n.id)
            .filter(|id| !self.compiled.contains(id))
            .filter(|id| graph.predecessors(*id).all(|p| self.completed.contains(&p)))
            .collect()
    }

    fn materialize(
        &self,
        graph: &JobGraph,
        node: &MapReduceNode,
        id: JobId,
        group_id: &str,
    ) -> Result<CompiledJob> {
        self.config
            .validate()
            .map_err(|e| Error::job_creation(node.id, e.to_string()))?;

        let destination = node.output.location().to_string();
        if destination.is_empty() {
            return Err(Error::job_creation(node.id, "output has no location"));
        }

        let mut inputs = Vec::with_capacity(node.map.len());
        for upstream in node.temp_inputs() {
            if !self.completed.contains(&upstream) {
                return Err(Error::job_creation(
                    node.id,
                    format!("reads {upstream}, which has not completed"),
                ));
            }
        }
        for branch in &node.map {
            let location = branch.source.location();
            if location.is_empty() {
                return Err(Error::job_creation(node.id, "map input has no location"));
            }
            inputs.push(location.to_string());
        }

        if let Some(combine) = &node.combine {
            if combine.chunk_size == 0 {
                return Err(Error::job_creation(
                    node.id,
                    "combine chunk size must be positive",
                ));
            }
        }

        let name = format!("{group_id}-{}", node.id);
        let reduce_tasks = node.parallelism.unwrap_or(0);
        let mut snapshot = self
            .config
            .snapshot()
            .with(KEY_JOB_NAME, &name)
            .with(KEY_JOB_GROUP, group_id)
            .with(KEY_JOB_NODES, node.id)
            .with(KEY_SPECULATIVE, !node.annotations.stream.any())
            .with(KEY_REDUCE_TASKS, reduce_tasks);
        if let Some(combine) = &node.combine {
            snapshot = snapshot.with(KEY_COMBINE_CHUNK_SIZE, combine.chunk_size);
        }
        if snapshot.get_usize(KEY_LAST_INPUT_CHUNK_SIZE).unwrap_or(0) == 0 {
            return Err(Error::job_creation(
                node.id,
                format!("{KEY_LAST_INPUT_CHUNK_SIZE} did not resolve to a positive number"),
            ));
        }

        let staging = format!(
            "{}/{}/staging/{name}",
            self.config.temp_dir.trim_end_matches('/'),
            graph.scope
        );

        Ok(CompiledJob {
            id,
            name,
            group_id: group_id.to_string(),
            nodes: vec![node.id],
            inputs,
            staging,
            destination,
            temporary: node.output.is_temporary(),
            reduce_tasks,
            config: Arc::new(snapshot),
        })
    }
}

impl WaveCompiler for JobControlCompiler {
    fn next_wave(&mut self, graph: &JobGraph, group_id: &str) -> Result<Option<Wave>> {
        if self.compiled.len() == graph.len() {
            return Ok(None);
        }

        let ready = self.ready(graph);
        if ready.is_empty() {
            return Err(Error::Invariant(format!(
                "{} nodes left but none is ready; commit the previous wave first",
                graph.len() - self.compiled.len()
            )));
        }

        // Nothing is recorded until every ready node materialized.
        let mut jobs = Vec::with_capacity(ready.len());
        for (offset, id) in ready.iter().enumerate() {
            let node = graph
                .node(*id)
                .ok_or_else(|| Error::Invariant(format!("{id} missing from job graph")))?;
            let job_id = JobId::new(self.next_job + offset as u64);
            jobs.push(self.materialize(graph, node, job_id, group_id)?);
        }

        self.compiled.extend(ready.iter().copied());
        self.next_job += jobs.len() as u64;
        let seq = self.next_seq;
        self.next_seq += 1;

        debug!(seq, jobs = jobs.len(), "compiled wave");
        Ok(Some(Wave {
            group_id: group_id.to_string(),
            seq,
            jobs,
        }))
    }

    fn commit_results(&mut self, wave: &Wave, succeeded: &[JobId]) -> Result<()> {
        if !self.committed_waves.insert(wave.seq) {
            return Err(Error::Invariant(format!(
                "wave {} was already committed",
                wave.seq
            )));
        }
        for job in wave.jobs.iter().filter(|j| succeeded.contains(&j.id)) {
            self.committer.commit(job)?;
            self.completed.extend(job.nodes.iter().copied());
            if job.temporary {
                self.temporaries.push(job.clone());
            }
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        for job in self.temporaries.drain(..) {
            self.committer.discard(&job)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::NoopCommitter;
    use jobwave_planner::job_graph::{
        DataSource, MapBranch, NodeAnnotations, NodeOutput,
    };

    fn node(id: u64, upstream: &[u64]) -> MapReduceNode {
        let map = if upstream.is_empty() {
            vec![MapBranch {
                source: DataSource::File {
                    location: format!("in-{id}"),
                    schema: None,
                },
                ops: vec![],
            }]
        } else {
            upstream
                .iter()
                .map(|u| MapBranch {
                    source: DataSource::Temp {
                        node: NodeId::new(*u),
                        location: format!("tmp-{u}"),
                    },
                    ops: vec![],
                })
                .collect()
        };
        MapReduceNode {
            id: NodeId::new(id),
            map,
            combine: None,
            reduce: vec![],
            output: NodeOutput::Temporary {
                location: format!("tmp-{id}"),
            },
            parallelism: None,
            annotations: NodeAnnotations::default(),
        }
    }

    fn diamond() -> JobGraph {
        JobGraph::from_nodes(
            "scope",
            vec![node(0, &[]), node(1, &[]), node(2, &[0, 1])],
        )
        .unwrap()
    }

    fn compiler() -> JobControlCompiler {
        JobControlCompiler::new(RunConfig::default(), Box::new(NoopCommitter))
    }

    #[test]
    fn waves_follow_dependencies() {
        let g = diamond();
        let mut jcc = compiler();

        let first = jcc.next_wave(&g, "grp").unwrap().unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(first.jobs.len(), 2);
        assert_eq!(first.jobs[1].name, "grp-node-1");
        jcc.commit_results(&first, &first.job_ids()).unwrap();

        let second = jcc.next_wave(&g, "grp").unwrap().unwrap();
        assert_eq!(second.jobs.len(), 1);
        assert_eq!(second.jobs[0].nodes, vec![NodeId::new(2)]);
        assert_eq!(second.jobs[0].id, JobId::new(2));
        jcc.commit_results(&second, &second.job_ids()).unwrap();

        assert!(jcc.next_wave(&g, "grp").unwrap().is_none());
    }

    #[test]
    fn uncommitted_wave_blocks_the_next() {
        let g = diamond();
        let mut jcc = compiler();
        jcc.next_wave(&g, "grp").unwrap().unwrap();
        assert!(matches!(
            jcc.next_wave(&g, "grp").unwrap_err(),
            Error::Invariant(_)
        ));
    }

    #[test]
    fn double_commit_is_rejected() {
        let g = diamond();
        let mut jcc = compiler();
        let wave = jcc.next_wave(&g, "grp").unwrap().unwrap();
        jcc.commit_results(&wave, &[]).unwrap();
        assert!(jcc.commit_results(&wave, &[]).is_err());
        assert!(jcc.completed().is_empty());
    }

    #[test]
    fn cleanup_forgets_committed_temporaries() {
        let g = diamond();
        let mut jcc = compiler();
        let wave = jcc.next_wave(&g, "grp").unwrap().unwrap();
        jcc.commit_results(&wave, &wave.job_ids()).unwrap();
        assert_eq!(jcc.temporaries.len(), 2);
        jcc.cleanup().unwrap();
        assert!(jcc.temporaries.is_empty());
    }

    #[test]
    fn invalid_config_fails_job_creation() {
        let g = diamond();
        let cfg = RunConfig {
            last_input_chunk_size: 0,
            ..Default::default()
        };
        let mut jcc = JobControlCompiler::new(cfg, Box::new(NoopCommitter));
        let err = jcc.next_wave(&g, "grp").unwrap_err();
        assert!(matches!(err, Error::JobCreation { .. }));
        assert_eq!(jcc.next_job, 0);
    }

    #[test]
    fn job_config_carries_node_settings() {
        let g = diamond();
        let mut jcc = compiler();
        let wave = jcc.next_wave(&g, "grp").unwrap().unwrap();
        let cfg = &wave.jobs[0].config;
        assert_eq!(cfg.get(KEY_JOB_NAME), Some("grp-node-0"));
        assert_eq!(cfg.get_bool(KEY_SPECULATIVE), Some(true));
        assert!(wave.jobs[0].staging.ends_with("/scope/staging/grp-node-0"));
    }
}
