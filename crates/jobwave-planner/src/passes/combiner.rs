//! Combiner insertion for algebraic group aggregations.
//!
//! Shape handled: one map branch ending in `LocalRearrange`, reduce plan
//! starting with `Package(Group)` immediately followed by a `Full` aggregate
//! whose calls are all algebraic. The rewrite splits the aggregate into
//! initial (map), intermediate (combine) and final (reduce) steps.

use jobwave_core::error::{Error, Result};

use crate::job_graph::{
    AggPhase, CombinePlan, JobGraph, LocalOp, MapReduceNode, PackageKind,
};
use crate::passes::GraphPass;

const NAME: &str = "combiner";

pub struct CombinerPass {
    /// Records buffered per key before the combiner flushes.
    pub chunk_size: usize,
}

impl GraphPass for CombinerPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, graph: &mut JobGraph) -> Result<()> {
        for node in graph.nodes_mut() {
            if eligible(node) {
                rewrite(node, self.chunk_size)?;
            }
        }
        Ok(())
    }
}

fn eligible(node: &MapReduceNode) -> bool {
    if node.map.len() != 1 || node.combine.is_some() {
        return false;
    }
    match node.reduce.as_slice() {
        [LocalOp::Package {
            kind: PackageKind::Group,
            ..
        }, LocalOp::Aggregate {
            calls,
            phase: AggPhase::Full,
            ..
        }, ..] => calls.iter().all(|c| c.function.is_algebraic()),
        _ => false,
    }
}

fn rewrite(node: &mut MapReduceNode, chunk_size: usize) -> Result<()> {
    let (keys, calls) = match node.reduce.get_mut(1) {
        Some(LocalOp::Aggregate {
            keys, calls, phase, ..
        }) => {
            *phase = AggPhase::Final;
            (keys.clone(), calls.clone())
        }
        _ => {
            return Err(Error::optimization(
                NAME,
                format!("{}: reduce plan lost its aggregate", node.id),
            ))
        }
    };

    let branch = &mut node.map[0];
    let rearrange_at = match branch.ops.last() {
        Some(LocalOp::LocalRearrange { .. }) => branch.ops.len() - 1,
        _ => {
            return Err(Error::optimization(
                NAME,
                format!("{}: map branch does not end in a rearrange", node.id),
            ))
        }
    };
    branch.ops.insert(
        rearrange_at,
        LocalOp::Aggregate {
            keys: keys.clone(),
            calls: calls.clone(),
            phase: AggPhase::Initial,
        },
    );

    node.combine = Some(CombinePlan {
        ops: vec![
            LocalOp::Package {
                kind: PackageKind::Group,
                inputs: 1,
                annotation: None,
            },
            LocalOp::Aggregate {
                keys: keys.clone(),
                calls,
                phase: AggPhase::Intermediate,
            },
            LocalOp::LocalRearrange { index: 0, keys },
        ],
        chunk_size,
    });
    Ok(())
}
