//! Streams the last input of an inner join instead of materializing it.
//!
//! `Package(Join(Inner)) → JoinFlatten` becomes a single `JoinPackage` that
//! buffers inputs `0..n-1` per key and walks the last one in chunks.

use jobwave_core::error::{Error, Result};
use jobwave_core::id::NodeId;
use jobwave_core::plan::JoinType;

use crate::job_graph::{JobGraph, LocalOp, PackageKind};
use crate::passes::GraphPass;

const NAME: &str = "last-input-streaming";

pub struct LastInputStreamingPass {
    pub chunk_size: usize,
}

impl GraphPass for LastInputStreamingPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, graph: &mut JobGraph) -> Result<()> {
        for node in graph.nodes_mut() {
            rewrite_joins(node.id, &mut node.reduce, self.chunk_size)?;
        }
        Ok(())
    }
}

fn rewrite_joins(node: NodeId, reduce: &mut Vec<LocalOp>, chunk_size: usize) -> Result<()> {
    let mut i = 0;
    while i < reduce.len() {
        let (inputs, annotation) = match &reduce[i] {
            LocalOp::Package {
                kind: PackageKind::Join(JoinType::Inner),
                inputs,
                annotation,
            } => (*inputs, annotation.clone()),
            _ => {
                i += 1;
                continue;
            }
        };

        match reduce.get(i + 1) {
            Some(LocalOp::JoinFlatten { inputs: flattened }) if *flattened == inputs => {}
            Some(LocalOp::JoinFlatten { inputs: flattened }) => {
                return Err(Error::optimization(
                    NAME,
                    format!("{node}: join package has {inputs} inputs but flatten covers {flattened}"),
                ))
            }
            _ => {
                return Err(Error::optimization(
                    NAME,
                    format!("{node}: join package is not followed by a flatten"),
                ))
            }
        }

        reduce.splice(
            i..i + 2,
            [LocalOp::JoinPackage {
                inputs,
                join_type: JoinType::Inner,
                chunk_size,
                streamed_input: inputs - 1,
                annotation,
            }],
        );
        i += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(kind: JoinType) -> Vec<LocalOp> {
        vec![
            LocalOp::Package {
                kind: PackageKind::Join(kind),
                inputs: 3,
                annotation: None,
            },
            LocalOp::JoinFlatten { inputs: 3 },
            LocalOp::Limit { n: 5 },
        ]
    }

    #[test]
    fn inner_join_streams_its_last_input() {
        let mut reduce = join(JoinType::Inner);
        rewrite_joins(NodeId::new(0), &mut reduce, 250).unwrap();
        assert_eq!(reduce.len(), 2);
        assert!(matches!(
            reduce[0],
            LocalOp::JoinPackage {
                streamed_input: 2,
                chunk_size: 250,
                ..
            }
        ));

        let once = reduce.clone();
        rewrite_joins(NodeId::new(0), &mut reduce, 250).unwrap();
        assert_eq!(reduce, once);
    }

    #[test]
    fn outer_join_is_untouched() {
        let mut reduce = join(JoinType::Left);
        rewrite_joins(NodeId::new(0), &mut reduce, 250).unwrap();
        assert_eq!(reduce, join(JoinType::Left));
    }

    #[test]
    fn missing_flatten_is_rejected() {
        let mut reduce = vec![LocalOp::Package {
            kind: PackageKind::Join(JoinType::Inner),
            inputs: 2,
            annotation: None,
        }];
        let err = rewrite_joins(NodeId::new(4), &mut reduce, 10).unwrap_err();
        assert!(err.to_string().contains("node-4"));
    }
}
