//! Marks the phases that pipe records through an external process.

use jobwave_core::error::{Error, Result};

use crate::job_graph::{JobGraph, LocalOp, StreamMarker};
use crate::passes::GraphPass;

const NAME: &str = "stream-detection";

pub struct StreamDetector;

impl GraphPass for StreamDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, graph: &mut JobGraph) -> Result<()> {
        for node in graph.nodes_mut() {
            let combine = node
                .combine
                .as_ref()
                .is_some_and(|c| c.ops.iter().any(LocalOp::is_stream));
            if combine {
                return Err(Error::optimization(
                    NAME,
                    format!("{}: combine plan may not run an external command", node.id),
                ));
            }
            node.annotations.stream = StreamMarker {
                map: node.map.iter().any(|b| b.ops.iter().any(LocalOp::is_stream)),
                combine,
                reduce: node.reduce.iter().any(LocalOp::is_stream),
            };
        }
        Ok(())
    }
}
