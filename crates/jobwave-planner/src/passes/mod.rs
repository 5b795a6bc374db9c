//! Optimization passes over a translated job graph.
//!
//! Each pass mutates the graph in place and must be idempotent. The order in
//! `PassManager::for_config` is fixed: later passes rely on what earlier ones
//! established (package annotation reads the combine plan, key-type discovery
//! reads the join packages written by last-input streaming).

mod combiner;
mod key_type;
mod last_input;
mod package;
mod stream;

pub use combiner::CombinerPass;
pub use key_type::KeyTypeDiscovery;
pub use last_input::LastInputStreamingPass;
pub use package::PackageAnnotator;
pub use stream::StreamDetector;

use tracing::debug;

use jobwave_core::config::RunConfig;
use jobwave_core::error::Result;

use crate::job_graph::JobGraph;

/// One rewrite of the job graph.
pub trait GraphPass {
    fn name(&self) -> &'static str;

    fn apply(&self, graph: &mut JobGraph) -> Result<()>;
}

#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn GraphPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, pass: impl GraphPass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// The standard pipeline. The combiner is left out entirely when disabled.
    pub fn for_config(config: &RunConfig) -> Self {
        let chunk_size = config.last_input_chunk_size;
        let mut pm = Self::new();
        if !config.disable_combiner {
            pm = pm.with(CombinerPass { chunk_size });
        }
        pm.with(PackageAnnotator)
            .with(StreamDetector)
            .with(LastInputStreamingPass { chunk_size })
            .with(KeyTypeDiscovery)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn run(&self, graph: &mut JobGraph) -> Result<()> {
        for pass in &self.passes {
            pass.apply(graph)?;
            debug!(pass = pass.name(), nodes = graph.len(), "applied pass");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_order() {
        let pm = PassManager::for_config(&RunConfig::default());
        assert_eq!(
            pm.names(),
            vec![
                "combiner",
                "package-annotation",
                "stream-detection",
                "last-input-streaming",
                "key-type-discovery"
            ]
        );
    }

    #[test]
    fn disabled_combiner_is_not_scheduled() {
        let cfg = RunConfig {
            disable_combiner: true,
            ..Default::default()
        };
        let names = PassManager::for_config(&cfg).names();
        assert!(!names.contains(&"combiner"));
        assert_eq!(names.len(), 4);
    }
}
