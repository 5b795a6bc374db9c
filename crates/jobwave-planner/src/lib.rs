#![forbid(unsafe_code)]
//! jobwave-planner: physical plan → job graph of map/combine/reduce nodes,
//! the optimization passes that rewrite it, and the explainer.
//!
//! Design:
//! - `compiler` cuts the operator DAG at shuffle boundaries and splits,
//!   producing one `MapReduceNode` per cluster job.
//! - `passes` run in a fixed order over the graph, in place.
//! - `explain` renders the result as text or DOT.
//! - `dsl` reads plans from YAML documents.

pub mod compiler;
pub mod dsl;
pub mod explain;
pub mod job_graph;
pub mod passes;

pub use compiler::{compile, temp_location, translate};
pub use dsl::{parse_yaml_plan, DslError, ParsedPlan, PlanConfig};
pub use explain::{explain, ExplainFormat};
pub use job_graph::{JobGraph, MapReduceNode, NodeOutput};
pub use passes::{GraphPass, PassManager};
