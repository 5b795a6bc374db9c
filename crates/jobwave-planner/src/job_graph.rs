//! The job graph: one `MapReduceNode` per cluster job, edges for data
//! dependencies between them.
//!
//! Nodes are mutated in place by the optimization passes and are read-only
//! once compilation returns. Node ids are dense and follow creation order, so
//! a producer always has a smaller id than its consumers.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use jobwave_core::error::{Error, Result};
use jobwave_core::id::NodeId;
use jobwave_core::plan::{AggregateCall, JoinType};
use jobwave_core::schema::{DataType, Schema};

/// Where a map branch reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    File {
        location: String,
        schema: Option<Schema>,
    },
    /// Temporary output of an upstream node.
    Temp { node: NodeId, location: String },
}

impl DataSource {
    pub fn location(&self) -> &str {
        match self {
            DataSource::File { location, .. } | DataSource::Temp { location, .. } => location,
        }
    }
}

/// Which step of a split aggregation an `Aggregate` performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggPhase {
    /// Whole aggregation in one place (no combiner).
    Full,
    /// Map side: turn each record into a partial.
    Initial,
    /// Combine side: merge partials.
    Intermediate,
    /// Reduce side: merge partials and finish.
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageKind {
    Group,
    CoGroup,
    Join(JoinType),
    Distinct,
}

/// How a package lays out the values it hands downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueLayout {
    /// Values keep every field, key included.
    Full,
    /// Key fields are dropped from values and re-attached from the key.
    KeyStripped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub index: usize,
    pub keys: Vec<String>,
    pub strip_key_from_value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageAnnotation {
    pub inputs: Vec<KeyInfo>,
    pub layout: ValueLayout,
}

/// Per-record operators inside one phase of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalOp {
    Filter {
        predicate: String,
    },
    Project {
        columns: Vec<String>,
    },
    Stream {
        command: String,
        output_schema: Option<Schema>,
    },
    Limit {
        n: u64,
    },
    /// Map-side shuffle emitter: (key, input index, value).
    LocalRearrange {
        index: usize,
        keys: Vec<String>,
    },
    /// Reduce-side regrouping of shuffled values.
    Package {
        kind: PackageKind,
        inputs: usize,
        annotation: Option<PackageAnnotation>,
    },
    /// Cross product of the per-input bags of a join package.
    JoinFlatten {
        inputs: usize,
    },
    /// Join package that materializes all but `streamed_input`, which is
    /// consumed in chunks of `chunk_size` records.
    JoinPackage {
        inputs: usize,
        join_type: JoinType,
        chunk_size: usize,
        streamed_input: usize,
        annotation: Option<PackageAnnotation>,
    },
    Aggregate {
        keys: Vec<String>,
        calls: Vec<AggregateCall>,
        phase: AggPhase,
    },
}

impl LocalOp {
    pub fn is_stream(&self) -> bool {
        matches!(self, LocalOp::Stream { .. })
    }
}

fn fmt_keys(keys: &[String]) -> String {
    if keys.is_empty() {
        "all".to_string()
    } else {
        keys.join(",")
    }
}

impl fmt::Display for LocalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalOp::Filter { predicate } => write!(f, "Filter[{predicate}]"),
            LocalOp::Project { columns } => write!(f, "Project[{}]", columns.join(",")),
            LocalOp::Stream { command, .. } => write!(f, "Stream[{command}]"),
            LocalOp::Limit { n } => write!(f, "Limit[{n}]"),
            LocalOp::LocalRearrange { index, keys } => {
                write!(f, "LocalRearrange[{index}] keys=({})", fmt_keys(keys))
            }
            LocalOp::Package { kind, inputs, .. } => {
                write!(f, "Package[{kind:?}] inputs={inputs}")
            }
            LocalOp::JoinFlatten { inputs } => write!(f, "JoinFlatten inputs={inputs}"),
            LocalOp::JoinPackage {
                inputs,
                join_type,
                chunk_size,
                streamed_input,
                ..
            } => write!(
                f,
                "JoinPackage[{join_type:?}] inputs={inputs} streamed={streamed_input} chunk={chunk_size}"
            ),
            LocalOp::Aggregate { keys, calls, phase } => {
                let calls: Vec<String> = calls.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "Aggregate[{phase:?}] keys=({}) {}",
                    fmt_keys(keys),
                    calls.join(", ")
                )
            }
        }
    }
}

/// One input of a node together with its map-side pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapBranch {
    pub source: DataSource,
    pub ops: Vec<LocalOp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinePlan {
    pub ops: Vec<LocalOp>,
    /// Records buffered per key before the combiner flushes.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeOutput {
    /// User-visible store.
    Final { location: String, format: String },
    /// Intermediate result read back by downstream nodes.
    Temporary { location: String },
}

impl NodeOutput {
    pub fn location(&self) -> &str {
        match self {
            NodeOutput::Final { location, .. } | NodeOutput::Temporary { location } => location,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, NodeOutput::Temporary { .. })
    }
}

/// Runtime type of a shuffle key, used to build typed null-key placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Tuple,
    /// Untyped fallback when the type is unknown or inputs disagree.
    Bytes,
}

impl From<DataType> for KeyType {
    fn from(dt: DataType) -> Self {
        match dt {
            DataType::Boolean => KeyType::Boolean,
            DataType::Int32 => KeyType::Int32,
            DataType::Int64 => KeyType::Int64,
            DataType::Float32 => KeyType::Float32,
            DataType::Float64 => KeyType::Float64,
            DataType::Utf8 => KeyType::Utf8,
            DataType::Binary => KeyType::Bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMarker {
    pub map: bool,
    pub combine: bool,
    pub reduce: bool,
}

impl StreamMarker {
    pub fn any(&self) -> bool {
        self.map || self.combine || self.reduce
    }
}

/// Facts the optimization passes attach to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAnnotations {
    pub stream: StreamMarker,
    pub key_type: Option<KeyType>,
    /// Schema of what the node writes, when it could be derived.
    pub output_schema: Option<Schema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapReduceNode {
    pub id: NodeId,
    pub map: Vec<MapBranch>,
    pub combine: Option<CombinePlan>,
    /// Empty for map-only nodes.
    pub reduce: Vec<LocalOp>,
    pub output: NodeOutput,
    /// Reduce parallelism; `None` for map-only nodes.
    pub parallelism: Option<u32>,
    pub annotations: NodeAnnotations,
}

impl MapReduceNode {
    pub fn is_map_only(&self) -> bool {
        self.reduce.is_empty()
    }

    pub fn has_combiner(&self) -> bool {
        self.combine.is_some()
    }

    /// Upstream nodes this node reads temporary output from.
    pub fn temp_inputs(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.map.iter().filter_map(|b| match &b.source {
            DataSource::Temp { node, .. } => Some(*node),
            DataSource::File { .. } => None,
        })
    }

    /// Every local op of every phase, map branches first.
    pub fn all_ops(&self) -> impl Iterator<Item = &LocalOp> + '_ {
        self.map
            .iter()
            .flat_map(|b| b.ops.iter())
            .chain(self.combine.iter().flat_map(|c| c.ops.iter()))
            .chain(self.reduce.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobGraph {
    /// Stable per-plan scope, also used in temporary paths.
    pub scope: String,
    nodes: Vec<MapReduceNode>,
    edges: BTreeSet<(NodeId, NodeId)>,
}

impl JobGraph {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            nodes: Vec::new(),
            edges: BTreeSet::new(),
        }
    }

    /// Build from nodes whose ids equal their positions; edges are derived
    /// from temporary sources.
    pub fn from_nodes(scope: impl Into<String>, nodes: Vec<MapReduceNode>) -> Result<Self> {
        let mut graph = Self::new(scope);
        for (idx, node) in nodes.iter().enumerate() {
            if node.id.index() != idx {
                return Err(Error::Invariant(format!(
                    "node at position {idx} carries id {}",
                    node.id
                )));
            }
        }
        for node in &nodes {
            for upstream in node.temp_inputs() {
                graph.edges.insert((upstream, node.id));
            }
        }
        graph.nodes = nodes;
        graph.validate()?;
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&MapReduceNode> {
        self.nodes.get(id.index())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut MapReduceNode> {
        self.nodes.get_mut(id.index())
    }

    pub fn nodes(&self) -> &[MapReduceNode] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut MapReduceNode> + '_ {
        self.nodes.iter_mut()
    }

    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.edges.iter().copied()
    }

    pub fn predecessors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges
            .iter()
            .filter(move |(_, to)| *to == id)
            .map(|(from, _)| *from)
    }

    pub fn successors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges
            .iter()
            .filter(move |(from, _)| *from == id)
            .map(|(_, to)| *to)
    }

    /// Deterministic topological order (smallest ready id first).
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut pending: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| self.predecessors(n.id).count())
            .collect();
        let mut ready: BTreeSet<NodeId> = self
            .nodes
            .iter()
            .filter(|n| pending[n.id.index()] == 0)
            .map(|n| n.id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for next in self.successors(id) {
                let slot = &mut pending[next.index()];
                *slot -= 1;
                if *slot == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(Error::Invariant("job graph contains a cycle".into()));
        }
        Ok(order)
    }

    /// Edges reference existing nodes and the graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        for (from, to) in &self.edges {
            if self.node(*from).is_none() || self.node(*to).is_none() {
                return Err(Error::Invariant(format!(
                    "edge {from} -> {to} references a missing node"
                )));
            }
        }
        self.topological_order().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, sources: Vec<DataSource>) -> MapReduceNode {
        MapReduceNode {
            id: NodeId::new(id),
            map: sources
                .into_iter()
                .map(|source| MapBranch {
                    source,
                    ops: vec![],
                })
                .collect(),
            combine: None,
            reduce: vec![],
            output: NodeOutput::Temporary {
                location: format!("tmp/{id}"),
            },
            parallelism: None,
            annotations: NodeAnnotations::default(),
        }
    }

    fn file(loc: &str) -> DataSource {
        DataSource::File {
            location: loc.into(),
            schema: None,
        }
    }

    fn temp(id: u64) -> DataSource {
        DataSource::Temp {
            node: NodeId::new(id),
            location: format!("tmp/{id}"),
        }
    }

    #[test]
    fn edges_follow_temp_sources() {
        let g = JobGraph::from_nodes(
            "s",
            vec![
                node(0, vec![file("a")]),
                node(1, vec![file("b")]),
                node(2, vec![temp(0), temp(1)]),
            ],
        )
        .unwrap();
        assert_eq!(g.len(), 3);
        let preds: Vec<_> = g.predecessors(NodeId::new(2)).collect();
        assert_eq!(preds, vec![NodeId::new(0), NodeId::new(1)]);
        assert_eq!(
            g.topological_order().unwrap(),
            vec![NodeId::new(0), NodeId::new(1), NodeId::new(2)]
        );
    }

    #[test]
    fn misnumbered_nodes_are_rejected() {
        let err = JobGraph::from_nodes("s", vec![node(1, vec![file("a")])]).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }

    #[test]
    fn local_op_display_is_compact() {
        let op = LocalOp::LocalRearrange {
            index: 1,
            keys: vec![],
        };
        assert_eq!(op.to_string(), "LocalRearrange[1] keys=(all)");
    }
}
