//! Render a compiled job graph as a text listing or a DOT document.
//!
//! Both renderings are built into a `String` first and written in one go;
//! output depends only on the graph, so repeated calls are byte-identical.

use std::io::{self, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::job_graph::{CombinePlan, DataSource, JobGraph, LocalOp, MapReduceNode, NodeOutput};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplainFormat {
    #[default]
    Text,
    Dot,
}

impl FromStr for ExplainFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ExplainFormat::Text),
            "dot" => Ok(ExplainFormat::Dot),
            other => Err(format!("unknown explain format '{other}' (expected text or dot)")),
        }
    }
}

pub fn explain(
    graph: &JobGraph,
    sink: &mut dyn Write,
    format: ExplainFormat,
    verbose: bool,
) -> io::Result<()> {
    let doc = match format {
        ExplainFormat::Text => explain_text(graph, verbose),
        ExplainFormat::Dot => explain_dot(graph, verbose),
    };
    sink.write_all(doc.as_bytes())?;
    sink.flush()
}

pub fn explain_text(graph: &JobGraph, verbose: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Job graph {} ({} nodes)\n",
        graph.scope,
        graph.len()
    ));
    for node in graph.nodes() {
        fmt_node(node, graph, verbose, &mut out);
    }
    out
}

fn fmt_node(node: &MapReduceNode, graph: &JobGraph, verbose: bool, out: &mut String) {
    out.push_str(&format!("MapReduce {}\n", node.id));

    out.push_str("  Map Plan\n");
    for (i, branch) in node.map.iter().enumerate() {
        let source = match &branch.source {
            DataSource::File { location, .. } => format!("Load[{location}]"),
            DataSource::Temp { node, location } => format!("Load[{location}] from {node}"),
        };
        out.push_str(&format!("    branch {i}: {source}\n"));
        fmt_ops(&branch.ops, 6, out);
    }

    if let Some(CombinePlan { ops, chunk_size }) = &node.combine {
        out.push_str(&format!("  Combine Plan chunk={chunk_size}\n"));
        fmt_ops(ops, 4, out);
    }

    if !node.reduce.is_empty() {
        match node.parallelism {
            Some(p) => out.push_str(&format!("  Reduce Plan parallelism={p}\n")),
            None => out.push_str("  Reduce Plan\n"),
        }
        fmt_ops(&node.reduce, 4, out);
    }

    match &node.output {
        NodeOutput::Final { location, format } => {
            out.push_str(&format!("  Store[{location}] format={format}\n"))
        }
        NodeOutput::Temporary { location } => {
            out.push_str(&format!("  Store[{location}] temporary\n"))
        }
    }

    let deps: Vec<String> = graph.predecessors(node.id).map(|d| d.to_string()).collect();
    if !deps.is_empty() {
        out.push_str(&format!("  Depends on {}\n", deps.join(", ")));
    }

    if verbose {
        let ann = &node.annotations;
        if let Some(kt) = ann.key_type {
            out.push_str(&format!("  key type: {kt:?}\n"));
        }
        if ann.stream.any() {
            out.push_str(&format!(
                "  streaming: map={} combine={} reduce={}\n",
                ann.stream.map, ann.stream.combine, ann.stream.reduce
            ));
        }
        if let Some(schema) = &ann.output_schema {
            let fields: Vec<String> = schema
                .fields
                .iter()
                .map(|f| format!("{}:{:?}", f.name, f.data_type))
                .collect();
            out.push_str(&format!("  output schema: ({})\n", fields.join(", ")));
        }
        for op in node.all_ops() {
            if let LocalOp::Package {
                annotation: Some(a),
                ..
            }
            | LocalOp::JoinPackage {
                annotation: Some(a),
                ..
            } = op
            {
                out.push_str(&format!("  package layout: {:?}\n", a.layout));
            }
        }
    }
}

fn fmt_ops(ops: &[LocalOp], indent: usize, out: &mut String) {
    let pad = " ".repeat(indent);
    for op in ops {
        out.push_str(&format!("{pad}{op}\n"));
    }
}

pub fn explain_dot(graph: &JobGraph, verbose: bool) -> String {
    let mut out = String::new();
    out.push_str("#--------------------------------------------------\n");
    out.push_str("# Map Reduce Plan                                  \n");
    out.push_str("#--------------------------------------------------\n");
    out.push_str(&format!("digraph \"{}\" {{\n", graph.scope));
    out.push_str("  node [shape=box];\n");
    for node in graph.nodes() {
        out.push_str(&format!(
            "  n{} [label=\"{}\"];\n",
            node.id.get(),
            dot_label(node, verbose)
        ));
    }
    for (from, to) in graph.edges() {
        out.push_str(&format!("  n{} -> n{};\n", from.get(), to.get()));
    }
    out.push_str("}\n");
    out
}

fn dot_label(node: &MapReduceNode, verbose: bool) -> String {
    let mut parts = vec![node.id.to_string()];
    let phases = match (node.is_map_only(), node.has_combiner()) {
        (true, _) => "map",
        (false, false) => "map+reduce",
        (false, true) => "map+combine+reduce",
    };
    parts.push(phases.to_string());
    if verbose {
        parts.extend(node.all_ops().map(ToString::to_string));
    }
    parts.push(node.output.location().to_string());
    // Escape per line; the `\n` separators are DOT line breaks.
    let lines: Vec<String> = parts.iter().map(|p| escape(p)).collect();
    lines.join("\\n")
}

/// Backslashes first, so the quote escapes are not doubled.
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
