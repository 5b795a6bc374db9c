//! Package annotation: tell every package how its inputs were keyed.
//!
//! A package is fed by the rearranges directly upstream of the shuffle: the
//! combine plan's rearrange when the node has a combiner, otherwise the last
//! rearrange of each map branch. Each input index must be fed exactly once.

use jobwave_core::error::{Error, Result};
use jobwave_core::id::NodeId;

use crate::job_graph::{
    JobGraph, KeyInfo, LocalOp, MapReduceNode, PackageAnnotation, PackageKind, ValueLayout,
};
use crate::passes::GraphPass;

const NAME: &str = "package-annotation";

pub struct PackageAnnotator;

impl GraphPass for PackageAnnotator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, graph: &mut JobGraph) -> Result<()> {
        for node in graph.nodes_mut() {
            annotate_node(node)?;
        }
        Ok(())
    }
}

fn annotate_node(node: &mut MapReduceNode) -> Result<()> {
    let map_feeds: Vec<(usize, Vec<String>)> = node
        .map
        .iter()
        .filter_map(|b| rearrange_of(b.ops.iter().rev()))
        .collect();

    let reduce_feeds = match &mut node.combine {
        Some(combine) => {
            for op in &mut combine.ops {
                annotate_op(node.id, op, &map_feeds)?;
            }
            combine
                .ops
                .iter()
                .rev()
                .find_map(|op| match op {
                    LocalOp::LocalRearrange { index, keys } => Some(vec![(*index, keys.clone())]),
                    _ => None,
                })
                .ok_or_else(|| {
                    Error::optimization(
                        NAME,
                        format!("{}: combine plan has no rearrange", node.id),
                    )
                })?
        }
        None => map_feeds,
    };

    for op in &mut node.reduce {
        annotate_op(node.id, op, &reduce_feeds)?;
    }
    Ok(())
}

fn rearrange_of<'a>(mut ops: impl Iterator<Item = &'a LocalOp>) -> Option<(usize, Vec<String>)> {
    ops.find_map(|op| match op {
        LocalOp::LocalRearrange { index, keys } => Some((*index, keys.clone())),
        _ => None,
    })
}

fn annotate_op(node: NodeId, op: &mut LocalOp, feeds: &[(usize, Vec<String>)]) -> Result<()> {
    match op {
        LocalOp::Package {
            kind,
            inputs,
            annotation,
        } => {
            *annotation = Some(build(node, *kind, *inputs, feeds)?);
        }
        LocalOp::JoinPackage {
            inputs,
            join_type,
            annotation,
            ..
        } => {
            *annotation = Some(build(node, PackageKind::Join(*join_type), *inputs, feeds)?);
        }
        _ => {}
    }
    Ok(())
}

fn build(
    node: NodeId,
    kind: PackageKind,
    inputs: usize,
    feeds: &[(usize, Vec<String>)],
) -> Result<PackageAnnotation> {
    let mut slots: Vec<Option<KeyInfo>> = vec![None; inputs];
    for (index, keys) in feeds {
        let slot = slots.get_mut(*index).ok_or_else(|| {
            Error::optimization(
                NAME,
                format!("{node}: rearrange index {index} exceeds {inputs} package inputs"),
            )
        })?;
        if slot.is_some() {
            return Err(Error::optimization(
                NAME,
                format!("{node}: package input {index} is fed twice"),
            ));
        }
        *slot = Some(KeyInfo {
            index: *index,
            keys: keys.clone(),
            strip_key_from_value: !keys.is_empty() && kind != PackageKind::Distinct,
        });
    }

    let infos = slots
        .into_iter()
        .enumerate()
        .map(|(index, info)| {
            info.ok_or_else(|| {
                Error::optimization(NAME, format!("{node}: package input {index} is never fed"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let layout = if infos.iter().all(|k| k.strip_key_from_value) {
        ValueLayout::KeyStripped
    } else {
        ValueLayout::Full
    };
    Ok(PackageAnnotation {
        inputs: infos,
        layout,
    })
}
