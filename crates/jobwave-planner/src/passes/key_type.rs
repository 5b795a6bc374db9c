//! Key-type discovery.
//!
//! Schemas are pushed through every node in topological order: map branches
//! start from their load schema or from the producing node's output schema,
//! and each node records the schema it writes so downstream nodes can pick it
//! up. The shuffle key type of a node is then derived from the columns its
//! rearranges key on. Inputs that disagree fall back to `KeyType::Bytes`.

use tracing::warn;

use jobwave_core::error::{Error, Result};
use jobwave_core::plan::{AggregateCall, AggregateFunction};
use jobwave_core::schema::{DataType, Field, Schema};

use crate::job_graph::{
    AggPhase, DataSource, JobGraph, KeyType, LocalOp, MapBranch, PackageKind,
};
use crate::passes::GraphPass;

const NAME: &str = "key-type-discovery";

pub struct KeyTypeDiscovery;

impl GraphPass for KeyTypeDiscovery {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, graph: &mut JobGraph) -> Result<()> {
        let mut outputs: Vec<Option<Schema>> = vec![None; graph.len()];

        for id in graph.topological_order()? {
            let node = graph
                .node_mut(id)
                .ok_or_else(|| Error::Invariant(format!("{id} missing from job graph")))?;

            let branches: Vec<BranchFacts> = node
                .map
                .iter()
                .map(|b| branch_facts(b, &outputs))
                .collect();

            let package = node.reduce.iter().find_map(|op| match op {
                LocalOp::Package { kind, .. } => Some(*kind),
                LocalOp::JoinPackage { join_type, .. } => Some(PackageKind::Join(*join_type)),
                _ => None,
            });

            let candidates: Vec<KeyType> = branches
                .iter()
                .filter_map(|b| b.keys.as_ref().map(|keys| key_type(package, keys, &b.schema)))
                .collect();
            node.annotations.key_type = match candidates.split_first() {
                None => None,
                Some((first, rest)) if rest.iter().all(|k| k == first) => Some(*first),
                Some(_) => {
                    warn!(node = %id, ?candidates, "inputs disagree on key type, using bytes");
                    Some(KeyType::Bytes)
                }
            };

            let output = if node.reduce.is_empty() {
                branches.into_iter().next().and_then(|b| b.schema)
            } else {
                reduce_schema(&node.reduce, &branches)
            };
            node.annotations.output_schema = output.clone();
            outputs[id.index()] = output;
        }
        Ok(())
    }
}

struct BranchFacts {
    /// Value schema at the shuffle (before any partial aggregation).
    schema: Option<Schema>,
    /// Keys of the branch's rearrange; `None` when it does not shuffle.
    keys: Option<Vec<String>>,
}

fn branch_facts(branch: &MapBranch, outputs: &[Option<Schema>]) -> BranchFacts {
    let mut schema = match &branch.source {
        DataSource::File { schema, .. } => schema.clone(),
        DataSource::Temp { node, .. } => outputs.get(node.index()).cloned().flatten(),
    };
    let mut keys = None;
    for op in &branch.ops {
        match op {
            LocalOp::LocalRearrange { keys: k, .. } => keys = Some(k.clone()),
            other => schema = step(other, schema),
        }
    }
    BranchFacts { schema, keys }
}

/// Schema after a per-record operator. Partial aggregates leave it alone.
fn step(op: &LocalOp, schema: Option<Schema>) -> Option<Schema> {
    match op {
        LocalOp::Project { columns } => schema.and_then(|s| s.project(columns)),
        LocalOp::Stream { output_schema, .. } => output_schema.clone(),
        _ => schema,
    }
}

fn key_type(package: Option<PackageKind>, keys: &[String], schema: &Option<Schema>) -> KeyType {
    if package == Some(PackageKind::Distinct) {
        return KeyType::Tuple;
    }
    match keys {
        [] => KeyType::Utf8,
        [key] => schema
            .as_ref()
            .and_then(|s| s.field(key))
            .map(|f| KeyType::from(f.data_type))
            .unwrap_or(KeyType::Bytes),
        _ => KeyType::Tuple,
    }
}

fn reduce_schema(reduce: &[LocalOp], branches: &[BranchFacts]) -> Option<Schema> {
    let value = branches.first().and_then(|b| b.schema.clone());
    let mut schema: Option<Schema> = None;
    for op in reduce {
        schema = match op {
            LocalOp::Package { kind, inputs, .. } => match kind {
                PackageKind::Group | PackageKind::CoGroup => {
                    let keys = branches
                        .first()
                        .and_then(|b| b.keys.clone())
                        .unwrap_or_default();
                    grouped_schema(&keys, value.as_ref(), *inputs)
                }
                PackageKind::Distinct => value.clone(),
                PackageKind::Join(_) => None,
            },
            LocalOp::JoinFlatten { .. } | LocalOp::JoinPackage { .. } => branches
                .iter()
                .map(|b| b.schema.as_ref())
                .collect::<Option<Vec<_>>>()
                .map(Schema::concat),
            LocalOp::Aggregate { keys, calls, phase } => match phase {
                AggPhase::Full | AggPhase::Final => aggregate_schema(keys, calls, value.as_ref()),
                AggPhase::Initial | AggPhase::Intermediate => None,
            },
            other => step(other, schema),
        };
    }
    schema
}

fn grouped_schema(keys: &[String], value: Option<&Schema>, inputs: usize) -> Option<Schema> {
    let mut fields = if keys.is_empty() {
        vec![Field::new("group", DataType::Utf8, false)]
    } else {
        let value = value?;
        keys.iter()
            .map(|k| value.field(k).cloned())
            .collect::<Option<Vec<_>>>()?
    };
    fields.extend((0..inputs).map(|i| Field::new(format!("values_{i}"), DataType::Binary, true)));
    Some(Schema::new(fields))
}

fn aggregate_schema(keys: &[String], calls: &[AggregateCall], value: Option<&Schema>) -> Option<Schema> {
    let value = value?;
    let mut fields = keys
        .iter()
        .map(|k| value.field(k).cloned())
        .collect::<Option<Vec<_>>>()?;
    for call in calls {
        let column = call.column.as_deref().and_then(|c| value.field(c));
        let data_type = match call.function {
            AggregateFunction::Count | AggregateFunction::CountDistinct => DataType::Int64,
            AggregateFunction::Avg => DataType::Float64,
            AggregateFunction::Sum => match column.map(|f| f.data_type) {
                Some(dt) if dt.is_float() => DataType::Float64,
                _ => DataType::Int64,
            },
            AggregateFunction::Min | AggregateFunction::Max => column?.data_type,
            AggregateFunction::Collect => DataType::Binary,
        };
        fields.push(Field::new(call.alias.clone(), data_type, true));
    }
    Some(Schema::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::translate;
    use jobwave_core::config::RunConfig;
    use jobwave_core::plan::{JoinType, OpKind, PhysicalPlan};

    fn load(plan: &mut PhysicalPlan, loc: &str, key_type: DataType) -> jobwave_core::id::OpId {
        plan.add(
            OpKind::Load {
                location: loc.into(),
                schema: Some(Schema::new(vec![
                    Field::new("k", key_type, false),
                    Field::new("v", DataType::Float64, true),
                ])),
            },
            vec![],
        )
    }

    fn store(plan: &mut PhysicalPlan, input: jobwave_core::id::OpId) {
        plan.add(
            OpKind::Store {
                location: "out".into(),
                format: "csv".into(),
            },
            vec![input],
        );
    }

    fn join_of(left: DataType, right: DataType) -> JobGraph {
        let mut plan = PhysicalPlan::new();
        let a = load(&mut plan, "a", left);
        let b = load(&mut plan, "b", right);
        let j = plan.add(
            OpKind::Join {
                keys: vec![vec!["k".into()], vec!["k".into()]],
                join_type: JoinType::Inner,
            },
            vec![a, b],
        );
        store(&mut plan, j);
        translate(&plan, &RunConfig::default()).unwrap()
    }

    #[test]
    fn single_key_takes_column_type() {
        let mut g = join_of(DataType::Int64, DataType::Int64);
        KeyTypeDiscovery.apply(&mut g).unwrap();
        let ann = &g.nodes()[0].annotations;
        assert_eq!(ann.key_type, Some(KeyType::Int64));
        assert_eq!(ann.output_schema.as_ref().map(|s| s.fields.len()), Some(4));
    }

    #[test]
    fn disagreeing_inputs_fall_back_to_bytes() {
        let mut g = join_of(DataType::Int64, DataType::Utf8);
        KeyTypeDiscovery.apply(&mut g).unwrap();
        assert_eq!(g.nodes()[0].annotations.key_type, Some(KeyType::Bytes));
    }

    #[test]
    fn schema_flows_through_temporary_outputs() {
        let mut plan = PhysicalPlan::new();
        let l = load(&mut plan, "in", DataType::Utf8);
        let g1 = plan.add(
            OpKind::Group {
                keys: vec!["k".into()],
            },
            vec![l],
        );
        let a = plan.add(
            OpKind::Aggregate {
                calls: vec![AggregateCall::new(AggregateFunction::Count, None, "n")],
            },
            vec![g1],
        );
        let g2 = plan.add(
            OpKind::Group {
                keys: vec!["n".into()],
            },
            vec![a],
        );
        store(&mut plan, g2);

        let mut g = translate(&plan, &RunConfig::default()).unwrap();
        KeyTypeDiscovery.apply(&mut g).unwrap();
        assert_eq!(g.nodes()[0].annotations.key_type, Some(KeyType::Utf8));
        assert_eq!(g.nodes()[1].annotations.key_type, Some(KeyType::Int64));
    }

    #[test]
    fn unknown_schema_gives_bytes_and_group_all_gives_utf8() {
        assert_eq!(key_type(None, &["x".into()], &None), KeyType::Bytes);
        assert_eq!(key_type(Some(PackageKind::Group), &[], &None), KeyType::Utf8);
        assert_eq!(
            key_type(Some(PackageKind::Distinct), &[], &None),
            KeyType::Tuple
        );
    }
}
