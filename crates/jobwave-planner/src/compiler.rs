//! Physical plan → job graph.
//!
//! Operators are visited in topological order. Each operator's output is
//! located on a draft node, in either its map phase, its reduce phase, or on
//! the node's (closed) output. A shuffle boundary on a node already past its
//! shuffle, or a split, closes the node to a temporary output that downstream
//! drafts read back.

use std::collections::HashMap;

use tracing::debug;

use jobwave_core::config::RunConfig;
use jobwave_core::error::{Error, Result};
use jobwave_core::hash::hash_serde;
use jobwave_core::id::{NodeId, OpId};
use jobwave_core::plan::{OpKind, PhysicalOp, PhysicalPlan};

use crate::job_graph::{
    AggPhase, DataSource, JobGraph, LocalOp, MapBranch, MapReduceNode, NodeAnnotations, NodeOutput,
    PackageKind,
};
use crate::passes::PassManager;

/// Compile and optimize: translate the plan, then run every pass in order.
pub fn compile(plan: &PhysicalPlan, config: &RunConfig) -> Result<JobGraph> {
    let mut graph = translate(plan, config)?;
    PassManager::for_config(config).run(&mut graph)?;
    Ok(graph)
}

/// Translate without optimizing.
pub fn translate(plan: &PhysicalPlan, config: &RunConfig) -> Result<JobGraph> {
    config.validate()?;
    plan.validate()?;
    let scope = hash_serde(plan)?.short_hex(12);
    let graph = Translator::new(plan, config, scope).run()?;
    debug!(scope = %graph.scope, nodes = graph.len(), "translated plan");
    Ok(graph)
}

/// Where temporary output of `node` lives for a given scope.
pub fn temp_location(config: &RunConfig, scope: &str, node: NodeId) -> String {
    format!(
        "{}/{}/tmp-{}",
        config.temp_dir.trim_end_matches('/'),
        scope,
        node.get()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Map,
    Reduce,
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct Located {
    slot: usize,
    phase: Phase,
}

enum DraftOutput {
    Final { location: String, format: String },
    Temporary,
}

struct Draft {
    map: Vec<MapBranch>,
    reduce: Vec<LocalOp>,
    output: Option<DraftOutput>,
    group_keys: Vec<String>,
}

struct Translator<'a> {
    plan: &'a PhysicalPlan,
    config: &'a RunConfig,
    scope: String,
    slots: Vec<Option<Draft>>,
    located: HashMap<OpId, Located>,
}

impl<'a> Translator<'a> {
    fn new(plan: &'a PhysicalPlan, config: &'a RunConfig, scope: String) -> Self {
        Self {
            plan,
            config,
            scope,
            slots: Vec::new(),
            located: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<JobGraph> {
        let plan = self.plan;
        for id in plan.topological_order()? {
            let op = plan
                .op(id)
                .ok_or_else(|| Error::Invariant(format!("{id} vanished from plan")))?;
            let mut loc = self.visit(op)?;
            let is_store = matches!(op.kind, OpKind::Store { .. });
            if !is_store && plan.consumers(id).len() > 1 {
                self.close(loc.slot)?;
                loc.phase = Phase::Closed;
            }
            self.located.insert(id, loc);
        }
        self.finish()
    }

    fn visit(&mut self, op: &PhysicalOp) -> Result<Located> {
        match &op.kind {
            OpKind::Load { location, schema } => {
                let slot = self.open(vec![MapBranch {
                    source: DataSource::File {
                        location: location.clone(),
                        schema: schema.clone(),
                    },
                    ops: vec![],
                }]);
                Ok(Located {
                    slot,
                    phase: Phase::Map,
                })
            }
            OpKind::Filter { predicate } => self.append(
                op,
                LocalOp::Filter {
                    predicate: predicate.clone(),
                },
            ),
            OpKind::Project { columns } => self.append(
                op,
                LocalOp::Project {
                    columns: columns.clone(),
                },
            ),
            OpKind::Stream {
                command,
                output_schema,
            } => self.append(
                op,
                LocalOp::Stream {
                    command: command.clone(),
                    output_schema: output_schema.clone(),
                },
            ),
            OpKind::Limit { n } => self.append(op, LocalOp::Limit { n: *n }),
            OpKind::Group { keys } => self.shuffle_single(op, keys.clone(), PackageKind::Group),
            OpKind::Distinct => self.shuffle_single(op, Vec::new(), PackageKind::Distinct),
            OpKind::CoGroup { keys } => self.shuffle_multi(op, keys, PackageKind::CoGroup),
            OpKind::Join { keys, join_type } => {
                let loc = self.shuffle_multi(op, keys, PackageKind::Join(*join_type))?;
                self.draft_mut(loc.slot)?.reduce.push(LocalOp::JoinFlatten {
                    inputs: op.inputs.len(),
                });
                Ok(loc)
            }
            OpKind::Aggregate { calls } => {
                let loc = self.input_location(op, 0)?;
                let draft = self.draft_mut(loc.slot)?;
                let follows_group = loc.phase == Phase::Reduce
                    && matches!(
                        draft.reduce.last(),
                        Some(LocalOp::Package {
                            kind: PackageKind::Group,
                            ..
                        })
                    );
                if !follows_group {
                    let input = op.inputs[0];
                    let shared_group = matches!(
                        self.plan.op(input).map(|o| &o.kind),
                        Some(OpKind::Group { .. })
                    ) && self.plan.consumers(input).len() > 1;
                    let reason = if shared_group {
                        format!(
                            "{} (aggregate) reads {input}, a group with more than one consumer; \
                             give each aggregate its own group",
                            op.id
                        )
                    } else {
                        format!("{} (aggregate) must directly follow a group", op.id)
                    };
                    return Err(Error::PlanCompilation(reason));
                }
                let keys = draft.group_keys.clone();
                draft.reduce.push(LocalOp::Aggregate {
                    keys,
                    calls: calls.clone(),
                    phase: AggPhase::Full,
                });
                Ok(loc)
            }
            OpKind::Store { location, format } => {
                let loc = self.writable(op, 0)?;
                let draft = self.draft_mut(loc.slot)?;
                draft.output = Some(DraftOutput::Final {
                    location: location.clone(),
                    format: format.clone(),
                });
                Ok(Located {
                    slot: loc.slot,
                    phase: Phase::Closed,
                })
            }
        }
    }

    fn open(&mut self, map: Vec<MapBranch>) -> usize {
        self.slots.push(Some(Draft {
            map,
            reduce: Vec::new(),
            output: None,
            group_keys: Vec::new(),
        }));
        self.slots.len() - 1
    }

    /// New draft reading the temporary output of `upstream`.
    fn reopen(&mut self, upstream: usize) -> Located {
        let slot = self.open(vec![MapBranch {
            source: placeholder_temp(upstream),
            ops: vec![],
        }]);
        Located {
            slot,
            phase: Phase::Map,
        }
    }

    fn close(&mut self, slot: usize) -> Result<()> {
        let draft = self.draft_mut(slot)?;
        if draft.output.is_none() {
            draft.output = Some(DraftOutput::Temporary);
        }
        Ok(())
    }

    fn draft_mut(&mut self, slot: usize) -> Result<&mut Draft> {
        self.slots
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::Invariant(format!("draft node {slot} is gone")))
    }

    fn input_location(&self, op: &PhysicalOp, pos: usize) -> Result<Located> {
        let input = op.inputs.get(pos).ok_or_else(|| {
            Error::PlanCompilation(format!("{} ({}) lacks input {pos}", op.id, op.kind.name()))
        })?;
        self.located.get(input).copied().ok_or_else(|| {
            Error::Invariant(format!("{input} visited after its consumer {}", op.id))
        })
    }

    /// Location an operator can append to, reading back closed output if needed.
    fn writable(&mut self, op: &PhysicalOp, pos: usize) -> Result<Located> {
        let loc = self.input_location(op, pos)?;
        if loc.phase == Phase::Closed {
            Ok(self.reopen(loc.slot))
        } else {
            Ok(loc)
        }
    }

    fn append(&mut self, op: &PhysicalOp, local: LocalOp) -> Result<Located> {
        let loc = self.writable(op, 0)?;
        let draft = self.draft_mut(loc.slot)?;
        match loc.phase {
            Phase::Map => draft
                .map
                .first_mut()
                .ok_or_else(|| Error::Invariant("map-phase draft without branch".into()))?
                .ops
                .push(local),
            Phase::Reduce => draft.reduce.push(local),
            Phase::Closed => {
                return Err(Error::Invariant(format!(
                    "{} appended to a closed node",
                    op.id
                )))
            }
        }
        Ok(loc)
    }

    fn shuffle_single(
        &mut self,
        op: &PhysicalOp,
        keys: Vec<String>,
        kind: PackageKind,
    ) -> Result<Located> {
        let mut loc = self.writable(op, 0)?;
        if loc.phase == Phase::Reduce {
            self.close(loc.slot)?;
            loc = self.reopen(loc.slot);
        }
        let draft = self.draft_mut(loc.slot)?;
        let branch = draft
            .map
            .first_mut()
            .ok_or_else(|| Error::Invariant("map-phase draft without branch".into()))?;
        branch.ops.push(LocalOp::LocalRearrange {
            index: 0,
            keys: keys.clone(),
        });
        draft.reduce.push(LocalOp::Package {
            kind,
            inputs: 1,
            annotation: None,
        });
        draft.group_keys = keys;
        Ok(Located {
            slot: loc.slot,
            phase: Phase::Reduce,
        })
    }

    /// Open a node fed by several inputs. Open map-phase inputs are merged in
    /// as branches; anything else is closed and read back.
    fn shuffle_multi(
        &mut self,
        op: &PhysicalOp,
        keys: &[Vec<String>],
        kind: PackageKind,
    ) -> Result<Located> {
        let mut branches = Vec::with_capacity(op.inputs.len());
        for (index, input) in op.inputs.iter().enumerate() {
            let loc = self.input_location(op, index)?;
            let exclusive = self.plan.consumers(*input).len() == 1;
            let mut branch = match loc.phase {
                Phase::Map if exclusive => {
                    let draft = self.slots[loc.slot].take().ok_or_else(|| {
                        Error::Invariant(format!("draft node {} merged twice", loc.slot))
                    })?;
                    draft.map.into_iter().next().ok_or_else(|| {
                        Error::Invariant("map-phase draft without branch".into())
                    })?
                }
                _ => {
                    self.close(loc.slot)?;
                    MapBranch {
                        source: placeholder_temp(loc.slot),
                        ops: vec![],
                    }
                }
            };
            branch.ops.push(LocalOp::LocalRearrange {
                index,
                keys: keys[index].clone(),
            });
            branches.push(branch);
        }

        let slot = self.open(branches);
        let draft = self.draft_mut(slot)?;
        draft.reduce.push(LocalOp::Package {
            kind,
            inputs: op.inputs.len(),
            annotation: None,
        });
        draft.group_keys = keys.first().cloned().unwrap_or_default();
        Ok(Located {
            slot,
            phase: Phase::Reduce,
        })
    }

    /// Renumber surviving drafts densely and resolve temporary locations.
    fn finish(self) -> Result<JobGraph> {
        let mut remap: HashMap<usize, NodeId> = HashMap::new();
        for (slot, draft) in self.slots.iter().enumerate() {
            if draft.is_some() {
                remap.insert(slot, NodeId::new(remap.len() as u64));
            }
        }

        let mut nodes = Vec::with_capacity(remap.len());
        for (slot, draft) in self.slots.into_iter().enumerate() {
            let Some(draft) = draft else { continue };
            let id = remap[&slot];
            let output = match draft.output {
                Some(DraftOutput::Final { location, format }) => {
                    NodeOutput::Final { location, format }
                }
                Some(DraftOutput::Temporary) => NodeOutput::Temporary {
                    location: temp_location(self.config, &self.scope, id),
                },
                None => {
                    return Err(Error::Invariant(format!(
                        "{id} was left without an output"
                    )))
                }
            };

            let mut map = draft.map;
            for branch in &mut map {
                if let DataSource::Temp { node, location } = &mut branch.source {
                    let upstream = remap.get(&node.index()).copied().ok_or_else(|| {
                        Error::Invariant(format!("{id} reads a merged-away node"))
                    })?;
                    *node = upstream;
                    *location = temp_location(self.config, &self.scope, upstream);
                }
            }

            let parallelism = if draft.reduce.is_empty() {
                None
            } else {
                Some(self.config.cluster.default_parallelism)
            };

            nodes.push(MapReduceNode {
                id,
                map,
                combine: None,
                reduce: draft.reduce,
                output,
                parallelism,
                annotations: NodeAnnotations::default(),
            });
        }

        JobGraph::from_nodes(self.scope, nodes)
    }
}

fn placeholder_temp(slot: usize) -> DataSource {
    DataSource::Temp {
        node: NodeId::new(slot as u64),
        location: String::new(),
    }
}
