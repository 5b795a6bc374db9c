//! The physical operator plan handed over by the upstream planner.
//!
//! This is the compiler's *input*: a DAG of dataflow operators stored as an
//! arena indexed by `OpId`. It says nothing about jobs or phases; cutting it
//! into map/combine/reduce stages is the planner crate's business.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::OpId;
use crate::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    CountDistinct,
    Collect,
}

impl AggregateFunction {
    /// Algebraic functions can be split into initial/intermediate/final steps,
    /// which is what makes a combine phase legal.
    pub fn is_algebraic(self) -> bool {
        matches!(
            self,
            AggregateFunction::Count
                | AggregateFunction::Sum
                | AggregateFunction::Avg
                | AggregateFunction::Min
                | AggregateFunction::Max
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::CountDistinct => "COUNT_DISTINCT",
            AggregateFunction::Collect => "COLLECT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCall {
    pub function: AggregateFunction,
    /// `None` means `*` (only meaningful for COUNT).
    #[serde(default)]
    pub column: Option<String>,
    pub alias: String,
}

impl AggregateCall {
    pub fn new(function: AggregateFunction, column: Option<&str>, alias: &str) -> Self {
        Self {
            function,
            column: column.map(str::to_string),
            alias: alias.to_string(),
        }
    }
}

impl fmt::Display for AggregateCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) AS {}",
            self.function.name(),
            self.column.as_deref().unwrap_or("*"),
            self.alias
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpKind {
    Load {
        location: String,
        #[serde(default)]
        schema: Option<Schema>,
    },
    Filter {
        predicate: String,
    },
    Project {
        columns: Vec<String>,
    },
    /// Pipe records through a user-supplied external process.
    Stream {
        command: String,
        #[serde(default)]
        output_schema: Option<Schema>,
    },
    /// Group a single input by `keys`; empty keys group everything together.
    Group {
        keys: Vec<String>,
    },
    /// Group several inputs by per-input keys, one bag per input.
    CoGroup {
        keys: Vec<Vec<String>>,
    },
    /// Equi-join on per-input keys.
    Join {
        keys: Vec<Vec<String>>,
        join_type: JoinType,
    },
    /// Per-group aggregation; must directly follow a `Group`.
    Aggregate {
        calls: Vec<AggregateCall>,
    },
    Distinct,
    Limit {
        n: u64,
    },
    Store {
        location: String,
        format: String,
    },
}

enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Load { .. } => "load",
            OpKind::Filter { .. } => "filter",
            OpKind::Project { .. } => "project",
            OpKind::Stream { .. } => "stream",
            OpKind::Group { .. } => "group",
            OpKind::CoGroup { .. } => "cogroup",
            OpKind::Join { .. } => "join",
            OpKind::Aggregate { .. } => "aggregate",
            OpKind::Distinct => "distinct",
            OpKind::Limit { .. } => "limit",
            OpKind::Store { .. } => "store",
        }
    }

    fn arity(&self) -> Arity {
        match self {
            OpKind::Load { .. } => Arity::Exactly(0),
            OpKind::CoGroup { .. } | OpKind::Join { .. } => Arity::AtLeast(2),
            _ => Arity::Exactly(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalOp {
    pub id: OpId,
    pub kind: OpKind,
    pub inputs: Vec<OpId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalPlan {
    ops: Vec<PhysicalOp>,
}

impl PhysicalPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operator; ids are dense and assigned in insertion order.
    pub fn add(&mut self, kind: OpKind, inputs: impl Into<Vec<OpId>>) -> OpId {
        let id = OpId::new(self.ops.len() as u64);
        self.ops.push(PhysicalOp {
            id,
            kind,
            inputs: inputs.into(),
        });
        id
    }

    pub fn op(&self, id: OpId) -> Option<&PhysicalOp> {
        self.ops.get(id.index()).filter(|op| op.id == id)
    }

    pub fn ops(&self) -> &[PhysicalOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// One entry per consuming edge, so a self-join lists its input twice.
    pub fn consumers(&self, id: OpId) -> Vec<OpId> {
        self.ops
            .iter()
            .flat_map(|op| op.inputs.iter().filter(|i| **i == id).map(|_| op.id))
            .collect()
    }

    /// Structural checks the compiler relies on.
    pub fn validate(&self) -> Result<()> {
        if self.ops.is_empty() {
            return Err(Error::PlanCompilation("plan has no operators".into()));
        }

        for (idx, op) in self.ops.iter().enumerate() {
            if op.id.index() != idx {
                return Err(Error::PlanCompilation(format!(
                    "operator at position {idx} carries id {}",
                    op.id
                )));
            }
            for input in &op.inputs {
                if self.op(*input).is_none() {
                    return Err(Error::PlanCompilation(format!(
                        "{} ({}) reads unknown operator {input}",
                        op.id,
                        op.kind.name()
                    )));
                }
            }
            let arity_ok = match op.kind.arity() {
                Arity::Exactly(n) => op.inputs.len() == n,
                Arity::AtLeast(n) => op.inputs.len() >= n,
            };
            if !arity_ok {
                return Err(Error::PlanCompilation(format!(
                    "{} ({}) has unsupported input count {}",
                    op.id,
                    op.kind.name(),
                    op.inputs.len()
                )));
            }
            match &op.kind {
                OpKind::CoGroup { keys } | OpKind::Join { keys, .. } => {
                    if keys.len() != op.inputs.len() {
                        return Err(Error::PlanCompilation(format!(
                            "{} ({}) has {} key lists for {} inputs",
                            op.id,
                            op.kind.name(),
                            keys.len(),
                            op.inputs.len()
                        )));
                    }
                    if keys.iter().any(Vec::is_empty) {
                        return Err(Error::PlanCompilation(format!(
                            "{} ({}) has an input without keys",
                            op.id,
                            op.kind.name()
                        )));
                    }
                    let width = keys[0].len();
                    if keys.iter().any(|k| k.len() != width) {
                        return Err(Error::PlanCompilation(format!(
                            "{} ({}) key lists differ in width",
                            op.id,
                            op.kind.name()
                        )));
                    }
                }
                OpKind::Aggregate { calls } if calls.is_empty() => {
                    return Err(Error::PlanCompilation(format!(
                        "{} (aggregate) has no calls",
                        op.id
                    )));
                }
                _ => {}
            }

            let consumers = self.consumers(op.id);
            match (&op.kind, consumers.is_empty()) {
                (OpKind::Store { .. }, false) => {
                    return Err(Error::PlanCompilation(format!(
                        "{} (store) is read by {}",
                        op.id, consumers[0]
                    )));
                }
                (OpKind::Store { .. }, true) => {}
                (_, true) => {
                    return Err(Error::PlanCompilation(format!(
                        "{} ({}) feeds no store",
                        op.id,
                        op.kind.name()
                    )));
                }
                _ => {}
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Kahn's algorithm, always taking the smallest ready id for determinism.
    pub fn topological_order(&self) -> Result<Vec<OpId>> {
        let mut pending: Vec<usize> = self.ops.iter().map(|op| op.inputs.len()).collect();
        let mut ready: BTreeSet<OpId> = self
            .ops
            .iter()
            .filter(|op| op.inputs.is_empty())
            .map(|op| op.id)
            .collect();
        let mut order = Vec::with_capacity(self.ops.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for consumer in self.consumers(id) {
                let slot = &mut pending[consumer.index()];
                *slot -= 1;
                if *slot == 0 {
                    ready.insert(consumer);
                }
            }
        }

        if order.len() != self.ops.len() {
            return Err(Error::PlanCompilation(
                "plan contains a cycle".to_string(),
            ));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(plan: &mut PhysicalPlan, loc: &str) -> OpId {
        plan.add(
            OpKind::Load {
                location: loc.into(),
                schema: None,
            },
            vec![],
        )
    }

    fn store(plan: &mut PhysicalPlan, input: OpId) -> OpId {
        plan.add(
            OpKind::Store {
                location: "out".into(),
                format: "csv".into(),
            },
            vec![input],
        )
    }

    #[test]
    fn valid_linear_plan() {
        let mut plan = PhysicalPlan::new();
        let l = load(&mut plan, "in");
        let f = plan.add(
            OpKind::Filter {
                predicate: "x > 1".into(),
            },
            vec![l],
        );
        store(&mut plan, f);
        plan.validate().unwrap();
        assert_eq!(plan.topological_order().unwrap().len(), 3);
    }

    #[test]
    fn dangling_operator_is_rejected() {
        let mut plan = PhysicalPlan::new();
        let l = load(&mut plan, "in");
        plan.add(OpKind::Distinct, vec![l]);
        let err = plan.validate().unwrap_err();
        assert!(matches!(err, Error::PlanCompilation(_)));
    }

    #[test]
    fn join_arity_is_checked() {
        let mut plan = PhysicalPlan::new();
        let l = load(&mut plan, "in");
        let j = plan.add(
            OpKind::Join {
                keys: vec![vec!["k".into()]],
                join_type: JoinType::Inner,
            },
            vec![l],
        );
        store(&mut plan, j);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn self_join_counts_two_consumer_edges() {
        let mut plan = PhysicalPlan::new();
        let l = load(&mut plan, "in");
        let j = plan.add(
            OpKind::Join {
                keys: vec![vec!["k".into()], vec!["k".into()]],
                join_type: JoinType::Inner,
            },
            vec![l, l],
        );
        store(&mut plan, j);
        plan.validate().unwrap();
        assert_eq!(plan.consumers(l).len(), 2);
    }

    #[test]
    fn cycles_are_detected() {
        let mut plan = PhysicalPlan::new();
        plan.add(
            OpKind::Filter {
                predicate: "a".into(),
            },
            vec![OpId::new(1)],
        );
        plan.add(
            OpKind::Filter {
                predicate: "b".into(),
            },
            vec![OpId::new(0)],
        );
        assert!(plan.topological_order().is_err());
    }
}
