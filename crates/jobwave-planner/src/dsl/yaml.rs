//! YAML → PhysicalPlan parser.
//!
//! Example:
//! ```yaml
//! config:
//!   last_input_chunk_size: 500
//!   default_parallelism: 4
//! plan:
//!   - id: users
//!     op: load
//!     location: "data/users.csv"
//!     schema:
//!       - {name: "id",   type: "Int64", nullable: false}
//!       - {name: "city", type: "Utf8",  nullable: true}
//!   - id: by_city
//!     op: group
//!     input: users
//!     keys: ["city"]
//!   - id: counts
//!     op: aggregate
//!     input: by_city
//!     calls: [{function: count, alias: n}]
//!   - id: out
//!     op: store
//!     input: counts
//!     location: "out/city_counts"
//! ```
//!
//! Steps may only read steps declared above them.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use jobwave_core::config::RunConfig;
use jobwave_core::id::OpId;
use jobwave_core::plan::{AggregateCall, JoinType, OpKind, PhysicalPlan};
use jobwave_core::schema::{DataType, Field, Schema};

use super::DslError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDocument {
    #[serde(default)]
    pub config: Option<PlanConfig>,
    pub plan: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(flatten)]
    pub op: StepOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StepOp {
    Load {
        location: String,
        #[serde(default)]
        schema: Option<Vec<FieldDef>>,
    },
    Filter {
        predicate: String,
    },
    Project {
        columns: Vec<String>,
    },
    Stream {
        command: String,
        #[serde(default)]
        output_schema: Option<Vec<FieldDef>>,
    },
    Group {
        #[serde(default)]
        keys: Vec<String>,
    },
    #[serde(rename = "cogroup")]
    CoGroup {
        keys: Vec<Vec<String>>,
    },
    Join {
        keys: Vec<Vec<String>>,
        #[serde(default = "default_join_type")]
        join_type: JoinType,
    },
    Aggregate {
        calls: Vec<AggregateCall>,
    },
    Distinct,
    Limit {
        n: u64,
    },
    Store {
        location: String,
        #[serde(default = "default_format")]
        format: String,
    },
}

fn default_join_type() -> JoinType {
    JoinType::Inner
}

fn default_format() -> String {
    "csv".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
}

fn parse_dtype(s: &str) -> DataType {
    match s {
        "Boolean" | "bool" => DataType::Boolean,
        "Int32" | "i32" => DataType::Int32,
        "Int64" | "i64" => DataType::Int64,
        "Float32" | "f32" => DataType::Float32,
        "Float64" | "f64" => DataType::Float64,
        "Binary" | "bytes" => DataType::Binary,
        _ => DataType::Utf8,
    }
}

fn to_schema(fields: &[FieldDef]) -> Schema {
    Schema::new(
        fields
            .iter()
            .map(|f| Field::new(f.name.clone(), parse_dtype(&f.data_type), f.nullable))
            .collect(),
    )
}

/// Optional run settings carried by the plan document. Unset fields keep
/// whatever the caller's `RunConfig` already holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub last_input_chunk_size: Option<usize>,
    pub disable_combiner: Option<bool>,
    pub poll_interval_ms: Option<u64>,
    pub temp_dir: Option<String>,
    pub default_parallelism: Option<u32>,
    pub properties: BTreeMap<String, String>,
}

impl PlanConfig {
    pub fn apply(&self, cfg: &mut RunConfig) {
        if let Some(v) = self.last_input_chunk_size {
            cfg.last_input_chunk_size = v;
        }
        if let Some(v) = self.disable_combiner {
            cfg.disable_combiner = v;
        }
        if let Some(v) = self.poll_interval_ms {
            cfg.poll_interval_ms = v;
        }
        if let Some(v) = &self.temp_dir {
            cfg.temp_dir = v.clone();
        }
        if let Some(v) = self.default_parallelism {
            cfg.cluster.default_parallelism = v;
        }
        cfg.properties
            .extend(self.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

#[derive(Debug, Clone)]
pub struct ParsedPlan {
    pub plan: PhysicalPlan,
    pub config: PlanConfig,
}

/// Parse a YAML plan document and check it is structurally valid.
pub fn parse_yaml_plan(yaml_src: &str) -> Result<ParsedPlan, DslError> {
    let doc: PlanDocument = serde_yaml::from_str(yaml_src)?;
    if doc.plan.is_empty() {
        return Err(DslError::Empty);
    }

    let mut plan = PhysicalPlan::new();
    let mut ids: HashMap<String, OpId> = HashMap::new();

    for step in doc.plan {
        if ids.contains_key(&step.id) {
            return Err(DslError::DuplicateStep(step.id));
        }

        let names: Vec<&String> = step.input.iter().chain(step.inputs.iter()).collect();
        let mut inputs = Vec::with_capacity(names.len());
        for name in names {
            let id = ids.get(name).copied().ok_or_else(|| DslError::UnknownInput {
                step: step.id.clone(),
                input: name.clone(),
            })?;
            inputs.push(id);
        }

        let kind = match step.op {
            StepOp::Load { location, schema } => OpKind::Load {
                location,
                schema: schema.as_deref().map(to_schema),
            },
            StepOp::Filter { predicate } => OpKind::Filter { predicate },
            StepOp::Project { columns } => OpKind::Project { columns },
            StepOp::Stream {
                command,
                output_schema,
            } => OpKind::Stream {
                command,
                output_schema: output_schema.as_deref().map(to_schema),
            },
            StepOp::Group { keys } => OpKind::Group { keys },
            StepOp::CoGroup { keys } => OpKind::CoGroup { keys },
            StepOp::Join { keys, join_type } => OpKind::Join { keys, join_type },
            StepOp::Aggregate { calls } => OpKind::Aggregate { calls },
            StepOp::Distinct => OpKind::Distinct,
            StepOp::Limit { n } => OpKind::Limit { n },
            StepOp::Store { location, format } => OpKind::Store { location, format },
        };

        let id = plan.add(kind, inputs);
        ids.insert(step.id, id);
    }

    plan.validate()?;
    Ok(ParsedPlan {
        plan,
        config: doc.config.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORDS: &str = r#"
config:
  last_input_chunk_size: 64
  disable_combiner: true
plan:
  - id: src
    op: load
    location: "in/words"
    schema:
      - {name: "word", type: "Utf8"}
  - id: g
    op: group
    input: src
    keys: ["word"]
  - id: c
    op: aggregate
    input: g
    calls: [{function: count, alias: n}]
  - id: out
    op: store
    input: c
    location: "out/counts"
"#;

    #[test]
    fn parses_steps_and_config() {
        let parsed = parse_yaml_plan(WORDS).unwrap();
        assert_eq!(parsed.plan.len(), 4);
        assert_eq!(parsed.config.last_input_chunk_size, Some(64));

        let mut cfg = RunConfig::default();
        parsed.config.apply(&mut cfg);
        assert!(cfg.disable_combiner);
        assert_eq!(cfg.last_input_chunk_size, 64);
        assert_eq!(cfg.poll_interval_ms, 500);
    }

    #[test]
    fn forward_references_are_rejected() {
        let src = r#"
plan:
  - id: out
    op: store
    input: src
    location: "out"
  - id: src
    op: load
    location: "in"
"#;
        let err = parse_yaml_plan(src).unwrap_err();
        assert!(matches!(err, DslError::UnknownInput { .. }));
    }

    #[test]
    fn join_defaults_to_inner() {
        let src = r#"
plan:
  - {id: a, op: load, location: "a"}
  - {id: b, op: load, location: "b"}
  - {id: j, op: join, inputs: [a, b], keys: [["k"], ["k"]]}
  - {id: out, op: store, input: j, location: "out"}
"#;
        let parsed = parse_yaml_plan(src).unwrap();
        assert!(matches!(
            parsed.plan.ops()[2].kind,
            OpKind::Join {
                join_type: JoinType::Inner,
                ..
            }
        ));
    }

    #[test]
    fn dangling_step_fails_validation() {
        let src = r#"
plan:
  - {id: a, op: load, location: "a"}
"#;
        assert!(matches!(
            parse_yaml_plan(src).unwrap_err(),
            DslError::Invalid(_)
        ));
    }
}
