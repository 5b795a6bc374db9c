//! Plan documents.

pub mod yaml;

use thiserror::Error;

pub use yaml::{parse_yaml_plan, ParsedPlan, PlanConfig};

#[derive(Debug, Error)]
pub enum DslError {
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("plan document has no steps")]
    Empty,

    #[error("step '{0}' is declared twice")]
    DuplicateStep(String),

    #[error("step '{step}' reads '{input}', which is not declared above it")]
    UnknownInput { step: String, input: String },

    #[error("invalid plan: {0}")]
    Invalid(#[from] jobwave_core::Error),
}
