//! Convenient re-exports for downstream crates.

pub use crate::config::{ClusterConfig, ConfigSnapshot, RunConfig};
pub use crate::error::{Error, Result};
pub use crate::id::{JobId, NodeId, OpId};
pub use crate::plan::{AggregateCall, AggregateFunction, JoinType, OpKind, PhysicalPlan};
pub use crate::schema::{DataType, Field, Schema};
