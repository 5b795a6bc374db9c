use thiserror::Error;

/// Canonical result for core and the crates layered on it.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a launch before (or instead of) submitting work.
///
/// Job failures on the cluster are *not* represented here: they are ordinary
/// outcomes recorded by the launcher.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The input plan cannot be translated into a job graph.
    #[error("Plan compilation error: {0}")]
    PlanCompilation(String),

    /// An optimization pass found a node that violates its precondition.
    #[error("Optimization error in pass '{pass}': {reason}")]
    Optimization { pass: &'static str, reason: String },

    /// A ready node cannot be materialized into a submittable job.
    #[error("Job creation error for {node}: {reason}")]
    JobCreation { node: String, reason: String },

    #[error("Commit failed for job '{job}': {reason}")]
    Commit { job: String, reason: String },

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl Error {
    pub fn optimization(pass: &'static str, reason: impl Into<String>) -> Self {
        Error::Optimization {
            pass,
            reason: reason.into(),
        }
    }

    pub fn job_creation(node: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Error::JobCreation {
            node: node.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
