//! Planner error kinds.

use thiserror::Error;

/// Everything that can cause a job to fail planning, or a lower-level
/// operation to abort before mutating shared state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlannerError {
    /// Malformed PPR pattern, rankfile line, or CPU list.
    #[error("bad parameter: {0}")]
    BadParam(String),

    /// A required piece of state (e.g. stand-in topology) was missing.
    #[error("not found")]
    NotFound,

    /// A mapper produced a plan but `node` could not accept it right now.
    #[error("resource busy on node {node}")]
    ResourceBusy { node: String },

    /// The target selector returned an empty node list.
    #[error("no targets available for app {app_index}")]
    NoTargets { app_index: usize },

    /// Every installed mapper declined, or the resulting plan has zero
    /// processes or zero nodes.
    #[error("mapping failed: {0}")]
    MappingFailed(String),

    /// The requested binding cannot be honored and overload was not
    /// permitted.
    #[error("binding infeasible: {0}")]
    BindingInfeasible(String),

    /// The job was cancelled mid-plan.
    #[error("cancelled")]
    Cancelled,
}

impl PlannerError {
    /// The stable error-kind tag surfaced to the orchestrator as
    /// `job.exit_code`.
    pub fn kind(&self) -> &'static str {
        match self {
            PlannerError::BadParam(_) => "BAD_PARAM",
            PlannerError::NotFound => "NOT_FOUND",
            PlannerError::ResourceBusy { .. } => "RESOURCE_BUSY",
            PlannerError::NoTargets { .. } => "NO_TARGETS",
            PlannerError::MappingFailed(_) => "MAPPING_FAILED",
            PlannerError::BindingInfeasible(_) => "BINDING_INFEASIBLE",
            PlannerError::Cancelled => "CANCELLED",
        }
    }
}
