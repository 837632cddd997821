use super::geo::GeoError;
use super::solver_service::SolverError;

/// Errors raised by the warehouse planner and the transport optimizer
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("Invalid planning input: {0}")]
    InvalidInput(String),

    #[error("Optimization infeasible: {0}")]
    Infeasible(String),

    #[error("Cost matrix error: {0}")]
    Geo(#[from] GeoError),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error("Planning cancelled")]
    Cancelled,
}

impl PlanningError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        PlanningError::InvalidInput(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PlanningError::Cancelled | PlanningError::Solver(SolverError::Cancelled)
        )
    }
}

pub type PlanningResult<T> = std::result::Result<T, PlanningError>;
