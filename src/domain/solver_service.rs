// Domain service interface for solving models
// Any backend (exact or heuristic) implements this contract

use super::model_builder::validate_model;
use super::models::{Model, Solution};
use tokio_util::sync::CancellationToken;

/// Error types for the solver service
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Solver not available: {0}")]
    SolverNotAvailable(String),

    #[error("Solver execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Solve cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SolverError>;

/// Domain service interface for MIP solvers
pub trait SolverService: Send + Sync {
    /// Solve a model. Infeasible and unbounded models are reported through
    /// the solution status, not as errors.
    fn solve(&self, model: &Model) -> Result<Solution>;

    /// Solve a model, giving up early once `cancel` fires. Backends that
    /// cannot be interrupted ignore the token.
    fn solve_cancellable(&self, model: &Model, cancel: &CancellationToken) -> Result<Solution> {
        if cancel.is_cancelled() {
            return Err(SolverError::Cancelled);
        }
        self.solve(model)
    }

    /// Reject models that reference undefined structures
    fn validate(&self, model: &Model) -> Result<()> {
        let report = validate_model(model);
        if report.valid {
            Ok(())
        } else {
            Err(SolverError::InvalidModel(report.errors.join("; ")))
        }
    }

    /// Name of this solver backend
    fn name(&self) -> &str;

    /// True when results are proven optimal
    fn is_exact(&self) -> bool;
}
