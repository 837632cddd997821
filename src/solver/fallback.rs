// Exact-first solver with heuristic fallback
// Runs the primary backend and switches to random search when it is missing,
// fails or panics

use super::random_search::{RandomSearchConfig, RandomSearchSolver};
use crate::domain::{
    models::{Model, Solution},
    solver_service::{Result, SolverError, SolverService},
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct FallbackSolver {
    primary: Option<Arc<dyn SolverService>>,
    fallback: RandomSearchSolver,
}

impl FallbackSolver {
    pub fn new(primary: Option<Arc<dyn SolverService>>, config: RandomSearchConfig) -> Self {
        Self {
            primary,
            fallback: RandomSearchSolver::new(config),
        }
    }

    /// Heuristic only
    pub fn heuristic(config: RandomSearchConfig) -> Self {
        Self::new(None, config)
    }

    pub fn primary_name(&self) -> Option<&str> {
        self.primary.as_deref().map(|p| p.name())
    }

    fn run_primary(
        primary: &dyn SolverService,
        model: &Model,
        cancel: &CancellationToken,
    ) -> Result<Solution> {
        catch_unwind(AssertUnwindSafe(|| primary.solve_cancellable(model, cancel))).unwrap_or_else(
            |_| {
                Err(SolverError::ExecutionFailed(format!(
                    "{} panicked while solving",
                    primary.name()
                )))
            },
        )
    }
}

impl SolverService for FallbackSolver {
    fn solve(&self, model: &Model) -> Result<Solution> {
        self.solve_cancellable(model, &CancellationToken::new())
    }

    fn solve_cancellable(&self, model: &Model, cancel: &CancellationToken) -> Result<Solution> {
        // Malformed models are rejected before any backend runs
        self.validate(model)?;

        let Some(primary) = self.primary.as_deref() else {
            warn!("no exact solver available, using heuristic search");
            return self.fallback.solve_cancellable(model, cancel);
        };

        match Self::run_primary(primary, model, cancel) {
            Ok(solution) => Ok(solution),
            Err(SolverError::SolverNotAvailable(reason))
            | Err(SolverError::ExecutionFailed(reason)) => {
                warn!(
                    solver = primary.name(),
                    error = %reason,
                    "exact solver failed, falling back to heuristic search"
                );
                self.fallback.solve_cancellable(model, cancel)
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        self.primary
            .as_deref()
            .map_or_else(|| self.fallback.name(), |p| p.name())
    }

    fn is_exact(&self) -> bool {
        self.primary.as_deref().is_some_and(|p| p.is_exact())
    }
}
