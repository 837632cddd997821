use super::fallback::FallbackSolver;
use super::random_search::{RandomSearchConfig, RandomSearchSolver};
use crate::domain::{solver_service::SolverService, value_objects::SolverBackend};
use std::sync::Arc;

#[cfg(any(feature = "microlp", feature = "coin_cbc"))]
use super::good_lp_solver::GoodLpSolver;
#[cfg(feature = "highs")]
use super::highs_solver::HighsSolver;

/// Factory for creating solver instances based on configuration
pub struct SolverFactory;

impl SolverFactory {
    /// Solver for a configured backend. Exact backends are wrapped so that a
    /// missing or failing backend degrades to random search.
    pub fn create(backend: SolverBackend, heuristic: &RandomSearchConfig) -> Arc<dyn SolverService> {
        match backend {
            SolverBackend::RandomSearch => Arc::new(RandomSearchSolver::new(heuristic.clone())),
            other => Arc::new(FallbackSolver::new(Self::exact(other), heuristic.clone())),
        }
    }

    /// Exact backend compiled into this build, if any
    pub fn exact(backend: SolverBackend) -> Option<Arc<dyn SolverService>> {
        match backend {
            SolverBackend::Auto => Self::strongest_available(),
            #[cfg(feature = "microlp")]
            SolverBackend::Microlp => Some(Arc::new(GoodLpSolver::microlp())),
            #[cfg(feature = "coin_cbc")]
            SolverBackend::CoinCbc => Some(Arc::new(GoodLpSolver::coin_cbc())),
            #[cfg(feature = "highs")]
            SolverBackend::Highs => Some(Arc::new(HighsSolver::new())),
            _ => None,
        }
    }

    /// Preference order: HiGHS, CBC, microlp
    pub fn strongest_available() -> Option<Arc<dyn SolverService>> {
        [SolverBackend::Highs, SolverBackend::CoinCbc, SolverBackend::Microlp]
            .into_iter()
            .find_map(Self::exact)
    }

    /// Backends usable in this build, random search included
    pub fn available_backends() -> Vec<SolverBackend> {
        let mut backends: Vec<SolverBackend> = [
            SolverBackend::Highs,
            SolverBackend::CoinCbc,
            SolverBackend::Microlp,
        ]
        .into_iter()
        .filter(|b| Self::exact(*b).is_some())
        .collect();
        backends.push(SolverBackend::RandomSearch);
        backends
    }

    /// Get the default solver (strongest exact backend with heuristic fallback)
    pub fn default_solver() -> Arc<dyn SolverService> {
        Self::create(SolverBackend::Auto, &RandomSearchConfig::default())
    }
}
