// Solver adapters module

pub mod factory;
pub mod fallback;
#[cfg(any(feature = "microlp", feature = "coin_cbc"))]
pub mod good_lp_solver;
#[cfg(feature = "highs")]
pub mod highs_solver;
pub mod random_search;

pub use factory::SolverFactory;
pub use fallback::FallbackSolver;
#[cfg(any(feature = "microlp", feature = "coin_cbc"))]
pub use good_lp_solver::{GoodLpSolver, LpBackend};
#[cfg(feature = "highs")]
pub use highs_solver::HighsSolver;
pub use random_search::{RandomSearchConfig, RandomSearchSolver};
