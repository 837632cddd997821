// Domain value objects shared by the model, the solvers and the planners

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of decision variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    /// Non-negative real number (x ≥ 0)
    Continuous,
    /// Non-negative integer (x ∈ ℕ)
    Integer,
    /// Binary variable (x ∈ {0, 1})
    Binary,
}

impl VariableKind {
    pub fn is_integral(&self) -> bool {
        matches!(self, VariableKind::Integer | VariableKind::Binary)
    }
}

/// Direction of optimization, serialized as `"min"` / `"max"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Min,
    Max,
}

impl Direction {
    /// True when `candidate` is strictly better than `incumbent`
    pub fn improves(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Direction::Min => candidate < incumbent,
            Direction::Max => candidate > incumbent,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Min => write!(f, "min"),
            Direction::Max => write!(f, "max"),
        }
    }
}

/// Status of a solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionStatus {
    /// Proven optimal by an exact solver
    Optimal,
    /// Feasible but not proven optimal (heuristic result)
    Feasible,
    /// No assignment satisfies all constraints
    Infeasible,
    /// Objective can be improved infinitely
    Unbounded,
}

impl fmt::Display for SolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolutionStatus::Optimal => write!(f, "Optimal"),
            SolutionStatus::Feasible => write!(f, "Feasible"),
            SolutionStatus::Infeasible => write!(f, "Infeasible"),
            SolutionStatus::Unbounded => write!(f, "Unbounded"),
        }
    }
}

/// Solver backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverBackend {
    /// Strongest compiled backend, with heuristic fallback
    #[default]
    Auto,
    /// Pure-Rust branch and bound through good_lp
    Microlp,
    /// COIN-OR CBC through good_lp
    CoinCbc,
    /// HiGHS
    Highs,
    /// Seeded multi-start random search only
    RandomSearch,
}

impl fmt::Display for SolverBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverBackend::Auto => write!(f, "Auto"),
            SolverBackend::Microlp => write!(f, "microlp"),
            SolverBackend::CoinCbc => write!(f, "COIN-OR CBC"),
            SolverBackend::Highs => write!(f, "HiGHS"),
            SolverBackend::RandomSearch => write!(f, "Random Search"),
        }
    }
}

impl FromStr for SolverBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "auto" => Ok(SolverBackend::Auto),
            "microlp" => Ok(SolverBackend::Microlp),
            "coin_cbc" | "cbc" => Ok(SolverBackend::CoinCbc),
            "highs" => Ok(SolverBackend::Highs),
            "random_search" | "random" | "heuristic" => Ok(SolverBackend::RandomSearch),
            other => Err(format!("unknown solver backend '{}'", other)),
        }
    }
}
