// Domain layer: models, model builder, solver contract and planners
pub mod domain;

// Application layer: error classification, circuit breaker and job orchestration
pub mod application;

// Infrastructure layer: configuration, logging, in-process collaborators
pub mod infrastructure;

// Solver adapters: Concrete implementations of SolverService
pub mod solver;

// Re-export commonly used types
pub use domain::{
    Bound, CostMatrix, CostMatrixBuilder, Direction, FreightRates, GeoPoint, LocationLookup,
    Model, ModelBuilder, PlanningError, Solution, SolutionStatus, SolverBackend, SolverError,
    SolverService, TransportConfig, TransportOptimizer, TransportPlan, VariableKind,
    WarehousePlan, WarehousePlanner, WarehouseRequest,
};

pub use application::{
    classify, CircuitBreaker, Collaborators, ErrorCode, JobOrchestrator, JobParams, JobStatus,
    OptimizationJob, OptimizationRunner, ResultType,
};

pub use infrastructure::AppConfig;

pub use solver::{FallbackSolver, RandomSearchSolver, SolverFactory};
