// Application layer: job orchestration and resilience

pub mod circuit_breaker;
pub mod error_classifier;
pub mod jobs;
pub mod orchestrator;
pub mod ports;
pub mod runner;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState};
pub use error_classifier::{
    classify, error_code_of, Classify, ErrorCode, ErrorContext, ErrorDetails, RecoveryAction,
    Severity,
};
pub use jobs::{
    JobFailure, JobParams, JobStatus, JobTimeoutError, OptimizationJob, OptimizationOutcome,
    ResultType, TransportJobRequest,
};
pub use orchestrator::{Collaborators, JobOrchestrator, OrchestratorConfig, OrchestratorError};
pub use ports::{
    AuditEvent, AuditLog, FailureRecord, JobStore, ResultRecord, ResultStore, Scenario,
    ScenarioStatus, ScenarioStore, StoreError, StoreResult,
};
pub use runner::{JobExecutor, OptimizationRunner, ProgressReporter, ProgressUpdate};
