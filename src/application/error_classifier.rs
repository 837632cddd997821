// Error taxonomy and classification
//
// Errors raised inside this crate carry their code through [`Classify`].
// Foreign errors (anything else boxed in an `anyhow::Error`) are matched
// against message patterns as a last resort.

use super::circuit_breaker::CircuitOpenError;
use super::jobs::JobTimeoutError;
use super::orchestrator::OrchestratorError;
use super::ports::StoreError;
use crate::domain::{GeoError, PlanningError, SolverError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DatabaseError,
    NetworkError,
    OptimizationError,
    ValidationError,
    ResourceError,
    TimeoutError,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::OptimizationError => "OPTIMIZATION_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ResourceError => "RESOURCE_ERROR",
            ErrorCode::TimeoutError => "TIMEOUT_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ErrorCode::DatabaseError | ErrorCode::ResourceError => Severity::High,
            ErrorCode::ValidationError => Severity::Low,
            _ => Severity::Medium,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorCode::ValidationError | ErrorCode::UnknownError)
    }

    /// Ordered recovery actions for this code
    pub fn recovery_actions(&self) -> Vec<RecoveryAction> {
        let retry = |secs: u64| RecoveryAction::Retry {
            delay_ms: secs * 1000,
        };
        match self {
            ErrorCode::DatabaseError => vec![retry(2), RecoveryAction::ManualIntervention],
            ErrorCode::NetworkError => vec![retry(1)],
            ErrorCode::OptimizationError => vec![RecoveryAction::Fallback, retry(5)],
            ErrorCode::ValidationError => vec![RecoveryAction::Cancel],
            ErrorCode::ResourceError => vec![retry(10), RecoveryAction::Fallback],
            ErrorCode::TimeoutError => vec![retry(3), RecoveryAction::Fallback],
            ErrorCode::UnknownError => vec![RecoveryAction::ManualIntervention],
        }
    }

    /// Base delay of the first retry; 1s when the code has no retry action
    pub fn base_retry_delay(&self) -> Duration {
        self.recovery_actions()
            .iter()
            .find_map(|action| match action {
                RecoveryAction::Retry { delay_ms } => Some(Duration::from_millis(*delay_ms)),
                _ => None,
            })
            .unwrap_or(Duration::from_secs(1))
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseError => {
                "A data storage problem interrupted the optimization. It will be retried automatically."
            }
            ErrorCode::NetworkError => {
                "A network problem interrupted the optimization. It will be retried automatically."
            }
            ErrorCode::OptimizationError => {
                "The optimization could not find a solution with the current settings."
            }
            ErrorCode::ValidationError => {
                "The scenario inputs are invalid. Please review the configuration and try again."
            }
            ErrorCode::ResourceError => {
                "The system is temporarily overloaded. The optimization will be retried."
            }
            ErrorCode::TimeoutError => "The optimization took too long and was stopped.",
            ErrorCode::UnknownError => "An unexpected error occurred. Please contact support.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry { delay_ms: u64 },
    Fallback,
    Cancel,
    ManualIntervention,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub operation: String,
    pub job_id: Option<String>,
    pub scenario_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            job_id: None,
            scenario_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_job(mut self, job_id: impl Into<String>, scenario_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self.scenario_id = Some(scenario_id.into());
        self
    }
}

/// Classified error. `message` is for logs; only `user_message` and
/// `severity` leave the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub severity: Severity,
    pub recoverable: bool,
    pub recovery_actions: Vec<RecoveryAction>,
    pub message: String,
    pub user_message: String,
    pub context: ErrorContext,
}

/// Errors that know their own taxonomy code
pub trait Classify {
    fn error_code(&self) -> ErrorCode;
}

impl Classify for SolverError {
    fn error_code(&self) -> ErrorCode {
        match self {
            SolverError::InvalidModel(_) => ErrorCode::ValidationError,
            SolverError::SolverNotAvailable(_) => ErrorCode::ResourceError,
            SolverError::ExecutionFailed(_) => ErrorCode::OptimizationError,
            SolverError::Cancelled => ErrorCode::UnknownError,
        }
    }
}

impl Classify for GeoError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::ValidationError
    }
}

impl Classify for PlanningError {
    fn error_code(&self) -> ErrorCode {
        match self {
            PlanningError::InvalidInput(_) => ErrorCode::ValidationError,
            PlanningError::Infeasible(_) => ErrorCode::OptimizationError,
            PlanningError::Geo(e) => e.error_code(),
            PlanningError::Solver(e) => e.error_code(),
            PlanningError::Cancelled => ErrorCode::UnknownError,
        }
    }
}

impl Classify for StoreError {
    fn error_code(&self) -> ErrorCode {
        match self {
            StoreError::Unavailable(_) | StoreError::Conflict(_) => ErrorCode::DatabaseError,
            StoreError::Timeout(_) => ErrorCode::TimeoutError,
            StoreError::Network(_) => ErrorCode::NetworkError,
            StoreError::NotFound(_) => ErrorCode::ValidationError,
        }
    }
}

impl Classify for CircuitOpenError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::ResourceError
    }
}

impl Classify for JobTimeoutError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::TimeoutError
    }
}

impl Classify for OrchestratorError {
    fn error_code(&self) -> ErrorCode {
        match self {
            OrchestratorError::InvalidRequest(_) => ErrorCode::ValidationError,
            OrchestratorError::Store(e) => e.error_code(),
            OrchestratorError::NotRunning | OrchestratorError::JobNotFound(_) => {
                ErrorCode::UnknownError
            }
        }
    }
}

fn tagged_code(err: &(dyn std::error::Error + 'static)) -> Option<ErrorCode> {
    if let Some(e) = err.downcast_ref::<PlanningError>() {
        return Some(e.error_code());
    }
    if let Some(e) = err.downcast_ref::<SolverError>() {
        return Some(e.error_code());
    }
    if let Some(e) = err.downcast_ref::<GeoError>() {
        return Some(e.error_code());
    }
    if let Some(e) = err.downcast_ref::<StoreError>() {
        return Some(e.error_code());
    }
    if let Some(e) = err.downcast_ref::<CircuitOpenError>() {
        return Some(e.error_code());
    }
    if let Some(e) = err.downcast_ref::<JobTimeoutError>() {
        return Some(e.error_code());
    }
    if let Some(e) = err.downcast_ref::<OrchestratorError>() {
        return Some(e.error_code());
    }
    None
}

const MESSAGE_PATTERNS: &[(ErrorCode, &[&str])] = &[
    (ErrorCode::TimeoutError, &["timeout", "timed out", "etimedout"]),
    (
        ErrorCode::DatabaseError,
        &["database", "sql", "deadlock", "connection pool", "query failed"],
    ),
    (
        ErrorCode::NetworkError,
        &["network", "econnrefused", "econnreset", "connection refused", "connection reset", "dns"],
    ),
    (
        ErrorCode::ResourceError,
        &["out of memory", "memory", "resource", "too many", "quota", "circuit"],
    ),
    (
        ErrorCode::OptimizationError,
        &["infeasible", "unbounded", "solver", "optimization", "optimisation"],
    ),
    (
        ErrorCode::ValidationError,
        &["invalid", "validation", "required", "missing", "not found"],
    ),
];

fn code_from_message(message: &str) -> ErrorCode {
    let lower = message.to_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| lower.contains(p)))
        .map_or(ErrorCode::UnknownError, |(code, _)| *code)
}

/// Code of an error chain: the first tagged error wins, message patterns
/// apply only when nothing in the chain is tagged.
pub fn error_code_of(error: &anyhow::Error) -> ErrorCode {
    error
        .chain()
        .find_map(tagged_code)
        .unwrap_or_else(|| code_from_message(&format!("{:#}", error)))
}

pub fn classify(error: &anyhow::Error, context: ErrorContext) -> ErrorDetails {
    let code = error_code_of(error);
    ErrorDetails {
        code,
        severity: code.severity(),
        recoverable: code.is_recoverable(),
        recovery_actions: code.recovery_actions(),
        message: redact(&format!("{:#}", error)),
        user_message: code.user_message().to_string(),
        context,
    }
}

/// Masks connection strings and inline passwords
pub fn redact(message: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for word in message.split(' ') {
        let lower = word.to_ascii_lowercase();
        if let Some(pos) = word.find("://") {
            out.push(format!("{}://[redacted]", &word[..pos]));
        } else if let Some(pos) = lower.find("password=") {
            out.push(format!("{}password=[redacted]", &word[..pos]));
        } else {
            out.push(word.to_string());
        }
    }
    out.join(" ")
}
