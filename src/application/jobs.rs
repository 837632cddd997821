// Job records and requests handled by the orchestrator

use super::error_classifier::{ErrorCode, ErrorDetails, Severity};
use crate::domain::{FreightRates, TransportConfig, TransportPlan, WarehousePlan, WarehouseRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

/// Which planners a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Warehouse,
    Transport,
    Combined,
}

impl ResultType {
    pub fn runs_warehouse(&self) -> bool {
        matches!(self, ResultType::Warehouse | ResultType::Combined)
    }

    pub fn runs_transport(&self) -> bool {
        matches!(self, ResultType::Transport | ResultType::Combined)
    }

    /// Number of planners this result type runs
    pub fn scenario_types(&self) -> u64 {
        u64::from(self.runs_warehouse()) + u64::from(self.runs_transport())
    }
}

/// Candidate facilities and destinations of a transport run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportJobRequest {
    pub facilities: Vec<String>,
    pub destinations: Vec<String>,
    /// Demand per destination; missing entries use the config default
    #[serde(default)]
    pub demand: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub config: TransportConfig,
    #[serde(default)]
    pub rates: FreightRates,
}

impl TransportJobRequest {
    pub fn candidate_pairs(&self) -> u64 {
        (self.facilities.len() as u64) * (self.destinations.len() as u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    #[serde(default)]
    pub warehouse: Option<WarehouseRequest>,
    #[serde(default)]
    pub transport: Option<TransportJobRequest>,
    /// Overrides the orchestrator's default retry budget
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Heuristic duration: 30s per planner plus 10ms per facility/destination pair
pub fn estimate_duration(result_type: ResultType, params: &JobParams) -> Duration {
    let pairs = params
        .transport
        .as_ref()
        .map_or(0, TransportJobRequest::candidate_pairs);
    Duration::from_secs(30 * result_type.scenario_types()) + Duration::from_millis(10 * pairs)
}

/// Sanitized failure attached to a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
}

impl From<&ErrorDetails> for JobFailure {
    fn from(details: &ErrorDetails) -> Self {
        Self {
            code: details.code,
            severity: details.severity,
            message: details.user_message.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub warehouse: Option<WarehousePlan>,
    pub transport: Option<TransportPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationJob {
    pub id: String,
    pub scenario_id: String,
    pub run_id: String,
    pub result_type: ResultType,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub current_step: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub estimated_duration_secs: u64,
    pub last_error: Option<JobFailure>,
    pub params: JobParams,
}

impl OptimizationJob {
    pub fn new(
        scenario_id: impl Into<String>,
        run_id: impl Into<String>,
        result_type: ResultType,
        params: JobParams,
        max_retries: u32,
    ) -> Self {
        let estimated = estimate_duration(result_type, &params);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scenario_id: scenario_id.into(),
            run_id: run_id.into(),
            result_type,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            current_step: "queued".to_string(),
            retry_count: 0,
            max_retries: params.max_retries.unwrap_or(max_retries),
            estimated_duration_secs: estimated.as_secs(),
            last_error: None,
            params,
        }
    }
}

/// Raised when an attempt exceeds the job timeout
#[derive(Debug, Clone, thiserror::Error)]
#[error("Job {job_id} timed out after {timeout_secs}s")]
pub struct JobTimeoutError {
    pub job_id: String,
    pub timeout_secs: u64,
}
