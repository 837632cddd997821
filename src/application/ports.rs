// Collaborator contracts consumed by the orchestrator
//
// Implementations live outside this crate; `infrastructure::memory`
// provides in-process ones.

use super::jobs::{JobFailure, OptimizationJob, OptimizationOutcome, ResultType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation timed out: {0}")]
    Timeout(String),

    #[error("Store network failure: {0}")]
    Network(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Conflicting write: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Draft,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub status: ScenarioStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub job_id: String,
    pub scenario_id: String,
    pub run_id: String,
    pub result_type: ResultType,
    pub outcome: OptimizationOutcome,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub job_id: String,
    pub scenario_id: String,
    pub run_id: String,
    pub failure: JobFailure,
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: String,
    pub scenario_id: String,
    pub job_id: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: &str, job: &OptimizationJob, details: serde_json::Value) -> Self {
        Self {
            action: action.to_string(),
            scenario_id: job.scenario_id.clone(),
            job_id: job.id.clone(),
            details,
            timestamp: Utc::now(),
        }
    }
}

/// Job state storage, owned by the orchestrator
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: OptimizationJob) -> StoreResult<()>;
    async fn update(&self, job: &OptimizationJob) -> StoreResult<()>;
    async fn get(&self, job_id: &str) -> StoreResult<Option<OptimizationJob>>;
    async fn find_by_run_id(&self, run_id: &str) -> StoreResult<Option<OptimizationJob>>;
    async fn list_for_scenario(&self, scenario_id: &str) -> StoreResult<Vec<OptimizationJob>>;
    async fn list(&self) -> StoreResult<Vec<OptimizationJob>>;
    async fn remove(&self, job_id: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait ScenarioStore: Send + Sync {
    async fn get_scenario(&self, scenario_id: &str) -> StoreResult<Option<Scenario>>;
    async fn update_status(&self, scenario_id: &str, status: ScenarioStatus) -> StoreResult<()>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_result(&self, record: ResultRecord) -> StoreResult<()>;
    async fn record_failure(&self, record: FailureRecord) -> StoreResult<()>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, event: AuditEvent) -> StoreResult<()>;
}
