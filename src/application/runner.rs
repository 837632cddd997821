// Job executor
// Runs the requested planners for one job. Solves are CPU bound and run on
// the blocking pool so the dispatcher and timers keep running.

use super::jobs::{OptimizationJob, OptimizationOutcome};
use super::ports::ScenarioStore;
use crate::domain::{
    CostMatrixBuilder, LocationLookup, PlanningError, SolverService, TransportOptimizer,
    WarehousePlanner,
};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub job_id: String,
    pub progress: u8,
    pub step: String,
}

/// Reports `(progress, step)` of one job back to the orchestrator
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    job_id: String,
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl ProgressReporter {
    pub fn new(job_id: impl Into<String>, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            job_id: job_id.into(),
            tx: Some(tx),
        }
    }

    /// Reporter that drops every update
    pub fn noop() -> Self {
        Self {
            job_id: String::new(),
            tx: None,
        }
    }

    pub fn report(&self, progress: u8, step: &str) {
        debug!(job_id = %self.job_id, progress, step, "job progress");
        if let Some(tx) = &self.tx {
            // receiver is gone once the orchestrator shuts down
            let _ = tx.send(ProgressUpdate {
                job_id: self.job_id.clone(),
                progress: progress.min(100),
                step: step.to_string(),
            });
        }
    }
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Compute the outcome of one attempt. Persistence is left to the caller.
    async fn execute(
        &self,
        job: &OptimizationJob,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> anyhow::Result<OptimizationOutcome>;
}

pub struct OptimizationRunner {
    solver: Arc<dyn SolverService>,
    lookup: Arc<dyn LocationLookup>,
    scenarios: Arc<dyn ScenarioStore>,
}

impl OptimizationRunner {
    pub fn new(
        solver: Arc<dyn SolverService>,
        lookup: Arc<dyn LocationLookup>,
        scenarios: Arc<dyn ScenarioStore>,
    ) -> Self {
        Self {
            solver,
            lookup,
            scenarios,
        }
    }

    fn check_params(job: &OptimizationJob) -> Result<(), PlanningError> {
        let params = &job.params;
        if job.result_type.runs_warehouse() && params.warehouse.is_none() {
            return Err(PlanningError::invalid(
                "warehouse parameters are required for this result type",
            ));
        }
        if job.result_type.runs_transport() && params.transport.is_none() {
            return Err(PlanningError::invalid(
                "transport parameters are required for this result type",
            ));
        }
        Ok(())
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), PlanningError> {
    if cancel.is_cancelled() {
        Err(PlanningError::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait]
impl JobExecutor for OptimizationRunner {
    #[instrument(skip_all, fields(job_id = %job.id, scenario_id = %job.scenario_id))]
    async fn execute(
        &self,
        job: &OptimizationJob,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> anyhow::Result<OptimizationOutcome> {
        progress.report(5, "validating");
        let scenario = self
            .scenarios
            .get_scenario(&job.scenario_id)
            .await
            .context("loading scenario")?;
        if scenario.is_none() {
            return Err(PlanningError::invalid(format!(
                "scenario '{}' does not exist",
                job.scenario_id
            ))
            .into());
        }
        Self::check_params(job)?;
        ensure_live(&cancel)?;

        let mut outcome = OptimizationOutcome::default();

        let transport = job
            .params
            .transport
            .clone()
            .filter(|_| job.result_type.runs_transport());
        let matrix = match &transport {
            Some(request) => {
                progress.report(15, "building cost matrix");
                let lookup = Arc::clone(&self.lookup);
                let request = request.clone();
                let matrix = tokio::task::spawn_blocking(move || {
                    CostMatrixBuilder::new(lookup.as_ref(), request.rates.clone())
                        .build(&request.facilities, &request.destinations)
                })
                .await
                .context("cost matrix task")?
                .map_err(PlanningError::from)?;
                Some(matrix)
            }
            None => None,
        };
        ensure_live(&cancel)?;

        if let Some(request) = job
            .params
            .warehouse
            .clone()
            .filter(|_| job.result_type.runs_warehouse())
        {
            progress.report(20, "warehouse planning");
            let solver = Arc::clone(&self.solver);
            let token = cancel.clone();
            let plan = tokio::task::spawn_blocking(move || {
                WarehousePlanner::new(solver.as_ref()).plan(&request, &token)
            })
            .await
            .context("warehouse planning task")??;
            outcome.warehouse = Some(plan);
            progress.report(50, "warehouse planning");
        }
        ensure_live(&cancel)?;

        if let (Some(request), Some(matrix)) = (transport, matrix) {
            progress.report(55, "transport optimization");
            let solver = Arc::clone(&self.solver);
            let token = cancel.clone();
            let plan = tokio::task::spawn_blocking(move || {
                TransportOptimizer::new(solver.as_ref()).optimize(
                    &matrix,
                    request.demand.as_ref(),
                    &request.config,
                    &token,
                )
            })
            .await
            .context("transport optimization task")??;
            outcome.transport = Some(plan);
            progress.report(85, "transport optimization");
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::jobs::{JobParams, ResultType, TransportJobRequest};
    use crate::application::ports::{Scenario, ScenarioStatus, StoreResult};
    use crate::application::error_classifier::{error_code_of, ErrorCode};
    use crate::domain::{GeoPoint, TransportConfig};
    use crate::solver::RandomSearchSolver;

    struct OneScenario;

    #[async_trait]
    impl ScenarioStore for OneScenario {
        async fn get_scenario(&self, scenario_id: &str) -> StoreResult<Option<Scenario>> {
            Ok((scenario_id == "s1").then(|| Scenario {
                id: "s1".into(),
                name: "baseline".into(),
                status: ScenarioStatus::Draft,
            }))
        }

        async fn update_status(&self, _: &str, _: ScenarioStatus) -> StoreResult<()> {
            Ok(())
        }
    }

    struct Nowhere;

    impl LocationLookup for Nowhere {
        fn locate(&self, _name: &str) -> Option<GeoPoint> {
            None
        }
    }

    fn runner() -> OptimizationRunner {
        OptimizationRunner::new(
            Arc::new(RandomSearchSolver::default()),
            Arc::new(Nowhere),
            Arc::new(OneScenario),
        )
    }

    fn transport_job(scenario: &str) -> OptimizationJob {
        let params = JobParams {
            transport: Some(TransportJobRequest {
                facilities: vec!["Chicago".into()],
                destinations: vec!["Denver".into()],
                demand: None,
                config: TransportConfig::default(),
                rates: Default::default(),
            }),
            ..JobParams::default()
        };
        OptimizationJob::new(scenario, "r1", ResultType::Transport, params, 3)
    }

    #[tokio::test]
    async fn missing_scenario_is_a_validation_failure() {
        let err = runner()
            .execute(&transport_job("nope"), ProgressReporter::noop(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(error_code_of(&err), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn missing_planner_params_are_rejected() {
        let job = OptimizationJob::new("s1", "r1", ResultType::Warehouse, JobParams::default(), 3);
        let err = runner()
            .execute(&job, ProgressReporter::noop(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(error_code_of(&err), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn unlocatable_facilities_fail_validation() {
        let err = runner()
            .execute(&transport_job("s1"), ProgressReporter::noop(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlanningError>(),
            Some(PlanningError::Geo(_))
        ));
        assert_eq!(error_code_of(&err), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_solving() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runner()
            .execute(&transport_job("s1"), ProgressReporter::noop(), cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlanningError>(),
            Some(PlanningError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn progress_updates_reach_the_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new("job-1", tx);
        reporter.report(5, "validating");
        reporter.report(120, "done");
        assert_eq!(rx.recv().await.unwrap().progress, 5);
        assert_eq!(rx.recv().await.unwrap().progress, 100);
    }
}
