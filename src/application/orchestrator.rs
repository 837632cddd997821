// Job orchestrator
//
// Jobs move `queued → running → completed | failed | retrying`, with
// `retrying → running` after an exponential backoff. A dispatcher task starts
// queued jobs in submission order while at most `max_concurrent_jobs` run.
// Every attempt races a timeout; every job carries a cancellation token that
// `cancel_job` and `shutdown` fire. Results, failures and audit events reach
// the collaborators through a circuit breaker.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::error_classifier::{classify, ErrorContext, ErrorDetails};
use super::jobs::{
    JobFailure, JobParams, JobStatus, JobTimeoutError, OptimizationJob, OptimizationOutcome,
    ResultType,
};
use super::ports::{
    AuditEvent, AuditLog, FailureRecord, JobStore, ResultRecord, ResultStore, ScenarioStatus,
    ScenarioStore, StoreError, StoreResult,
};
use super::runner::{JobExecutor, ProgressReporter, ProgressUpdate};
use crate::domain::PlanningError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_jobs: usize,
    pub dispatch_delay_ms: u64,
    pub job_timeout_secs: u64,
    pub retention_hours: u64,
    pub sweep_interval_secs: u64,
    pub default_max_retries: u32,
    /// Replaces the per-error-code base retry delay when set
    pub retry_base_delay_ms: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            dispatch_delay_ms: 100,
            job_timeout_secs: 1800,
            retention_hours: 24,
            sweep_interval_secs: 3600,
            default_max_retries: 3,
            retry_base_delay_ms: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }

    /// Backoff before retry number `attempt` (1-based)
    pub fn retry_delay(&self, details: &ErrorDetails, attempt: u32) -> Duration {
        let base = self
            .retry_base_delay_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| details.code.base_retry_delay());
        base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Orchestrator is shut down")]
    NotRunning,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// External collaborators of the orchestrator
#[derive(Clone)]
pub struct Collaborators {
    pub jobs: Arc<dyn JobStore>,
    pub scenarios: Arc<dyn ScenarioStore>,
    pub results: Arc<dyn ResultStore>,
    pub audit: Arc<dyn AuditLog>,
}

struct Shared {
    config: OrchestratorConfig,
    collaborators: Collaborators,
    executor: Arc<dyn JobExecutor>,
    breaker: CircuitBreaker,
    queue: Mutex<VecDeque<String>>,
    wake: Notify,
    slots: Arc<Semaphore>,
    tokens: Mutex<HashMap<String, CancellationToken>>,
    // serializes read-modify-write cycles on job records
    write_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
    progress_rx: Mutex<Option<mpsc::UnboundedReceiver<ProgressUpdate>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct JobOrchestrator {
    shared: Arc<Shared>,
}

impl JobOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        breaker: CircuitBreakerConfig,
        collaborators: Collaborators,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            shared: Arc::new(Shared {
                config,
                collaborators,
                executor,
                breaker: CircuitBreaker::new("persistence", breaker),
                queue: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                slots,
                tokens: Mutex::new(HashMap::new()),
                write_lock: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
                progress_tx,
                progress_rx: Mutex::new(Some(progress_rx)),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.shared.breaker
    }

    /// Spawn the dispatcher, progress and sweeper tasks. Later calls are no-ops.
    pub fn start(&self) {
        let Some(progress_rx) = lock(&self.shared.progress_rx).take() else {
            debug!("orchestrator already started");
            return;
        };
        let shared = &self.shared;
        let handles = vec![
            tokio::spawn(Arc::clone(shared).dispatch_loop()),
            tokio::spawn(Arc::clone(shared).progress_loop(progress_rx)),
            tokio::spawn(Arc::clone(shared).sweep_loop()),
        ];
        lock(&shared.tasks).extend(handles);
        info!(
            max_concurrent_jobs = shared.config.max_concurrent_jobs,
            job_timeout_secs = shared.config.job_timeout_secs,
            "job orchestrator started"
        );
    }

    #[instrument(skip(self, params))]
    pub async fn add_job(
        &self,
        scenario_id: &str,
        run_id: &str,
        result_type: ResultType,
        params: JobParams,
    ) -> OrchestratorResult<String> {
        if self.shared.shutdown.is_cancelled() {
            return Err(OrchestratorError::NotRunning);
        }
        if scenario_id.trim().is_empty() || run_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "scenario id and run id are required".to_string(),
            ));
        }

        let job = OptimizationJob::new(
            scenario_id,
            run_id,
            result_type,
            params,
            self.shared.config.default_max_retries,
        );
        let job_id = job.id.clone();
        info!(
            job_id = %job_id,
            estimated_duration_secs = job.estimated_duration_secs,
            max_retries = job.max_retries,
            "job queued"
        );
        self.shared.collaborators.jobs.insert(job).await?;
        lock(&self.shared.queue).push_back(job_id.clone());
        self.shared.wake.notify_one();
        Ok(job_id)
    }

    pub async fn get_job(&self, job_id: &str) -> OrchestratorResult<Option<OptimizationJob>> {
        Ok(self.shared.collaborators.jobs.get(job_id).await?)
    }

    pub async fn get_job_by_run_id(&self, run_id: &str) -> OrchestratorResult<Option<OptimizationJob>> {
        Ok(self.shared.collaborators.jobs.find_by_run_id(run_id).await?)
    }

    pub async fn get_jobs_for_scenario(
        &self,
        scenario_id: &str,
    ) -> OrchestratorResult<Vec<OptimizationJob>> {
        Ok(self
            .shared
            .collaborators
            .jobs
            .list_for_scenario(scenario_id)
            .await?)
    }

    /// Cancel a queued, running or retrying job. Returns `false` when the
    /// job already reached a terminal state.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: &str) -> OrchestratorResult<bool> {
        let shared = &self.shared;
        let mut found = false;
        let cancelled = shared
            .mutate(job_id, |job| {
                found = true;
                if job.status.is_terminal() {
                    return false;
                }
                job.status = JobStatus::Cancelled;
                job.current_step = "cancelled".to_string();
                job.completed_at = Some(Utc::now());
                true
            })
            .await?;
        if !found {
            return Err(OrchestratorError::JobNotFound(job_id.to_string()));
        }
        let Some(job) = cancelled else {
            return Ok(false);
        };

        lock(&shared.queue).retain(|id| id != job_id);
        let token = lock(&shared.tokens).get(job_id).cloned();
        if let Some(token) = token {
            token.cancel();
        }
        info!(job_id, scenario_id = %job.scenario_id, "job cancelled");
        Ok(true)
    }

    pub async fn sweep_expired(&self) -> OrchestratorResult<usize> {
        self.sweep_expired_at(Utc::now()).await
    }

    /// Remove terminal jobs that finished more than the retention window
    /// before `now`
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> OrchestratorResult<usize> {
        Ok(self.shared.sweep(now).await?)
    }

    /// Stop the background tasks and cancel running jobs
    pub async fn shutdown(&self) {
        info!("job orchestrator shutting down");
        self.shared.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = lock(&self.shared.tasks).drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "orchestrator task panicked");
            }
        }
    }
}

impl Shared {
    /// Apply `f` to a stored job and write it back when `f` returns true
    async fn mutate<F>(&self, job_id: &str, f: F) -> StoreResult<Option<OptimizationJob>>
    where
        F: FnOnce(&mut OptimizationJob) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let Some(mut job) = self.collaborators.jobs.get(job_id).await? else {
            return Ok(None);
        };
        if !f(&mut job) {
            return Ok(None);
        }
        self.collaborators.jobs.update(&job).await?;
        Ok(Some(job))
    }

    async fn guarded<F, Fut>(&self, op: F) -> anyhow::Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<()>>,
    {
        self.breaker
            .execute(|| async move { op().await.map_err(anyhow::Error::from) })
            .await
    }

    async fn dispatch_loop(self: Arc<Self>) {
        let mut running = JoinSet::new();
        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job_id = loop {
                let next = lock(&self.queue).pop_front();
                if next.is_some() {
                    break next;
                }
                tokio::select! {
                    _ = self.shutdown.cancelled() => break None,
                    _ = self.wake.notified() => {}
                }
            };
            let Some(job_id) = job_id else {
                break;
            };

            let span = info_span!("job", job_id = %job_id);
            running.spawn(Arc::clone(&self).run_job(job_id, permit).instrument(span));

            while let Some(result) = running.try_join_next() {
                if let Err(e) = result {
                    error!(error = %e, "job task panicked");
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.dispatch_delay()) => {}
            }
        }

        // job tokens are children of the shutdown token
        while let Some(result) = running.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "job task panicked");
            }
        }
        debug!("dispatcher stopped");
    }

    async fn progress_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<ProgressUpdate>) {
        loop {
            let update = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                update = rx.recv() => match update {
                    Some(update) => update,
                    None => break,
                },
            };
            let applied = self
                .mutate(&update.job_id, |job| {
                    if job.status != JobStatus::Running || update.progress < job.progress {
                        return false;
                    }
                    job.progress = update.progress;
                    job.current_step = update.step.clone();
                    true
                })
                .await;
            if let Err(e) = applied {
                warn!(job_id = %update.job_id, error = %e, "failed to record job progress");
            }
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        // the first tick fires immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        warn!(error = %e, "job sweep failed");
                    }
                }
            }
        }
    }

    async fn sweep(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let retention = chrono::Duration::hours(self.config.retention_hours as i64);
        let cutoff = now - retention;
        let mut removed = 0;
        for job in self.collaborators.jobs.list().await? {
            let expired = job.status.is_terminal()
                && job.completed_at.is_some_and(|done| done < cutoff);
            if expired && self.collaborators.jobs.remove(&job.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "expired jobs swept");
        }
        Ok(removed)
    }

    async fn run_job(self: Arc<Self>, job_id: String, permit: OwnedSemaphorePermit) {
        let _permit = permit;
        let token = self.shutdown.child_token();
        lock(&self.tokens).insert(job_id.clone(), token.clone());

        let mut cached: Option<OptimizationOutcome> = None;
        loop {
            let started = self
                .mutate(&job_id, |job| {
                    if job.status.is_terminal() {
                        return false;
                    }
                    job.status = JobStatus::Running;
                    job.started_at.get_or_insert_with(Utc::now);
                    job.progress = 0;
                    job.current_step = "starting".to_string();
                    true
                })
                .await;
            let job = match started {
                Ok(Some(job)) => job,
                Ok(None) => {
                    debug!("job is no longer runnable");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "failed to mark job running");
                    break;
                }
            };
            if job.retry_count == 0 {
                let scenarios = Arc::clone(&self.collaborators.scenarios);
                let scenario_id = job.scenario_id.clone();
                if let Err(e) = self
                    .guarded(|| async move {
                        scenarios
                            .update_status(&scenario_id, ScenarioStatus::Running)
                            .await
                    })
                    .await
                {
                    warn!(error = %e, "failed to mark scenario running");
                }
            }
            info!(attempt = job.retry_count + 1, "job attempt started");

            let attempt_token = token.child_token();
            let timeout = self.config.job_timeout();
            let attempt = match tokio::time::timeout(
                timeout,
                self.attempt(&job, &attempt_token, &mut cached),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    attempt_token.cancel();
                    Err(JobTimeoutError {
                        job_id: job.id.clone(),
                        timeout_secs: timeout.as_secs(),
                    }
                    .into())
                }
            };

            let err = match attempt {
                Ok(()) => {
                    self.complete(&job_id).await;
                    break;
                }
                Err(err) => err,
            };

            if token.is_cancelled() {
                self.mark_cancelled(&job_id).await;
                break;
            }

            let details = classify(
                &err,
                ErrorContext::new("optimization").for_job(&job.id, &job.scenario_id),
            );
            let next = job.retry_count + 1;
            if !(details.recoverable && next <= job.max_retries) {
                self.fail(&job, &details).await;
                break;
            }

            let delay = self.config.retry_delay(&details, next);
            warn!(
                error_code = %details.code,
                error = %details.message,
                retry = next,
                max_retries = job.max_retries,
                delay_ms = delay.as_millis() as u64,
                "job attempt failed, retrying"
            );
            let failure = JobFailure::from(&details);
            let marked = self
                .mutate(&job_id, |job| {
                    if job.status.is_terminal() {
                        return false;
                    }
                    job.status = JobStatus::Retrying;
                    job.retry_count = next;
                    job.current_step = format!("retrying in {} ms", delay.as_millis());
                    job.last_error = Some(failure);
                    true
                })
                .await;
            if !matches!(marked, Ok(Some(_))) {
                break;
            }

            tokio::select! {
                _ = token.cancelled() => {
                    self.mark_cancelled(&job_id).await;
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        lock(&self.tokens).remove(&job_id);
    }

    /// One attempt: compute (or reuse) the outcome, then persist it
    async fn attempt(
        &self,
        job: &OptimizationJob,
        cancel: &CancellationToken,
        cached: &mut Option<OptimizationOutcome>,
    ) -> anyhow::Result<()> {
        let reporter = ProgressReporter::new(job.id.clone(), self.progress_tx.clone());
        let outcome = match cached {
            Some(outcome) => {
                debug!("reusing computed outcome, retrying persistence only");
                outcome.clone()
            }
            None => {
                let outcome = self
                    .executor
                    .execute(job, reporter.clone(), cancel.clone())
                    .await?;
                *cached = Some(outcome.clone());
                outcome
            }
        };
        let ensure_live = || -> anyhow::Result<()> {
            if cancel.is_cancelled() {
                return Err(PlanningError::Cancelled.into());
            }
            Ok(())
        };
        ensure_live()?;

        reporter.report(90, "persisting results");
        let record = ResultRecord {
            job_id: job.id.clone(),
            scenario_id: job.scenario_id.clone(),
            run_id: job.run_id.clone(),
            result_type: job.result_type,
            outcome,
            completed_at: Utc::now(),
        };
        let results = Arc::clone(&self.collaborators.results);
        self.guarded(|| async move { results.save_result(record).await })
            .await?;
        ensure_live()?;

        let scenarios = Arc::clone(&self.collaborators.scenarios);
        let scenario_id = job.scenario_id.clone();
        self.guarded(|| async move {
            scenarios
                .update_status(&scenario_id, ScenarioStatus::Completed)
                .await
        })
        .await?;
        ensure_live()?;

        let audit = Arc::clone(&self.collaborators.audit);
        let event = AuditEvent::new(
            "optimization_completed",
            job,
            serde_json::json!({
                "run_id": job.run_id,
                "result_type": job.result_type,
                "retry_count": job.retry_count,
            }),
        );
        self.guarded(|| async move { audit.record(event).await })
            .await?;
        Ok(())
    }

    async fn complete(&self, job_id: &str) {
        let done = self
            .mutate(job_id, |job| {
                if job.status.is_terminal() {
                    return false;
                }
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.current_step = "completed".to_string();
                job.completed_at = Some(Utc::now());
                true
            })
            .await;
        match done {
            Ok(Some(job)) => info!(retries = job.retry_count, "job completed"),
            Ok(None) => debug!("job finished after reaching a terminal state"),
            Err(e) => error!(error = %e, "failed to mark job completed"),
        }
    }

    async fn mark_cancelled(&self, job_id: &str) {
        let marked = self
            .mutate(job_id, |job| {
                if job.status.is_terminal() {
                    return false;
                }
                job.status = JobStatus::Cancelled;
                job.current_step = "cancelled".to_string();
                job.completed_at = Some(Utc::now());
                true
            })
            .await;
        if let Err(e) = marked {
            error!(error = %e, "failed to mark job cancelled");
        }
        info!("job stopped by cancellation");
    }

    /// Final failure: update the job, then tell the collaborators. Errors
    /// while propagating are logged only.
    async fn fail(&self, job: &OptimizationJob, details: &ErrorDetails) {
        let failure = JobFailure::from(details);
        let failed = self
            .mutate(&job.id, |job| {
                if job.status.is_terminal() {
                    return false;
                }
                job.status = JobStatus::Failed;
                job.current_step = "failed".to_string();
                job.completed_at = Some(Utc::now());
                job.last_error = Some(failure.clone());
                true
            })
            .await;
        let job = match failed {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "failed to mark job failed");
                job.clone()
            }
        };
        error!(
            error_code = %details.code,
            severity = ?details.severity,
            error = %details.message,
            retries = job.retry_count,
            "job failed"
        );

        let record = FailureRecord {
            job_id: job.id.clone(),
            scenario_id: job.scenario_id.clone(),
            run_id: job.run_id.clone(),
            failure: failure.clone(),
            retry_count: job.retry_count,
            failed_at: Utc::now(),
        };
        let results = Arc::clone(&self.collaborators.results);
        if let Err(e) = self
            .guarded(|| async move { results.record_failure(record).await })
            .await
        {
            warn!(error = %e, "failed to record job failure");
        }

        let scenarios = Arc::clone(&self.collaborators.scenarios);
        let scenario_id = job.scenario_id.clone();
        if let Err(e) = self
            .guarded(|| async move {
                scenarios
                    .update_status(&scenario_id, ScenarioStatus::Failed)
                    .await
            })
            .await
        {
            warn!(error = %e, "failed to mark scenario failed");
        }

        let audit = Arc::clone(&self.collaborators.audit);
        let event = AuditEvent::new(
            "optimization_failed",
            &job,
            serde_json::json!({
                "run_id": job.run_id,
                "error_code": failure.code,
                "severity": failure.severity,
                "retry_count": job.retry_count,
            }),
        );
        if let Err(e) = self.guarded(|| async move { audit.record(event).await }).await {
            warn!(error = %e, "failed to write failure audit event");
        }
    }
}
