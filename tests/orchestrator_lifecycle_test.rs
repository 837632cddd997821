// Job lifecycle through the orchestrator with scripted executors

use async_trait::async_trait;
use netplan::application::{
    CircuitBreakerConfig, CircuitState, Collaborators, ErrorCode, FailureRecord, JobExecutor,
    JobOrchestrator, JobParams, JobStatus, OptimizationJob, OptimizationOutcome,
    OrchestratorConfig, OrchestratorError, ProgressReporter, ResultRecord, ResultStore,
    ResultType, ScenarioStatus, StoreError, StoreResult,
};
use netplan::domain::PlanningError;
use netplan::infrastructure::{
    logging, InMemoryAuditLog, InMemoryJobStore, InMemoryResultStore, InMemoryScenarioStore,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

enum Step {
    Succeed,
    Fail(anyhow::Error),
    Sleep(Duration),
    /// Wait until the attempt is cancelled
    Block,
}

type Script = Box<dyn Fn(u32) -> Step + Send + Sync>;

struct Scripted {
    script: Script,
    calls: AtomicU32,
    started: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Scripted {
    fn new(script: impl Fn(u32) -> Step + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicU32::new(0),
            started: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobExecutor for Scripted {
    async fn execute(
        &self,
        job: &OptimizationJob,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> anyhow::Result<OptimizationOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.lock().unwrap().push(job.id.clone());
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);
        progress.report(50, "solving");

        let result = match (self.script)(call) {
            Step::Succeed => Ok(OptimizationOutcome::default()),
            Step::Fail(e) => Err(e),
            Step::Sleep(d) => tokio::select! {
                _ = cancel.cancelled() => Err(PlanningError::Cancelled.into()),
                _ = tokio::time::sleep(d) => Ok(OptimizationOutcome::default()),
            },
            Step::Block => {
                cancel.cancelled().await;
                Err(PlanningError::Cancelled.into())
            }
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Result store whose first `failing` saves (or every save) are rejected
struct FlakyResults {
    inner: InMemoryResultStore,
    failing: Option<u32>,
    saves: AtomicU32,
}

#[async_trait]
impl ResultStore for FlakyResults {
    async fn save_result(&self, record: ResultRecord) -> StoreResult<()> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.map_or(true, |limit| n <= limit) {
            return Err(StoreError::Unavailable("results database down".into()));
        }
        self.inner.save_result(record).await
    }

    async fn record_failure(&self, record: FailureRecord) -> StoreResult<()> {
        self.inner.record_failure(record).await
    }
}

/// Result store that takes `delay` to accept each save
struct SlowResults {
    inner: InMemoryResultStore,
    delay: Duration,
}

#[async_trait]
impl ResultStore for SlowResults {
    async fn save_result(&self, record: ResultRecord) -> StoreResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.save_result(record).await
    }

    async fn record_failure(&self, record: FailureRecord) -> StoreResult<()> {
        self.inner.record_failure(record).await
    }
}

/// First call gets far along before a network failure, later calls report
/// early progress and wait for cancellation
struct FailsLate {
    calls: AtomicU32,
}

#[async_trait]
impl JobExecutor for FailsLate {
    async fn execute(
        &self,
        _job: &OptimizationJob,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> anyhow::Result<OptimizationOutcome> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            progress.report(80, "building model");
            return Err(StoreError::Network("connection reset by peer".into()).into());
        }
        progress.report(20, "loading inputs");
        cancel.cancelled().await;
        Err(PlanningError::Cancelled.into())
    }
}

struct Harness {
    orchestrator: JobOrchestrator,
    scenarios: Arc<InMemoryScenarioStore>,
    results: Arc<InMemoryResultStore>,
    audit: Arc<InMemoryAuditLog>,
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_concurrent_jobs: 2,
        dispatch_delay_ms: 1,
        job_timeout_secs: 60,
        retry_base_delay_ms: Some(10),
        ..OrchestratorConfig::default()
    }
}

fn harness_with(
    config: OrchestratorConfig,
    breaker: CircuitBreakerConfig,
    executor: Arc<dyn JobExecutor>,
    results_override: Option<Arc<dyn ResultStore>>,
) -> Harness {
    logging::init_test();
    let scenarios = Arc::new(InMemoryScenarioStore::new());
    scenarios.insert("s1", "baseline network");
    let results = Arc::new(InMemoryResultStore::new());
    let audit = Arc::new(InMemoryAuditLog::new());
    let collaborators = Collaborators {
        jobs: Arc::new(InMemoryJobStore::new()),
        scenarios: scenarios.clone(),
        results: results_override.unwrap_or_else(|| results.clone() as Arc<dyn ResultStore>),
        audit: audit.clone(),
    };
    let orchestrator = JobOrchestrator::new(config, breaker, collaborators, executor);
    orchestrator.start();
    Harness {
        orchestrator,
        scenarios,
        results,
        audit,
    }
}

fn harness(executor: Arc<Scripted>) -> Harness {
    harness_with(config(), CircuitBreakerConfig::default(), executor, None)
}

async fn submit(orchestrator: &JobOrchestrator, run_id: &str) -> String {
    orchestrator
        .add_job("s1", run_id, ResultType::Transport, JobParams::default())
        .await
        .unwrap()
}

async fn wait_until(
    orchestrator: &JobOrchestrator,
    job_id: &str,
    done: impl Fn(&OptimizationJob) -> bool,
) -> OptimizationJob {
    for _ in 0..10_000 {
        if let Some(job) = orchestrator.get_job(job_id).await.unwrap() {
            if done(&job) {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never reached the expected state", job_id);
}

async fn wait_terminal(orchestrator: &JobOrchestrator, job_id: &str) -> OptimizationJob {
    wait_until(orchestrator, job_id, |job| job.status.is_terminal()).await
}

#[tokio::test(start_paused = true)]
async fn completed_job_reaches_every_collaborator() {
    let executor = Scripted::new(|_| Step::Succeed);
    let h = harness(executor.clone());

    let job_id = submit(&h.orchestrator, "run-1").await;
    let job = wait_terminal(&h.orchestrator, &job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.retry_count, 0);
    assert!(job.started_at.is_some() && job.completed_at.is_some());
    assert_eq!(executor.calls(), 1);

    assert_eq!(h.scenarios.status_of("s1"), Some(ScenarioStatus::Completed));
    let record = h.results.result_for(&job_id).unwrap();
    assert_eq!(record.run_id, "run-1");
    let events = h.audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, "optimization_completed");

    let by_run = h.orchestrator.get_job_by_run_id("run-1").await.unwrap().unwrap();
    assert_eq!(by_run.id, job_id);
    assert_eq!(h.orchestrator.get_jobs_for_scenario("s1").await.unwrap().len(), 1);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn validation_failure_is_final() {
    let executor = Scripted::new(|_| Step::Fail(PlanningError::invalid("no destinations").into()));
    let h = harness(executor.clone());

    let job_id = submit(&h.orchestrator, "run-1").await;
    let job = wait_terminal(&h.orchestrator, &job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert_eq!(executor.calls(), 1);
    assert_eq!(job.last_error.unwrap().code, ErrorCode::ValidationError);

    assert_eq!(h.scenarios.status_of("s1"), Some(ScenarioStatus::Failed));
    assert_eq!(h.results.failures().len(), 1);
    assert!(h.results.result_for(&job_id).is_none());
    assert_eq!(h.audit.events()[0].action, "optimization_failed");
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn recoverable_failures_are_retried() {
    let executor = Scripted::new(|call| {
        if call < 3 {
            Step::Fail(StoreError::Network("connection reset by peer".into()).into())
        } else {
            Step::Succeed
        }
    });
    let h = harness(executor.clone());

    let job_id = submit(&h.orchestrator, "run-1").await;
    let job = wait_terminal(&h.orchestrator, &job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.retry_count, 2);
    assert_eq!(executor.calls(), 3);
    assert_eq!(job.last_error.unwrap().code, ErrorCode::NetworkError);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retries_stop_at_max_retries() {
    let executor = Scripted::new(|_| Step::Fail(anyhow::anyhow!("solver backend crashed")));
    let h = harness(executor.clone());

    let params = JobParams {
        max_retries: Some(2),
        ..JobParams::default()
    };
    let job_id = h
        .orchestrator
        .add_job("s1", "run-1", ResultType::Warehouse, params)
        .await
        .unwrap();
    let job = wait_terminal(&h.orchestrator, &job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.max_retries, 2);
    assert_eq!(job.retry_count, 2);
    assert_eq!(executor.calls(), 3);
    assert_eq!(job.last_error.unwrap().code, ErrorCode::OptimizationError);
    assert_eq!(h.results.failures()[0].retry_count, 2);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn timed_out_attempts_are_retried_then_fail() {
    let executor = Scripted::new(|_| Step::Block);
    let cfg = OrchestratorConfig {
        job_timeout_secs: 1,
        default_max_retries: 1,
        ..config()
    };
    let h = harness_with(cfg, CircuitBreakerConfig::default(), executor.clone(), None);

    let job_id = submit(&h.orchestrator, "run-1").await;
    let job = wait_terminal(&h.orchestrator, &job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(executor.calls(), 2);
    assert_eq!(job.last_error.unwrap().code, ErrorCode::TimeoutError);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn running_job_can_be_cancelled() {
    let executor = Scripted::new(|_| Step::Block);
    let h = harness(executor.clone());

    let job_id = submit(&h.orchestrator, "run-1").await;
    wait_until(&h.orchestrator, &job_id, |job| job.status == JobStatus::Running).await;

    assert!(h.orchestrator.cancel_job(&job_id).await.unwrap());
    let job = wait_terminal(&h.orchestrator, &job_id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(h.results.result_for(&job_id).is_none());
    assert!(h.results.failures().is_empty());

    // already terminal
    assert!(!h.orchestrator.cancel_job(&job_id).await.unwrap());
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn queued_job_is_cancelled_without_running() {
    let executor = Scripted::new(|_| Step::Block);
    let cfg = OrchestratorConfig {
        max_concurrent_jobs: 1,
        ..config()
    };
    let h = harness_with(cfg, CircuitBreakerConfig::default(), executor.clone(), None);

    let first = submit(&h.orchestrator, "run-1").await;
    wait_until(&h.orchestrator, &first, |job| job.status == JobStatus::Running).await;
    let second = submit(&h.orchestrator, "run-2").await;

    assert!(h.orchestrator.cancel_job(&second).await.unwrap());
    let job = h.orchestrator.get_job(&second).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);

    assert!(h.orchestrator.cancel_job(&first).await.unwrap());
    wait_terminal(&h.orchestrator, &first).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executor.started(), vec![first]);
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn cancelling_an_unknown_job_is_an_error() {
    let h = harness(Scripted::new(|_| Step::Succeed));
    let err = h.orchestrator.cancel_job("missing").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::JobNotFound(_)));
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn jobs_start_in_order_within_the_concurrency_limit() {
    let executor = Scripted::new(|_| Step::Sleep(Duration::from_secs(1)));
    let h = harness(executor.clone());

    let mut ids = Vec::new();
    for n in 0..4 {
        ids.push(submit(&h.orchestrator, &format!("run-{}", n)).await);
    }
    for id in &ids {
        assert_eq!(wait_terminal(&h.orchestrator, id).await.status, JobStatus::Completed);
    }

    assert_eq!(executor.peak.load(Ordering::SeqCst), 2);
    assert_eq!(executor.started(), ids);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn persistence_is_retried_without_recomputing() {
    let executor = Scripted::new(|_| Step::Succeed);
    let flaky = Arc::new(FlakyResults {
        inner: InMemoryResultStore::new(),
        failing: Some(2),
        saves: AtomicU32::new(0),
    });
    let h = harness_with(
        config(),
        CircuitBreakerConfig::default(),
        executor.clone(),
        Some(flaky.clone()),
    );

    let job_id = submit(&h.orchestrator, "run-1").await;
    let job = wait_terminal(&h.orchestrator, &job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.retry_count, 2);
    assert_eq!(executor.calls(), 1);
    assert!(flaky.inner.result_for(&job_id).is_some());
    assert_eq!(h.orchestrator.circuit_breaker().state(), CircuitState::Closed);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_during_persistence_leaves_scenario_open() {
    let executor = Scripted::new(|_| Step::Succeed);
    let slow = Arc::new(SlowResults {
        inner: InMemoryResultStore::new(),
        delay: Duration::from_secs(5),
    });
    let h = harness_with(
        config(),
        CircuitBreakerConfig::default(),
        executor.clone(),
        Some(slow.clone()),
    );

    let job_id = submit(&h.orchestrator, "run-1").await;
    wait_until(&h.orchestrator, &job_id, |job| job.progress == 90).await;
    assert!(h.orchestrator.cancel_job(&job_id).await.unwrap());

    let job = wait_terminal(&h.orchestrator, &job_id).await;
    assert_eq!(job.status, JobStatus::Cancelled);

    // let the in-flight save finish
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(slow.inner.result_for(&job_id).is_some());
    assert_ne!(h.scenarios.status_of("s1"), Some(ScenarioStatus::Completed));
    assert!(h
        .audit
        .events()
        .iter()
        .all(|event| event.action != "optimization_completed"));
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_starts_progress_over() {
    let executor = Arc::new(FailsLate {
        calls: AtomicU32::new(0),
    });
    let h = harness_with(config(), CircuitBreakerConfig::default(), executor.clone(), None);

    let job_id = submit(&h.orchestrator, "run-1").await;
    let job = wait_until(&h.orchestrator, &job_id, |job| {
        job.retry_count == 1 && job.status == JobStatus::Running && job.progress == 20
    })
    .await;
    assert_eq!(job.current_step, "loading inputs");
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

    assert!(h.orchestrator.cancel_job(&job_id).await.unwrap());
    assert_eq!(wait_terminal(&h.orchestrator, &job_id).await.status, JobStatus::Cancelled);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failing_result_store_opens_the_circuit() {
    let executor = Scripted::new(|_| Step::Succeed);
    let flaky = Arc::new(FlakyResults {
        inner: InMemoryResultStore::new(),
        failing: None,
        saves: AtomicU32::new(0),
    });
    let breaker = CircuitBreakerConfig {
        failure_threshold: 2,
        recovery_timeout_ms: 60_000,
    };
    let h = harness_with(config(), breaker, executor.clone(), Some(flaky.clone()));

    let job_id = submit(&h.orchestrator, "run-1").await;
    let job = wait_terminal(&h.orchestrator, &job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 3);
    // later attempts are rejected by the open circuit without touching the store
    assert_eq!(flaky.saves.load(Ordering::SeqCst), 2);
    assert_eq!(job.last_error.unwrap().code, ErrorCode::ResourceError);
    assert_eq!(h.orchestrator.circuit_breaker().state(), CircuitState::Open);
    h.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn sweep_removes_only_expired_terminal_jobs() {
    let h = harness(Scripted::new(|_| Step::Succeed));
    let job_id = submit(&h.orchestrator, "run-1").await;
    wait_terminal(&h.orchestrator, &job_id).await;

    let now = chrono::Utc::now();
    assert_eq!(h.orchestrator.sweep_expired_at(now).await.unwrap(), 0);
    let later = now + chrono::Duration::hours(25);
    assert_eq!(h.orchestrator.sweep_expired_at(later).await.unwrap(), 1);
    assert!(h.orchestrator.get_job(&job_id).await.unwrap().is_none());
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn rejects_requests_after_shutdown_or_without_ids() {
    let h = harness(Scripted::new(|_| Step::Succeed));
    let err = h
        .orchestrator
        .add_job("s1", " ", ResultType::Transport, JobParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidRequest(_)));

    h.orchestrator.shutdown().await;
    let err = h
        .orchestrator
        .add_job("s1", "run-1", ResultType::Transport, JobParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotRunning));
}
