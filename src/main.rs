use anyhow::{bail, Context};
use clap::Parser;
use netplan::application::{
    Collaborators, JobOrchestrator, JobParams, JobStatus, OptimizationRunner, ResultType,
};
use netplan::domain::{GeoPoint, SolverBackend};
use netplan::infrastructure::{
    logging, AppConfig, InMemoryAuditLog, InMemoryJobStore, InMemoryResultStore,
    InMemoryScenarioStore, StaticLocationLookup,
};
use netplan::solver::SolverFactory;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Run one network planning job and print its result as JSON
#[derive(Debug, Parser)]
#[command(name = "netplan-runner", version)]
struct Cli {
    /// Job request (JSON)
    request: PathBuf,

    /// Configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Solver backend, overrides configuration
    #[arg(long)]
    solver: Option<SolverBackend>,
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    scenario_id: String,
    #[serde(default)]
    scenario_name: Option<String>,
    run_id: String,
    result_type: ResultType,
    #[serde(default)]
    params: JobParams,
    /// Extra locations on top of the built-in city table
    #[serde(default)]
    locations: BTreeMap<String, GeoPoint>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(backend) = cli.solver {
        config.solver.backend = backend;
    }
    logging::init(&config.log_filter);

    let raw = std::fs::read_to_string(&cli.request)
        .with_context(|| format!("reading {}", cli.request.display()))?;
    let request: RunRequest = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", cli.request.display()))?;

    let solver = SolverFactory::create(config.solver.backend, &config.solver.random_search);
    info!(solver = solver.name(), exact = solver.is_exact(), "solver selected");

    let mut lookup = StaticLocationLookup::us_cities();
    for (name, point) in &request.locations {
        lookup.insert(name, *point);
    }

    let scenarios = Arc::new(InMemoryScenarioStore::new());
    scenarios.insert(
        request.scenario_id.clone(),
        request
            .scenario_name
            .clone()
            .unwrap_or_else(|| request.scenario_id.clone()),
    );
    let results = Arc::new(InMemoryResultStore::new());
    let collaborators = Collaborators {
        jobs: Arc::new(InMemoryJobStore::new()),
        scenarios: scenarios.clone(),
        results: results.clone(),
        audit: Arc::new(InMemoryAuditLog::new()),
    };
    let runner = OptimizationRunner::new(solver, Arc::new(lookup), scenarios);
    let orchestrator = JobOrchestrator::new(
        config.orchestrator.clone(),
        config.circuit_breaker.clone(),
        collaborators,
        Arc::new(runner),
    );
    orchestrator.start();

    let job_id = orchestrator
        .add_job(
            &request.scenario_id,
            &request.run_id,
            request.result_type,
            request.params,
        )
        .await?;

    let job = loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let Some(job) = orchestrator.get_job(&job_id).await? else {
            bail!("job {} disappeared from the job store", job_id);
        };
        if job.status.is_terminal() {
            break job;
        }
    };
    orchestrator.shutdown().await;

    let output = serde_json::json!({
        "job": job,
        "result": results.result_for(&job_id).map(|record| record.outcome),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if job.status != JobStatus::Completed {
        bail!("job finished with status {}", job.status);
    }
    Ok(())
}
