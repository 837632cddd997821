// Infrastructure: in-process collaborators
// Used by the runner binary and tests; state does not survive the process.

use crate::application::{
    AuditEvent, AuditLog, FailureRecord, JobStore, OptimizationJob, ResultRecord, ResultStore,
    Scenario, ScenarioStatus, ScenarioStore, StoreError, StoreResult,
};
use crate::domain::{GeoPoint, LocationLookup};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, OptimizationJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: OptimizationJob) -> StoreResult<()> {
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn update(&self, job: &OptimizationJob) -> StoreResult<()> {
        match lock(&self.jobs).get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("job {}", job.id))),
        }
    }

    async fn get(&self, job_id: &str) -> StoreResult<Option<OptimizationJob>> {
        Ok(lock(&self.jobs).get(job_id).cloned())
    }

    async fn find_by_run_id(&self, run_id: &str) -> StoreResult<Option<OptimizationJob>> {
        // latest submission wins when a run id was reused
        Ok(lock(&self.jobs)
            .values()
            .filter(|job| job.run_id == run_id)
            .max_by_key(|job| job.created_at)
            .cloned())
    }

    async fn list_for_scenario(&self, scenario_id: &str) -> StoreResult<Vec<OptimizationJob>> {
        let mut jobs: Vec<OptimizationJob> = lock(&self.jobs)
            .values()
            .filter(|job| job.scenario_id == scenario_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn list(&self) -> StoreResult<Vec<OptimizationJob>> {
        Ok(lock(&self.jobs).values().cloned().collect())
    }

    async fn remove(&self, job_id: &str) -> StoreResult<bool> {
        Ok(lock(&self.jobs).remove(job_id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryScenarioStore {
    scenarios: Mutex<HashMap<String, Scenario>>,
}

impl InMemoryScenarioStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, name: impl Into<String>) {
        let id = id.into();
        lock(&self.scenarios).insert(
            id.clone(),
            Scenario {
                id,
                name: name.into(),
                status: ScenarioStatus::Draft,
            },
        );
    }

    pub fn status_of(&self, id: &str) -> Option<ScenarioStatus> {
        lock(&self.scenarios).get(id).map(|s| s.status)
    }
}

#[async_trait]
impl ScenarioStore for InMemoryScenarioStore {
    async fn get_scenario(&self, scenario_id: &str) -> StoreResult<Option<Scenario>> {
        Ok(lock(&self.scenarios).get(scenario_id).cloned())
    }

    async fn update_status(&self, scenario_id: &str, status: ScenarioStatus) -> StoreResult<()> {
        match lock(&self.scenarios).get_mut(scenario_id) {
            Some(scenario) => {
                scenario.status = status;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("scenario {}", scenario_id))),
        }
    }
}

#[derive(Default)]
pub struct InMemoryResultStore {
    results: Mutex<HashMap<String, ResultRecord>>,
    failures: Mutex<Vec<FailureRecord>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result_for(&self, job_id: &str) -> Option<ResultRecord> {
        lock(&self.results).get(job_id).cloned()
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        lock(&self.failures).clone()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save_result(&self, record: ResultRecord) -> StoreResult<()> {
        lock(&self.results).insert(record.job_id.clone(), record);
        Ok(())
    }

    async fn record_failure(&self, record: FailureRecord) -> StoreResult<()> {
        lock(&self.failures).push(record);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        lock(&self.events).clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record(&self, event: AuditEvent) -> StoreResult<()> {
        lock(&self.events).push(event);
        Ok(())
    }
}

/// Name → coordinates table. Lookups ignore case and surrounding spaces.
#[derive(Debug, Clone, Default)]
pub struct StaticLocationLookup {
    points: HashMap<String, GeoPoint>,
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl StaticLocationLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, lat: f64, lon: f64) -> Self {
        self.insert(name, GeoPoint::new(lat, lon));
        self
    }

    pub fn insert(&mut self, name: &str, point: GeoPoint) {
        self.points.insert(normalize(name), point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Major US distribution markets
    pub fn us_cities() -> Self {
        [
            ("Atlanta", 33.7490, -84.3880),
            ("Boston", 42.3601, -71.0589),
            ("Charlotte", 35.2271, -80.8431),
            ("Chicago", 41.8781, -87.6298),
            ("Columbus", 39.9612, -82.9988),
            ("Dallas", 32.7767, -96.7970),
            ("Denver", 39.7392, -104.9903),
            ("Detroit", 42.3314, -83.0458),
            ("Houston", 29.7604, -95.3698),
            ("Indianapolis", 39.7684, -86.1581),
            ("Kansas City", 39.0997, -94.5786),
            ("Las Vegas", 36.1699, -115.1398),
            ("Los Angeles", 34.0522, -118.2437),
            ("Memphis", 35.1495, -90.0490),
            ("Miami", 25.7617, -80.1918),
            ("Minneapolis", 44.9778, -93.2650),
            ("Nashville", 36.1627, -86.7816),
            ("New York", 40.7128, -74.0060),
            ("Philadelphia", 39.9526, -75.1652),
            ("Phoenix", 33.4484, -112.0740),
            ("Pittsburgh", 40.4406, -79.9959),
            ("Portland", 45.5152, -122.6784),
            ("Salt Lake City", 40.7608, -111.8910),
            ("San Francisco", 37.7749, -122.4194),
            ("Seattle", 47.6062, -122.3321),
            ("St. Louis", 38.6270, -90.1994),
        ]
        .into_iter()
        .fold(Self::new(), |table, (name, lat, lon)| table.with(name, lat, lon))
    }
}

impl LocationLookup for StaticLocationLookup {
    fn locate(&self, name: &str) -> Option<GeoPoint> {
        self.points.get(&normalize(name)).copied()
    }
}
