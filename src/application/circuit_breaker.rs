// Circuit breaker for unstable collaborators (persistence, audit)
//
// `closed` counts consecutive failures and opens at the threshold. `open`
// rejects calls until the recovery deadline, then admits a single trial in
// `half-open`: success closes the circuit, failure reopens it with a fresh
// deadline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Circuit '{name}' is open, retry in {retry_after_ms} ms")]
pub struct CircuitOpenError {
    pub name: String,
    pub retry_after_ms: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    next_attempt: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// Releases the half-open trial slot if the guarded call is dropped
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                next_attempt: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.next_attempt = None;
        inner.trial_in_flight = false;
    }

    /// Run `op` through the breaker. Rejections fail fast with
    /// [`CircuitOpenError`] without calling `op`.
    pub async fn execute<T, F, Fut>(&self, op: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let is_trial = self.admit()?;
        let mut slot = TrialSlot {
            breaker: self,
            armed: is_trial,
        };

        let result = op().await;
        slot.armed = false;
        match &result {
            Ok(_) => self.on_success(),
            Err(e) => self.on_failure(e),
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether the admitted call is the half-open trial
    fn admit(&self) -> Result<bool, CircuitOpenError> {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => match inner.next_attempt {
                Some(deadline) if now < deadline => Err(self.rejection(deadline - now)),
                _ => {
                    info!(circuit = %self.name, "circuit half-open, admitting trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(true)
                }
            },
            CircuitState::HalfOpen if inner.trial_in_flight => {
                Err(self.rejection(Duration::ZERO))
            }
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(true)
            }
        }
    }

    fn rejection(&self, remaining: Duration) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
            retry_after_ms: remaining.as_millis() as u64,
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(circuit = %self.name, "circuit closed after successful trial");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.next_attempt = None;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self, error: &anyhow::Error) {
        let mut inner = self.lock();
        inner.failures += 1;
        let reopen = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if reopen {
            inner.state = CircuitState::Open;
            inner.next_attempt = Some(Instant::now() + self.config.recovery_timeout());
            inner.trial_in_flight = false;
            warn!(
                circuit = %self.name,
                failures = inner.failures,
                recovery_ms = self.config.recovery_timeout_ms,
                error = %error,
                "circuit opened"
            );
        }
    }
}
