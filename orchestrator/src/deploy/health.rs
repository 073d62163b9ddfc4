//! Container health monitoring

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::deploy::executor::Executor;
use crate::errors::OrchestratorError;

/// Executor-reported readiness of one container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    Healthy,
    Unhealthy,
    Starting,
    NotFound,
    /// Running, but the container declares no health check
    NoHealthcheck,
}

impl HealthVerdict {
    /// The container is ready to serve
    pub fn is_success(&self) -> bool {
        matches!(self, HealthVerdict::Healthy | HealthVerdict::NoHealthcheck)
    }

    /// No point in polling further
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, HealthVerdict::Unhealthy | HealthVerdict::NotFound)
    }
}

impl fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthVerdict::Healthy => "healthy",
            HealthVerdict::Unhealthy => "unhealthy",
            HealthVerdict::Starting => "starting",
            HealthVerdict::NotFound => "not_found",
            HealthVerdict::NoHealthcheck => "no_healthcheck",
        };
        write!(f, "{}", s)
    }
}

/// Result of waiting on one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthOutcome {
    pub service: String,
    /// Last verdict seen
    pub verdict: HealthVerdict,
    pub polls: u32,
    /// Time spent sleeping between polls
    pub waited: Duration,
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        self.verdict.is_success()
    }
}

/// Injected sleep, so polling can run against a fake clock
pub type SleepFn = Arc<dyn Fn(Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Sleep on the tokio timer
pub fn tokio_sleep() -> SleepFn {
    Arc::new(|duration: Duration| -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    })
}

/// Poll `service` every `interval` until it is healthy, fails, or `timeout` elapses.
///
/// `unhealthy` and `not_found` end the wait immediately. A container without a
/// health check counts as healthy once the executor reports it running.
pub async fn wait_healthy(
    executor: &dyn Executor,
    service: &str,
    timeout: Duration,
    interval: Duration,
    sleep_fn: &SleepFn,
) -> HealthOutcome {
    let mut verdict = HealthVerdict::Starting;
    let mut polls = 0;
    let mut waited = Duration::ZERO;

    loop {
        polls += 1;
        match executor.health(service).await {
            Ok(v) => verdict = v,
            Err(e) => warn!("Health probe for {} failed: {}", service, e),
        }
        debug!("Health of {} after {:?}: {}", service, waited, verdict);

        if verdict.is_success() || verdict.is_terminal_failure() || waited >= timeout {
            break;
        }

        let step = interval.min(timeout - waited).max(Duration::from_millis(1));
        sleep_fn(step).await;
        waited += step;
    }

    HealthOutcome {
        service: service.to_string(),
        verdict,
        polls,
        waited,
    }
}

/// Health budget for one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthTarget {
    pub service: String,
    pub timeout: Duration,
}

/// Verifies a set of services against their budgets
#[derive(Clone)]
pub struct HealthMonitor {
    executor: Arc<dyn Executor>,
    interval: Duration,
    sleep_fn: SleepFn,
}

impl HealthMonitor {
    pub fn new(executor: Arc<dyn Executor>, interval: Duration, sleep_fn: SleepFn) -> Self {
        Self {
            executor,
            interval,
            sleep_fn,
        }
    }

    /// Wait on a single service
    pub async fn wait(&self, service: &str, timeout: Duration) -> HealthOutcome {
        wait_healthy(self.executor.as_ref(), service, timeout, self.interval, &self.sleep_fn).await
    }

    /// Wait on every target concurrently; fail with the first unhealthy one
    pub async fn verify(&self, targets: &[HealthTarget]) -> Result<Vec<HealthOutcome>, OrchestratorError> {
        let outcomes = join_all(
            targets
                .iter()
                .map(|target| self.wait(&target.service, target.timeout)),
        )
        .await;

        for outcome in &outcomes {
            if outcome.is_healthy() {
                info!("{} is {}", outcome.service, outcome.verdict);
            } else {
                warn!(
                    "{} failed health verification after {} polls: {}",
                    outcome.service, outcome.polls, outcome.verdict
                );
            }
        }

        if let Some(failed) = outcomes.iter().find(|o| !o.is_healthy()) {
            return Err(OrchestratorError::HealthTimeout {
                service: failed.service.clone(),
                verdict: failed.verdict,
            });
        }
        Ok(outcomes)
    }
}
