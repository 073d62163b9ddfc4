//! Health monitor tests

mod support;

use std::time::Duration;

use suitectl::deploy::health::{wait_healthy, HealthMonitor, HealthTarget, HealthVerdict};
use suitectl::errors::OrchestratorError;

use support::{instant_sleep, FakeExecutor};

#[tokio::test]
async fn test_unhealthy_fails_without_sleeping() {
    let executor = FakeExecutor::new();
    executor.script_health("crm", &[HealthVerdict::Unhealthy]);
    let (sleep_fn, slept) = instant_sleep();

    let outcome = wait_healthy(
        executor.as_ref(),
        "crm",
        Duration::from_secs(10),
        Duration::from_secs(5),
        &sleep_fn,
    )
    .await;

    assert_eq!(outcome.verdict, HealthVerdict::Unhealthy);
    assert_eq!(outcome.polls, 1);
    assert!(slept.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_starting_then_healthy() {
    let executor = FakeExecutor::new();
    executor.script_health(
        "core",
        &[HealthVerdict::Starting, HealthVerdict::Starting, HealthVerdict::Healthy],
    );
    let (sleep_fn, slept) = instant_sleep();

    let outcome = wait_healthy(
        executor.as_ref(),
        "core",
        Duration::from_secs(60),
        Duration::from_secs(5),
        &sleep_fn,
    )
    .await;

    assert!(outcome.is_healthy());
    assert_eq!(outcome.polls, 3);
    assert_eq!(outcome.waited, Duration::from_secs(10));
    assert_eq!(*slept.lock().unwrap(), vec![Duration::from_secs(5); 2]);
}

#[tokio::test]
async fn test_timeout_reports_last_verdict() {
    let executor = FakeExecutor::new();
    executor.script_health("items", &[HealthVerdict::Starting]);
    let (sleep_fn, slept) = instant_sleep();

    let outcome = wait_healthy(
        executor.as_ref(),
        "items",
        Duration::from_secs(10),
        Duration::from_secs(4),
        &sleep_fn,
    )
    .await;

    assert_eq!(outcome.verdict, HealthVerdict::Starting);
    assert_eq!(outcome.waited, Duration::from_secs(10));
    // The last sleep is cut to the remaining budget
    assert_eq!(
        *slept.lock().unwrap(),
        vec![Duration::from_secs(4), Duration::from_secs(4), Duration::from_secs(2)]
    );
}

#[tokio::test]
async fn test_no_healthcheck_counts_as_ready() {
    let executor = FakeExecutor::new();
    executor.script_health("redis", &[HealthVerdict::NoHealthcheck]);
    let (sleep_fn, _) = instant_sleep();

    let outcome = wait_healthy(
        executor.as_ref(),
        "redis",
        Duration::from_secs(10),
        Duration::from_secs(5),
        &sleep_fn,
    )
    .await;
    assert!(outcome.is_healthy());
}

#[tokio::test]
async fn test_missing_container_is_not_found() {
    let executor = FakeExecutor::new();
    let (sleep_fn, slept) = instant_sleep();

    let outcome = wait_healthy(
        executor.as_ref(),
        "bp",
        Duration::from_secs(10),
        Duration::from_secs(5),
        &sleep_fn,
    )
    .await;
    assert_eq!(outcome.verdict, HealthVerdict::NotFound);
    assert!(slept.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_monitor_fails_with_unhealthy_service() {
    let executor = FakeExecutor::new();
    executor.seed_running(&[("core", "ghcr.io/suite/core:1.0.0")]);
    executor.script_health("crm", &[HealthVerdict::Starting, HealthVerdict::Unhealthy]);
    let (sleep_fn, _) = instant_sleep();
    let monitor = HealthMonitor::new(executor.clone(), Duration::from_secs(5), sleep_fn);

    let targets = vec![
        HealthTarget {
            service: "core".to_string(),
            timeout: Duration::from_secs(180),
        },
        HealthTarget {
            service: "crm".to_string(),
            timeout: Duration::from_secs(90),
        },
    ];
    let err = monitor.verify(&targets).await.unwrap_err();

    match &err {
        OrchestratorError::HealthTimeout { service, verdict } => {
            assert_eq!(service, "crm");
            assert_eq!(*verdict, HealthVerdict::Unhealthy);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(err.exit_code(), 6);
}
