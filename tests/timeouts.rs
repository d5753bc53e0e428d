use std::sync::Arc;
use std::time::{Duration, Instant};

use lockstep::coordinator::run_isolated;
use lockstep::errors::LockstepError;
use lockstep::types::WorkerSpec;
use lockstep_test_utils::{
    ScenarioBuilder, ValueError, assert_gone, init_tracing, launcher, recorded_pids, registry,
    with_timeout,
};
use serde_json::json;

#[test]
fn worker_entry() {
    lockstep_test_utils::serve_worker();
}

#[tokio::test]
async fn runtime_timeout_fires_long_before_the_worker_finishes() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("events.log");

    let coordinator = ScenarioBuilder::new()
        .probe("sleeper", json!({ "record": record, "sleep": 2.0 }))
        .probe("napper", json!({ "record": record, "sleep": 3.0 }))
        .runtime_timeout(0.5)
        .build();

    let started = Instant::now();
    let err = with_timeout(coordinator.run()).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(
        matches!(err, LockstepError::RuntimeTimeout { limit } if limit == Duration::from_millis(500)),
        "unexpected error: {err}"
    );
    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(500), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1900), "returned after {elapsed:?}");

    let pids = recorded_pids(&record);
    assert_eq!(pids.len(), 2);
    assert_gone(&pids);
}

#[tokio::test]
async fn leftover_grandchild_holding_stdout_does_not_stall_the_runtime_timeout() {
    init_tracing();

    let coordinator = ScenarioBuilder::new()
        .probe("spawner", json!({ "orphan": 20.0 }))
        .probe("sleeper", json!({ "sleep": 10.0 }))
        .runtime_timeout(0.5)
        .build();

    let started = Instant::now();
    let err = with_timeout(coordinator.run()).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(
        matches!(err, LockstepError::RuntimeTimeout { .. }),
        "unexpected error: {err}"
    );
    assert!(elapsed < Duration::from_millis(1900), "returned after {elapsed:?}");
}

#[tokio::test]
async fn runs_finishing_inside_the_budget_succeed() {
    init_tracing();

    let coordinator = ScenarioBuilder::new()
        .probe("quick", json!({ "sleep": 0.1 }))
        .probe("quicker", json!({}))
        .runtime_timeout(10.0)
        .build();

    with_timeout(coordinator.run()).await.expect("within budget");
}

#[tokio::test]
async fn slow_contribution_is_a_channel_timeout_naming_the_worker() {
    init_tracing();

    let coordinator = ScenarioBuilder::new()
        .probe("prompt", json!({}))
        .probe("dawdler", json!({ "contribute_sleep": 10.0 }))
        .operation_timeout(0.5)
        .build();

    let started = Instant::now();
    let err = with_timeout(coordinator.run()).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));

    match err {
        LockstepError::ChannelTimeout { worker, operation } => {
            assert_eq!(worker, "dawdler");
            assert_eq!(operation, "receive contribution");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn readiness_barrier_can_be_bounded() {
    init_tracing();

    let coordinator = ScenarioBuilder::new()
        .probe("ready", json!({}))
        .probe("stuck", json!({ "setup_sleep": 10.0 }))
        .ready_timeout(0.5)
        .build();

    let err = with_timeout(coordinator.run()).await.unwrap_err();
    match err {
        LockstepError::ChannelTimeout { worker, operation } => {
            assert_eq!(worker, "stuck");
            assert_eq!(operation, "await readiness");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn isolated_worker_success_and_failure() {
    init_tracing();
    let registry = Arc::new(registry());

    with_timeout(run_isolated(
        Arc::clone(&registry),
        launcher(),
        WorkerSpec::new("probe").args(json!({ "sleep": 0.05 })),
        Duration::from_secs(10),
    ))
    .await
    .expect("isolated run succeeds");

    let err = with_timeout(run_isolated(
        Arc::clone(&registry),
        launcher(),
        WorkerSpec::new("probe").args(json!({ "fail_at": "run", "message": "nope" })),
        Duration::from_secs(10),
    ))
    .await
    .unwrap_err();
    let failure = err.as_remote().expect("worker failure");
    assert_eq!(failure.downcast_ref::<ValueError>(), Some(&ValueError("nope".into())));
}

#[tokio::test]
async fn isolated_worker_overrunning_its_limit_times_out() {
    init_tracing();

    let err = with_timeout(run_isolated(
        Arc::new(registry()),
        launcher(),
        WorkerSpec::new("probe").args(json!({ "sleep": 30.0 })),
        Duration::from_millis(300),
    ))
    .await
    .unwrap_err();
    assert!(matches!(err, LockstepError::RuntimeTimeout { .. }), "unexpected error: {err}");
}
