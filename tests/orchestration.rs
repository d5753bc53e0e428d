use std::path::Path;
use std::time::{Duration, Instant};

use lockstep::types::JoinPolicy;
use lockstep::types::WorkerSpec;
use lockstep_test_utils::{ScenarioBuilder, init_tracing, with_timeout};
use serde_json::json;

#[test]
fn worker_entry() {
    lockstep_test_utils::serve_worker();
}

struct Record {
    event: String,
    micros: u128,
    worker: String,
}

fn read_records(path: &Path) -> Vec<Record> {
    std::fs::read_to_string(path)
        .expect("read record file")
        .lines()
        .map(|line| {
            let parts: Vec<_> = line.split_whitespace().collect();
            Record {
                event: parts[0].to_string(),
                micros: parts[1].parse().expect("timestamp"),
                worker: parts[2].to_string(),
            }
        })
        .collect()
}

#[tokio::test]
async fn disjoint_contributions_are_merged_into_their_union() {
    init_tracing();

    let union = json!({ "a": 1, "b": "two", "c": [3] });
    let coordinator = ScenarioBuilder::new()
        .probe(
            "first",
            json!({ "contribute": { "a": 1 }, "expect_shared": union }),
        )
        .probe(
            "second",
            json!({ "contribute": { "b": "two" }, "expect_shared": union }),
        )
        .probe(
            "third",
            json!({ "contribute": { "c": [3] }, "expect_shared": union }),
        )
        .build();

    with_timeout(coordinator.run()).await.expect("run succeeds");
}

#[tokio::test]
async fn later_registered_worker_wins_key_collisions() {
    init_tracing();

    let coordinator = ScenarioBuilder::new()
        .probe(
            "early",
            json!({ "contribute": { "port": 1, "host": "a" }, "expect_shared": { "port": 2, "host": "a" } }),
        )
        .probe(
            "late",
            json!({ "contribute": { "port": 2 }, "expect_shared": { "port": 2, "host": "a" } }),
        )
        .build();
    with_timeout(coordinator.run()).await.expect("later value wins");

    // Same contributions, registered the other way round.
    let coordinator = ScenarioBuilder::new()
        .probe(
            "late",
            json!({ "contribute": { "port": 2 }, "expect_shared": { "port": 1 } }),
        )
        .probe(
            "early",
            json!({ "contribute": { "port": 1, "host": "a" }, "expect_shared": { "port": 1 } }),
        )
        .build();
    with_timeout(coordinator.run()).await.expect("order decides");
}

#[tokio::test]
async fn seeded_initial_options_and_shared_options_reach_the_worker() {
    init_tracing();

    let coordinator = ScenarioBuilder::new()
        .worker(WorkerSpec::new("seeded"))
        .initial(json!({ "x": 0 }))
        .build();

    with_timeout(coordinator.run()).await.expect("worker saw both maps");
}

#[tokio::test]
async fn seeded_worker_fails_without_the_seed() {
    init_tracing();

    let coordinator = ScenarioBuilder::new()
        .worker(WorkerSpec::new("seeded"))
        .build();

    let err = with_timeout(coordinator.run()).await.unwrap_err();
    let failure = err.as_remote().expect("worker failure");
    assert_eq!(failure.worker(), "seeded");
    assert!(failure.message().contains("initial options"));
}

#[tokio::test]
async fn nobody_runs_before_everybody_is_ready() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("events.log");

    let coordinator = ScenarioBuilder::new()
        .probe("fast", json!({ "record": record }))
        .probe("slow", json!({ "record": record, "setup_sleep": 0.6 }))
        .probe("medium", json!({ "record": record, "setup_sleep": 0.2 }))
        .build();

    with_timeout(coordinator.run()).await.expect("run succeeds");

    let records = read_records(&record);
    let ready: Vec<_> = records.iter().filter(|r| r.event == "ready").collect();
    let run: Vec<_> = records.iter().filter(|r| r.event == "run").collect();
    assert_eq!(ready.len(), 3);
    assert_eq!(run.len(), 3);

    let last_ready = ready.iter().map(|r| r.micros).max().unwrap();
    let first_run = run.iter().min_by_key(|r| r.micros).unwrap();
    assert!(
        first_run.micros > last_ready,
        "{} started running before every worker was ready",
        first_run.worker
    );
}

#[tokio::test]
async fn first_exit_policy_stops_long_running_helpers() {
    init_tracing();

    let coordinator = ScenarioBuilder::new()
        .probe("server", json!({ "sleep": 30.0 }))
        .probe("main", json!({ "sleep": 0.1 }))
        .join(JoinPolicy::FirstExit)
        .build();

    let started = Instant::now();
    with_timeout(coordinator.run()).await.expect("main exits cleanly");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn a_coordinator_can_run_more_than_once() {
    init_tracing();

    let coordinator = ScenarioBuilder::new()
        .probe("only", json!({ "contribute": { "k": "v" }, "expect_shared": { "k": "v" } }))
        .build();

    with_timeout(coordinator.run()).await.expect("first run");
    with_timeout(coordinator.run()).await.expect("second run");
}
