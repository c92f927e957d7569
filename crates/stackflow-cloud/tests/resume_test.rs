//! Persisted ledger: resume after failure, crash recovery and locking

mod common;

use common::{MockGateway, Step, bucket, fast_config, graph, web_tier};
use stackflow_cloud::{
    CloudError, DependencyGraph, LedgerStore, ProvisioningEngine, ResourceStatus, RunLedger,
    RunStatus,
};
use std::sync::Arc;
use tempfile::TempDir;

fn engine(mock: &Arc<MockGateway>, dir: &TempDir) -> ProvisioningEngine {
    ProvisioningEngine::new(mock.clone(), fast_config()).with_store(LedgerStore::new(dir.path()))
}

#[tokio::test]
async fn test_resume_continues_after_partial_failure() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockGateway::new());
    mock.script("instance", &[Step::Permanent, Step::Succeed]);
    let graph = graph(web_tier());

    let first = engine(&mock, &dir).resume(&graph).await.unwrap();
    assert_eq!(first.status, RunStatus::PartialFailure);
    assert!(dir.path().join("ledger.json").exists());
    assert!(!dir.path().join("lock.json").exists());

    let created_before = mock.creates().len();
    let second = engine(&mock, &dir).resume(&graph).await.unwrap();
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(
        mock.creates()[created_before..],
        ["instance", "target-group", "listener"]
    );

    let ledger = LedgerStore::new(dir.path()).load().await.unwrap();
    assert_eq!(ledger.run, 2);
    assert_eq!(ledger.status("listener"), Some(ResourceStatus::Ready));
    // The bucket kept its first-run Ready transition and gained nothing since
    assert!(ledger.transitions("bucket").iter().all(|t| t.run == 1));
}

#[tokio::test]
async fn test_crashed_in_progress_node_is_provisioned_again() {
    let dir = TempDir::new().unwrap();
    let graph = graph(vec![bucket("logs"), bucket("assets")]);
    let store = LedgerStore::new(dir.path());

    // Simulate a process that died mid-attempt
    let mut ledger = RunLedger::new();
    ledger.begin_run(&graph);
    ledger.mark_in_progress("assets").unwrap();
    ledger.mark_ready("assets", "assets-id").unwrap();
    ledger.mark_in_progress("logs").unwrap();
    store.save(&ledger).await.unwrap();

    let mock = Arc::new(MockGateway::new());
    let report = engine(&mock, &dir).resume(&graph).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(mock.creates(), ["logs"]);
    assert_eq!(report.resource("logs").unwrap().attempt, 1);
}

/// Leave a ledger and lock behind the way a killed process would
async fn crash_mid_attempt(store: &LedgerStore, graph: &DependencyGraph) {
    let lock = store.acquire_lock().await.unwrap();
    let mut ledger = RunLedger::new();
    ledger.begin_run(graph);
    ledger.mark_in_progress("logs").unwrap();
    store.save(&ledger).await.unwrap();
    std::mem::forget(lock);
}

#[cfg(unix)]
#[tokio::test]
async fn test_lock_left_by_killed_process_does_not_block_resume() {
    let dir = TempDir::new().unwrap();
    let graph = graph(vec![bucket("logs")]);
    let store = LedgerStore::new(dir.path());
    crash_mid_attempt(&store, &graph).await;

    // The lock names this process; point it at one that has exited
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();
    let lock_path = dir.path().join("lock.json");
    let mut info: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&lock_path).unwrap()).unwrap();
    info["pid"] = serde_json::json!(dead_pid);
    std::fs::write(&lock_path, info.to_string()).unwrap();

    let mock = Arc::new(MockGateway::new());
    let report = engine(&mock, &dir).resume(&graph).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(mock.creates(), ["logs"]);
    assert!(!lock_path.exists());
}

#[tokio::test]
async fn test_force_unlock_recovers_a_leaked_lock() {
    let dir = TempDir::new().unwrap();
    let graph = graph(vec![bucket("logs")]);
    let store = LedgerStore::new(dir.path());
    crash_mid_attempt(&store, &graph).await;

    let mock = Arc::new(MockGateway::new());
    let err = engine(&mock, &dir).resume(&graph).await.unwrap_err();
    assert!(matches!(err, CloudError::LockError(_)));

    assert!(store.force_unlock().await.unwrap());
    let report = engine(&mock, &dir).resume(&graph).await.unwrap();
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.resource("logs").unwrap().attempt, 1);
}

#[tokio::test]
async fn test_held_lock_blocks_a_second_run() {
    let dir = TempDir::new().unwrap();
    let graph = graph(web_tier());
    let _lock = LedgerStore::new(dir.path()).acquire_lock().await.unwrap();

    let mock = Arc::new(MockGateway::new());
    let err = engine(&mock, &dir).resume(&graph).await.unwrap_err();

    assert!(matches!(err, CloudError::LockError(_)));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_resume_requires_a_store() {
    let mock = Arc::new(MockGateway::new());
    let engine = ProvisioningEngine::new(mock, fast_config());
    let err = engine.resume(&graph(web_tier())).await.unwrap_err();
    assert!(matches!(err, CloudError::StateError(_)));
}

#[tokio::test]
async fn test_resume_filter_lists_remaining_work() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockGateway::new());
    mock.script("instance", &[Step::Permanent]);
    let graph = graph(web_tier());

    engine(&mock, &dir).resume(&graph).await.unwrap();

    let ledger = LedgerStore::new(dir.path()).load().await.unwrap();
    let remaining: Vec<&str> = ledger
        .resume_filter(&graph)
        .iter()
        .map(|d| d.name.as_str())
        .collect();
    assert_eq!(remaining, ["instance", "target-group", "listener"]);
}
