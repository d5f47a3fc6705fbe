// tests/integration/recovery_resume.rs

#[path = "../common/mod.rs"]
mod common;

use common::{
    bundle, fake_registry, init_tracing, wait_until, with_timeout, ConfigFileBuilder, FakeAdapter,
};
use workstream::config::ConfigFile;
use workstream::ledger::{RunState, StepState};
use workstream::pool::WorkerState;
use workstream::recovery::ORPHANED_SIGNATURE;
use workstream::Workstream;

fn file_config(dir: &std::path::Path) -> ConfigFile {
    ConfigFileBuilder::new()
        .max_workers(2)
        .default_adapter("fake")
        .lock_timeout_ms(1_000)
        .state_dir(dir)
        .build()
}

#[tokio::test]
async fn crashed_run_is_recovered_and_resumed_from_disk() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cfg = file_config(dir.path());

    // First process: "a" succeeds, then the process dies while "b" runs.
    let first = FakeAdapter::new();
    first.hang_until_canceled("b");
    let crashed = Workstream::from_config(&cfg, fake_registry(&first)).unwrap();

    let orchestrator = crashed.orchestrator.clone();
    let handle = tokio::spawn(async move {
        orchestrator
            .run_bundles(vec![
                bundle("a").build(),
                bundle("b").after("a").build(),
                bundle("c").after("b").build(),
            ])
            .await
    });
    wait_until(|| first.attempts_for("b") > 0 && first.in_flight() > 0).await;
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    // Second process over the same state directory.
    let second = FakeAdapter::new();
    let restarted = Workstream::from_config(&cfg, fake_registry(&second)).unwrap();

    let report = restarted.recovery.recover_from_crash().unwrap();
    assert_eq!(report.orphaned_count, 1);
    assert_eq!(report.recovered_worker_count, 1);
    assert_eq!(report.failed_units.len(), 1);

    let queue = restarted.queue.clone().expect("file mode has a queue");
    let orphan_task = queue.get(&report.failed_units[0]).unwrap().unwrap();
    assert_eq!(orphan_task.error.as_deref(), Some(ORPHANED_SIGNATURE));
    assert_eq!(orphan_task.payload["unit_id"], "b");

    let runs = restarted.recovery.get_recoverable_runs().unwrap();
    assert_eq!(runs.len(), 1);
    let run_id = runs[0].run_id.clone();
    assert_eq!(runs[0].state, RunState::Running);

    let resumed = with_timeout(restarted.recovery.resume_execution(&run_id, 4))
        .await
        .unwrap();
    assert_eq!(resumed.run_id, run_id);
    assert_eq!(resumed.state, RunState::Succeeded);
    assert_eq!(second.executed_units(), vec!["b", "c"]);

    let ledger = restarted.orchestrator.ledger();
    let b_steps = ledger.unit_attempts(&run_id, "b").unwrap();
    assert_eq!(b_steps.len(), 2);
    assert_eq!(b_steps[0].state, StepState::Failed);
    assert_eq!(b_steps[0].error_signature.as_deref(), Some(ORPHANED_SIGNATURE));
    assert_eq!(b_steps[1].state, StepState::Succeeded);
    assert_eq!(ledger.unit_attempts(&run_id, "a").unwrap().len(), 1);
    assert_eq!(ledger.replay_run(&run_id).unwrap(), RunState::Succeeded);

    let counts = queue.counts().unwrap();
    assert_eq!((counts.running, counts.done, counts.failed), (0, 3, 1));

    {
        let pool = restarted.orchestrator.pool();
        let pool = pool.lock().unwrap();
        assert_eq!(pool.counts().busy, 0);
        assert_eq!(pool.counts().terminated, 1);
    }
    assert!(restarted.recovery.get_recoverable_runs().unwrap().is_empty());

    // Keep the crashed process's teardown handles alive until the end.
    drop(crashed);
}

#[tokio::test]
async fn recovery_on_clean_state_is_a_no_op() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cfg = file_config(dir.path());

    let adapter = FakeAdapter::new();
    let ws = Workstream::from_config(&cfg, fake_registry(&adapter)).unwrap();
    let report = with_timeout(ws.orchestrator.run_bundles(vec![bundle("only").build()]))
        .await
        .unwrap();
    assert!(report.is_success());

    let again = Workstream::from_config(&cfg, fake_registry(&adapter)).unwrap();
    let recovered = again.recovery.recover_from_crash().unwrap();
    assert_eq!(recovered.orphaned_count, 0);
    assert!(again.recovery.get_recoverable_runs().unwrap().is_empty());

    let pool = again.orchestrator.pool();
    let pool = pool.lock().unwrap();
    assert_eq!(pool.counts().idle, 1);
    assert!(pool.workers().all(|w| w.state != WorkerState::Busy));
}

#[tokio::test]
async fn memory_mode_has_no_queue() {
    let cfg = ConfigFileBuilder::new().default_adapter("fake").in_memory().build();
    let adapter = FakeAdapter::new();
    let ws = Workstream::from_config(&cfg, fake_registry(&adapter)).unwrap();

    assert!(ws.queue.is_none());
    let report = with_timeout(ws.orchestrator.run_bundles(vec![bundle("x").build()]))
        .await
        .unwrap();
    assert!(report.is_success());
}
