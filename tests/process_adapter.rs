use std::time::Duration;

use tokio::sync::oneshot;

use workstream::breaker::fingerprint;
use workstream::exec::{ExecutionAdapter, ExecutionRequest, ProcessAdapter, PROCESS_ADAPTER};
use workstream_test_utils::{init_tracing, with_timeout};

fn request(command: Option<&str>) -> (ExecutionRequest, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel();
    let request = ExecutionRequest {
        run_id: "run-test".to_string(),
        unit_id: "unit".to_string(),
        attempt: 1,
        worker_id: "worker-test".to_string(),
        command: command.map(str::to_string),
        cancel: rx,
    };
    (request, tx)
}

#[test]
fn registers_under_the_process_type() {
    let adapter = ProcessAdapter::new();
    assert_eq!(adapter.adapter_type(), PROCESS_ADAPTER);
    assert_eq!(ProcessAdapter::named("shell").adapter_type(), "shell");
}

#[cfg(unix)]
#[tokio::test]
async fn successful_command_reports_output_hash() {
    init_tracing();
    let adapter = ProcessAdapter::new();
    assert!(adapter.check_available());

    let (req, _tx) = request(Some("echo hi"));
    let outcome = with_timeout(adapter.execute(req)).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(outcome.content_hash, Some(fingerprint(b"hi\n")));
    assert!(outcome.error.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn output_larger_than_a_pipe_buffer_is_hashed_whole() {
    init_tracing();
    let adapter = ProcessAdapter::new();

    let (req, _tx) = request(Some("head -c 200000 /dev/zero"));
    let outcome = with_timeout(adapter.execute(req)).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.content_hash, Some(fingerprint(&vec![0u8; 200_000])));
}

#[cfg(unix)]
#[tokio::test]
async fn failing_command_reports_code_and_last_stderr_line() {
    init_tracing();
    let adapter = ProcessAdapter::new();

    let (req, _tx) = request(Some("echo first >&2; echo 'disk full' >&2; exit 3"));
    let outcome = with_timeout(adapter.execute(req)).await.unwrap();

    assert!(!outcome.success);
    assert!(!outcome.canceled);
    assert_eq!(outcome.exit_code, Some(3));
    assert_eq!(outcome.error.as_deref(), Some("disk full"));
}

#[cfg(unix)]
#[tokio::test]
async fn silent_failure_falls_back_to_exit_code() {
    init_tracing();
    let (req, _tx) = request(Some("exit 7"));
    let outcome = with_timeout(ProcessAdapter::new().execute(req)).await.unwrap();

    assert_eq!(outcome.exit_code, Some(7));
    assert_eq!(outcome.error.as_deref(), Some("process exited with code 7"));
}

#[cfg(unix)]
#[tokio::test]
async fn teardown_kills_the_process() {
    init_tracing();
    let adapter = ProcessAdapter::new();
    let (req, tx) = request(Some("sleep 5"));

    let started = std::time::Instant::now();
    let exec = adapter.execute(req);
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(());
    };
    let (outcome, ()) = with_timeout(async { tokio::join!(exec, cancel) }).await;
    let outcome = outcome.unwrap();

    assert!(outcome.canceled);
    assert!(!outcome.success);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn missing_command_fails_without_spawning() {
    let (req, _tx) = request(None);
    let outcome = ProcessAdapter::new().execute(req).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.exit_code, None);
    assert_eq!(outcome.error.as_deref(), Some("no command configured for unit"));
}
