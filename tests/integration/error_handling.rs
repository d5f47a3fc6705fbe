// tests/integration/error_handling.rs

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::NamedTempFile;
use workstream::config::{load_and_validate, parse_str, ConfigFile};
use workstream::errors::WorkstreamError;
use workstream::types::StorageMode;
use workstream::Workstream;
use workstream::exec::AdapterRegistry;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

fn expect_config_error(contents: &str, needle: &str) {
    let file = config_file(contents);
    match load_and_validate(file.path()) {
        Err(WorkstreamError::Config(msg)) => {
            assert!(msg.contains(needle), "message {msg:?} should mention {needle:?}");
        }
        Err(e) => panic!("Expected Config error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_empty_file_uses_defaults() {
    let file = config_file("");
    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.pool.max_workers, 4);
    assert_eq!(cfg.pool.default_adapter, "process");
    assert_eq!(cfg.breaker.max_attempts, 3);
    assert_eq!(cfg.breaker.max_error_repeats, 2);
    assert_eq!(cfg.breaker.oscillation_threshold, 2);
    assert_eq!(cfg.state.storage, StorageMode::File);
    assert_eq!(cfg.queue_config().lock_timeout, Duration::from_secs(10));
    assert_eq!(cfg.ledger_dir(), PathBuf::from(".workstream/ledger"));
}

#[test]
fn test_sections_override_defaults() {
    let file = config_file(
        r#"
[pool]
max_workers = 8
heartbeat_timeout_secs = 30
default_adapter = "fake"

[breaker]
max_attempts = 5

[queue]
lock_timeout_ms = 250

[state]
dir = "/var/lib/ws"
storage = "memory"
"#,
    );
    let cfg = load_and_validate(file.path()).unwrap();

    let pool = cfg.pool_config();
    assert_eq!(pool.max_workers, 8);
    assert_eq!(pool.heartbeat_timeout, Duration::from_secs(30));
    assert_eq!(pool.default_adapter, "fake");
    assert_eq!(cfg.breaker_config().max_attempts, 5);
    assert_eq!(cfg.breaker_config().max_error_repeats, 2);
    assert_eq!(cfg.queue_config().lock_timeout, Duration::from_millis(250));
    assert_eq!(cfg.queue_dir(), PathBuf::from("/var/lib/ws/queue"));
    assert_eq!(cfg.state.storage, StorageMode::Memory);
}

#[test]
fn test_zero_max_workers_is_rejected() {
    expect_config_error("[pool]\nmax_workers = 0\n", "max_workers");
}

#[test]
fn test_empty_default_adapter_is_rejected() {
    expect_config_error("[pool]\ndefault_adapter = \"  \"\n", "default_adapter");
}

#[test]
fn test_zero_breaker_thresholds_are_rejected() {
    expect_config_error("[breaker]\nmax_attempts = 0\n", "max_attempts");
    expect_config_error("[breaker]\nmax_error_repeats = 0\n", "max_error_repeats");
    expect_config_error("[breaker]\noscillation_threshold = 0\n", "oscillation_threshold");
}

#[test]
fn test_zero_lock_timeout_is_rejected() {
    expect_config_error("[queue]\nlock_timeout_ms = 0\n", "lock_timeout_ms");
}

#[test]
fn test_config_errors_are_definitional() {
    let raw = parse_str("[pool]\nmax_workers = 0\n").unwrap();
    let err = ConfigFile::try_from(raw).unwrap_err();
    assert!(err.is_definitional());
    assert!(!err.is_retryable());
}

#[test]
fn test_malformed_toml_returns_toml_error() {
    let file = config_file("[pool\nmax_workers = ");
    match load_and_validate(file.path()) {
        Err(WorkstreamError::Toml(_)) => {}
        Err(e) => panic!("Expected Toml error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_wrong_value_type_returns_toml_error() {
    let file = config_file("[state]\nstorage = \"tape\"\n");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(WorkstreamError::Toml(_))
    ));
}

#[test]
fn test_missing_file_returns_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(matches!(
        load_and_validate(&missing),
        Err(WorkstreamError::Io(_))
    ));
}

#[test]
fn test_open_fails_fast_on_invalid_config() {
    let file = config_file("[pool]\nmax_workers = 0\n");
    let err = Workstream::open(file.path(), AdapterRegistry::with_defaults()).unwrap_err();
    assert!(matches!(err, WorkstreamError::Config(_)));
}
