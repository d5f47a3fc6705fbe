use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use workstream::errors::WorkstreamError;
use workstream::queue::{Partition, QueueConfig, TaskLock, TaskQueue};

fn open_queue() -> (TempDir, TaskQueue) {
    let dir = tempfile::tempdir().unwrap();
    let config = QueueConfig {
        root: dir.path().to_path_buf(),
        lock_timeout: Duration::from_millis(200),
    };
    let queue = TaskQueue::open(&config).unwrap();
    (dir, queue)
}

#[test]
fn open_creates_partition_directories() {
    let (dir, _queue) = open_queue();
    for name in ["inbox", "running", "done", "failed", "locks"] {
        assert!(dir.path().join(name).is_dir(), "{name} missing");
    }
}

#[test]
fn enqueued_task_is_visible_in_inbox() {
    let (_dir, queue) = open_queue();
    let task = queue.enqueue("unit", json!({ "unit_id": "a" })).unwrap();

    assert_eq!(queue.locate(&task.id).unwrap(), Some(Partition::Inbox));
    let peeked = queue.dequeue().unwrap().unwrap();
    assert_eq!(peeked, task);
    assert_eq!(peeked.payload["unit_id"], "a");

    // Peeking does not remove.
    assert_eq!(queue.counts().unwrap().inbox, 1);
}

#[test]
fn dequeue_returns_oldest_first() {
    let (_dir, queue) = open_queue();
    let first = queue.enqueue("unit", json!(1)).unwrap();
    let second = queue.enqueue("unit", json!(2)).unwrap();

    assert_eq!(queue.dequeue().unwrap().unwrap().id, first.id);
    queue.move_to_running(&first.id).unwrap();
    assert_eq!(queue.dequeue().unwrap().unwrap().id, second.id);
}

#[test]
fn empty_inbox_dequeues_nothing() {
    let (_dir, queue) = open_queue();
    assert!(queue.dequeue().unwrap().is_none());
}

#[test]
fn task_lives_in_exactly_one_partition_through_its_life() {
    let (dir, queue) = open_queue();
    let task = queue.enqueue("unit", json!({})).unwrap();

    let present = |id: &str| -> Vec<&'static str> {
        ["inbox", "running", "done", "failed"]
            .into_iter()
            .filter(|p| dir.path().join(p).join(format!("{id}.json")).is_file())
            .collect()
    };

    assert_eq!(present(&task.id), vec!["inbox"]);

    let running = queue.move_to_running(&task.id).unwrap();
    assert!(running.started_at.is_some());
    assert_eq!(present(&task.id), vec!["running"]);

    let done = queue.complete(&task.id, Some(json!({ "exit_code": 0 }))).unwrap();
    assert!(done.finished_at.is_some());
    assert_eq!(done.result, Some(json!({ "exit_code": 0 })));
    assert_eq!(present(&task.id), vec!["done"]);

    let stored = queue.get(&task.id).unwrap().unwrap();
    assert_eq!(stored, done);
}

#[test]
fn failed_task_can_be_requeued() {
    let (_dir, queue) = open_queue();
    let task = queue.enqueue("unit", json!({})).unwrap();
    queue.move_to_running(&task.id).unwrap();

    let failed = queue.fail(&task.id, "boom").unwrap();
    assert_eq!(failed.error.as_deref(), Some("boom"));
    assert_eq!(queue.locate(&task.id).unwrap(), Some(Partition::Failed));

    let requeued = queue.requeue(&task.id).unwrap();
    assert!(requeued.error.is_none());
    assert!(requeued.started_at.is_none());
    assert!(requeued.finished_at.is_none());
    assert_eq!(queue.locate(&task.id).unwrap(), Some(Partition::Inbox));
}

#[test]
fn moving_from_the_wrong_partition_is_rejected() {
    let (_dir, queue) = open_queue();
    let task = queue.enqueue("unit", json!({})).unwrap();

    let err = queue.complete(&task.id, None).unwrap_err();
    assert!(matches!(
        err,
        WorkstreamError::WrongPartition { ref expected, ref actual, .. }
            if expected == "running" && actual == "inbox"
    ));
    assert_eq!(queue.locate(&task.id).unwrap(), Some(Partition::Inbox));
}

#[test]
fn unknown_tasks_are_not_found() {
    let (_dir, queue) = open_queue();

    let missing = ulid::Ulid::new().to_string();
    assert!(matches!(
        queue.move_to_running(&missing),
        Err(WorkstreamError::TaskNotFound(_))
    ));
    assert!(matches!(
        queue.fail("not-a-task-id", "x"),
        Err(WorkstreamError::TaskNotFound(_))
    ));
    assert!(queue.get(&missing).unwrap().is_none());
    assert_eq!(queue.locate("../escape").unwrap(), None);
}

#[test]
fn held_lock_times_out_other_movers() {
    let (dir, queue) = open_queue();
    let task = queue.enqueue("unit", json!({})).unwrap();

    let held = TaskLock::acquire(&dir.path().join("locks"), &task.id, Duration::from_secs(1)).unwrap();
    let err = queue.move_to_running(&task.id).unwrap_err();
    assert!(matches!(err, WorkstreamError::LockTimeout { ref task_id, .. } if *task_id == task.id));
    assert!(err.is_retryable());
    assert_eq!(queue.locate(&task.id).unwrap(), Some(Partition::Inbox));

    drop(held);
    queue.move_to_running(&task.id).unwrap();
}

#[test]
fn try_acquire_reports_contention() {
    let dir = tempfile::tempdir().unwrap();
    let first = TaskLock::try_acquire(dir.path(), "t").unwrap();
    assert!(first.is_some());
    assert!(TaskLock::try_acquire(dir.path(), "t").unwrap().is_none());

    drop(first);
    assert!(TaskLock::try_acquire(dir.path(), "t").unwrap().is_some());
}

#[test]
fn counts_and_listing_follow_partitions() {
    let (_dir, queue) = open_queue();
    let a = queue.enqueue("unit", json!("a")).unwrap();
    let b = queue.enqueue("unit", json!("b")).unwrap();
    let c = queue.enqueue("unit", json!("c")).unwrap();

    queue.move_to_running(&a.id).unwrap();
    queue.move_to_running(&b.id).unwrap();
    queue.complete(&a.id, None).unwrap();
    queue.fail(&b.id, "nope").unwrap();

    let counts = queue.counts().unwrap();
    assert_eq!((counts.inbox, counts.running, counts.done, counts.failed), (1, 0, 1, 1));
    assert_eq!(counts.total(), 3);

    let inbox: Vec<String> = queue.list(Partition::Inbox).unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(inbox, vec![c.id]);
    assert_eq!(queue.list(Partition::Failed).unwrap()[0].error.as_deref(), Some("nope"));
}

#[test]
fn prune_removes_only_locks_of_finished_tasks() {
    let (dir, queue) = open_queue();
    let finished = queue.enqueue("unit", json!({})).unwrap();
    let waiting = queue.enqueue("unit", json!({})).unwrap();
    queue.move_to_running(&finished.id).unwrap();
    queue.complete(&finished.id, None).unwrap();

    let locks = dir.path().join("locks");
    assert!(locks.join(format!("{}.lock", finished.id)).is_file());

    assert_eq!(queue.prune_locks().unwrap(), 1);
    assert!(!locks.join(format!("{}.lock", finished.id)).exists());
    assert!(locks.join(format!("{}.lock", waiting.id)).is_file());
}

#[test]
fn partition_names_parse_back() {
    for partition in Partition::ALL {
        let parsed: Partition = partition.to_string().parse().unwrap();
        assert_eq!(parsed, partition);
    }
    assert!(Partition::Done.is_finished());
    assert!(!Partition::Running.is_finished());
}

#[test]
fn reserved_ids_are_written_only_on_enqueue() {
    let (_dir, queue) = open_queue();

    let id = queue.next_task_id().unwrap();
    assert_eq!(queue.locate(&id).unwrap(), None);
    assert_eq!(queue.counts().unwrap().inbox, 0);

    let task = queue.enqueue_with_id(&id, "unit", json!({ "unit_id": "a" })).unwrap();
    assert_eq!(task.id, id);
    assert_eq!(queue.locate(&id).unwrap(), Some(Partition::Inbox));

    let later = queue.next_task_id().unwrap();
    assert!(later > id);
}

#[test]
fn enqueue_with_id_rejects_foreign_and_duplicate_ids() {
    let (_dir, queue) = open_queue();

    assert!(matches!(
        queue.enqueue_with_id("../escape", "unit", json!({})),
        Err(WorkstreamError::InvalidTask(_))
    ));

    let task = queue.enqueue("unit", json!({})).unwrap();
    queue.move_to_running(&task.id).unwrap();
    assert!(matches!(
        queue.enqueue_with_id(&task.id, "unit", json!({})),
        Err(WorkstreamError::InvalidTask(_))
    ));
    assert_eq!(queue.locate(&task.id).unwrap(), Some(Partition::Running));
}

#[test]
fn queue_debug_output_names_its_root() {
    let (dir, queue) = open_queue();
    let rendered = format!("{queue:?}");
    assert!(rendered.starts_with("TaskQueue"));
    assert!(rendered.contains(&format!("{:?}", dir.path())));
}
