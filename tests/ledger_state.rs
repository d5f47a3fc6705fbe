mod common;

use std::sync::Arc;

use common::bundle;
use workstream::errors::WorkstreamError;
use workstream::ledger::{
    EventType, FileLedgerStore, Ledger, LedgerStore, MemoryLedgerStore, RunState, StepCompletion,
    StepState,
};

fn running_run(ledger: &Ledger) -> String {
    let run = ledger
        .create_run(vec![bundle("a").build(), bundle("b").after("a").build()])
        .unwrap();
    ledger.start_run(&run.run_id).unwrap();
    run.run_id
}

#[test]
fn run_transition_table() {
    use RunState::*;

    assert!(Pending.can_transition_to(Running));
    assert!(Pending.can_transition_to(Canceled));
    assert!(Running.can_transition_to(Succeeded));
    assert!(Running.can_transition_to(Quarantined));
    assert!(Failed.can_transition_to(Quarantined));

    assert!(!Pending.can_transition_to(Quarantined));
    assert!(!Pending.can_transition_to(Succeeded));
    assert!(!Succeeded.can_transition_to(Running));
    assert!(!Quarantined.can_transition_to(Failed));
    assert!(!Canceled.can_transition_to(Running));

    assert!(!Pending.is_terminal());
    assert!(!Running.is_terminal());
    assert!(Failed.is_terminal());
}

#[test]
fn step_transition_table() {
    assert!(StepState::Running.can_transition_to(StepState::Succeeded));
    assert!(StepState::Running.can_transition_to(StepState::Failed));
    assert!(StepState::Running.can_transition_to(StepState::Canceled));
    assert!(!StepState::Running.can_transition_to(StepState::Running));
    assert!(!StepState::Failed.can_transition_to(StepState::Succeeded));
    assert!(!StepState::Succeeded.can_transition_to(StepState::Failed));
}

#[test]
fn new_run_is_pending_and_logged() {
    let ledger = Ledger::in_memory();
    let run = ledger.create_run(vec![bundle("a").build()]).unwrap();

    assert!(run.run_id.starts_with("run-"));
    assert_eq!(run.state, RunState::Pending);
    assert_eq!(run.bundles.len(), 1);

    let events = ledger.events_for_run(&run.run_id).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::RunCreated);
}

#[test]
fn invalid_run_transition_changes_nothing() {
    let store = MemoryLedgerStore::new();
    let ledger = Ledger::new(Arc::new(store.clone()));
    let run = ledger.create_run(Vec::new()).unwrap();
    let events_before = store.event_count();

    let err = ledger
        .transition_run(&run.run_id, RunState::Quarantined)
        .unwrap_err();
    assert!(matches!(
        err,
        WorkstreamError::InvalidTransition { entity: "run", ref from, ref to }
            if from == "pending" && to == "quarantined"
    ));

    assert_eq!(
        ledger.get_run(&run.run_id).unwrap().unwrap().state,
        RunState::Pending
    );
    assert_eq!(store.event_count(), events_before);
}

#[test]
fn failed_run_may_be_escalated_to_quarantine() {
    let ledger = Ledger::in_memory();
    let run_id = running_run(&ledger);

    ledger.transition_run(&run_id, RunState::Failed).unwrap();
    let run = ledger.transition_run(&run_id, RunState::Quarantined).unwrap();
    assert_eq!(run.state, RunState::Quarantined);

    assert!(ledger.transition_run(&run_id, RunState::Running).is_err());
}

#[test]
fn unknown_run_is_reported() {
    let ledger = Ledger::in_memory();
    let err = ledger.start_run("run-missing").unwrap_err();
    assert!(matches!(err, WorkstreamError::RunNotFound(id) if id == "run-missing"));
}

#[test]
fn steps_need_a_running_run() {
    let ledger = Ledger::in_memory();
    let run = ledger.create_run(vec![bundle("a").build()]).unwrap();

    let err = ledger.start_step(&run.run_id, "a", "fake", None).unwrap_err();
    assert!(matches!(err, WorkstreamError::InvalidTransition { entity: "step", .. }));
    assert!(ledger.steps_for_run(&run.run_id).unwrap().is_empty());
}

#[test]
fn sequence_counts_run_steps_and_attempt_counts_unit_steps() {
    let ledger = Ledger::in_memory();
    let run_id = running_run(&ledger);

    let a1 = ledger.start_step(&run_id, "a", "fake", Some("worker-1")).unwrap();
    ledger.transition_step(&a1.step_id, StepState::Failed).unwrap();
    let a2 = ledger.start_step(&run_id, "a", "fake", Some("worker-1")).unwrap();
    ledger.transition_step(&a2.step_id, StepState::Succeeded).unwrap();
    let b1 = ledger.start_step(&run_id, "b", "fake", None).unwrap();

    assert_eq!((a1.sequence, a1.attempt), (1, 1));
    assert_eq!((a2.sequence, a2.attempt), (2, 2));
    assert_eq!((b1.sequence, b1.attempt), (3, 1));
    assert_eq!(a1.worker_id.as_deref(), Some("worker-1"));
    assert_eq!(b1.state, StepState::Running);

    let steps = ledger.steps_for_run(&run_id).unwrap();
    let sequences: Vec<u64> = steps.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(ledger.unit_attempts(&run_id, "a").unwrap().len(), 2);
}

#[test]
fn finishing_a_step_records_outcome_once() {
    let ledger = Ledger::in_memory();
    let run_id = running_run(&ledger);
    let step = ledger.start_step(&run_id, "a", "fake", None).unwrap();

    let finished = ledger
        .finish_step(
            &step.step_id,
            StepState::Failed,
            StepCompletion {
                exit_code: Some(2),
                error_signature: Some("boom".to_string()),
                content_hash: Some("abc".to_string()),
            },
        )
        .unwrap();
    assert_eq!(finished.state, StepState::Failed);
    assert_eq!(finished.exit_code, Some(2));
    assert_eq!(finished.error_signature.as_deref(), Some("boom"));
    assert!(finished.finished_at.is_some());

    let err = ledger
        .transition_step(&step.step_id, StepState::Succeeded)
        .unwrap_err();
    assert!(matches!(err, WorkstreamError::InvalidTransition { entity: "step", .. }));
    assert_eq!(
        ledger.get_step(&step.step_id).unwrap().unwrap().state,
        StepState::Failed
    );

    let err = ledger
        .transition_step("step-missing", StepState::Failed)
        .unwrap_err();
    assert!(matches!(err, WorkstreamError::StepNotFound(_)));
}

#[test]
fn every_mutation_appends_an_event() {
    let ledger = Ledger::in_memory();
    let run_id = running_run(&ledger);
    let step = ledger.start_step(&run_id, "a", "fake", None).unwrap();
    ledger
        .transition_step(&step.step_id, StepState::Succeeded)
        .unwrap();
    ledger.transition_run(&run_id, RunState::Succeeded).unwrap();

    let kinds: Vec<EventType> = ledger
        .events_for_run(&run_id)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            EventType::RunCreated,
            EventType::RunTransition,
            EventType::StepStarted,
            EventType::StepTransition,
            EventType::RunTransition,
        ]
    );
}

#[test]
fn replay_rebuilds_run_state_from_events() {
    let ledger = Ledger::in_memory();
    let run_id = running_run(&ledger);
    assert_eq!(ledger.replay_run(&run_id).unwrap(), RunState::Running);

    ledger.transition_run(&run_id, RunState::Failed).unwrap();
    ledger.transition_run(&run_id, RunState::Quarantined).unwrap();
    assert_eq!(ledger.replay_run(&run_id).unwrap(), RunState::Quarantined);

    assert!(matches!(
        ledger.replay_run("run-missing"),
        Err(WorkstreamError::RunNotFound(_))
    ));
}

#[test]
fn file_store_persists_runs_steps_and_events() {
    let dir = tempfile::tempdir().unwrap();

    let (run_id, step_id) = {
        let ledger = Ledger::new(Arc::new(FileLedgerStore::new(dir.path())));
        let run_id = running_run(&ledger);
        let step = ledger.start_step(&run_id, "a", "fake", Some("worker-1")).unwrap();
        (run_id, step.step_id)
    };

    let store = FileLedgerStore::new(dir.path());
    let run = store.get_run(&run_id).unwrap().unwrap();
    assert_eq!(run.state, RunState::Running);
    assert_eq!(run.bundles.len(), 2);

    let step = store.get_step(&step_id).unwrap().unwrap();
    assert_eq!(step.state, StepState::Running);
    assert_eq!(step.worker_id.as_deref(), Some("worker-1"));

    let ledger = Ledger::new(Arc::new(store));
    assert_eq!(ledger.events_for_run(&run_id).unwrap().len(), 3);
    assert_eq!(ledger.replay_run(&run_id).unwrap(), RunState::Running);
    assert_eq!(ledger.list_runs().unwrap().len(), 1);
}
