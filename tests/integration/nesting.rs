//! Nested groups, dynamic setup, progress and determinism.

use std::cell::Cell;
use std::rc::Rc;

use tasktree::tasking::{
    continue_on_error, on_group_dynamic_setup, optional, parallel, stop_on_error, CustomTask,
    Group, SetupResult,
};
use tasktree::{SpecError, TaskTree, TreeEvent};

use crate::fixtures::{
    drain, group_journal, leaf, leaves, manual_leaf, progress, terminal, Journal, ManualSlots,
    ScriptedAdapter,
};

/// Test: Nested groups run inside their parent's order
/// Given a sequential root [a, parallel [b, c], d]
/// When the tree runs
/// Then d starts only after the nested group finished
#[test]
fn test_nested_parallel_inside_sequential() {
    let journal = Journal::new();
    let tree = TaskTree::new(Group::new([
        leaf(&journal, "a", true),
        Group::new([
            parallel(),
            group_journal(&journal, "inner"),
            leaf(&journal, "b", true),
            leaf(&journal, "c", true),
        ])
        .into(),
        leaf(&journal, "d", true),
    ]));
    assert_eq!(tree.task_count(), 4);

    assert!(tree.run().unwrap());
    assert_eq!(journal.started(), vec!["a", "b", "c", "d"]);
    let inner_done = journal.position("group-done:inner").unwrap();
    assert!(inner_done < journal.position("start:d").unwrap());
    assert!(journal.position("done:c").unwrap() < inner_done);
}

/// Test: A nested failure is resolved by the nearest group
/// Given an Optional inner group with a failing leaf inside a StopOnError root
/// When the tree runs
/// Then the inner group reports success and the root continues
#[test]
fn test_nested_optional_absorbs_failure() {
    let journal = Journal::new();
    let tree = TaskTree::new(Group::new([
        stop_on_error(),
        Group::new([optional(), leaf(&journal, "flaky", false)]).into(),
        leaf(&journal, "after", true),
    ]));
    assert!(tree.run().unwrap());
    assert_eq!(journal.started(), vec!["flaky", "after"]);
    assert!(journal.contains("error:flaky"));
}

/// Test: Early stop reaches into nested groups
/// Given a parallel StopOnError root with a leaf and a sequential group of two
/// When the leaf fails while the nested group's first leaf runs
/// Then the nested leaf is stopped, its sibling skipped, and no nested
/// group callback fires
#[test]
fn test_early_stop_stops_nested_group() {
    let journal = Journal::new();
    let slots = ManualSlots::new();
    let tree = TaskTree::new(Group::new([
        parallel(),
        stop_on_error(),
        manual_leaf(&journal, &slots, "x"),
        Group::new([
            group_journal(&journal, "inner"),
            manual_leaf(&journal, &slots, "y"),
            manual_leaf(&journal, &slots, "z"),
        ])
        .into(),
    ]));

    tree.start().unwrap();
    assert_eq!(journal.started(), vec!["x", "y"]);
    assert!(slots.finish("x", false));
    tree.process_pending().unwrap();

    assert_eq!(tree.outcome(), Some(false));
    assert_eq!(tree.progress_value(), 3);
    assert!(!journal.contains("group-done:inner"));
    assert!(!journal.contains("group-error:inner"));

    assert!(slots.finish("y", true));
    tree.process_pending().unwrap();
    assert_eq!(journal.started(), vec!["x", "y"]);
}

/// Test: Dynamic setup can skip a group
/// Given a group whose dynamic setup returns StopWithSuccess
/// When the tree runs
/// Then none of its children start, its done handler runs and its leaves
/// count as progress
#[test]
fn test_dynamic_setup_skips_children() {
    let journal = Journal::new();
    let mut inner = vec![
        group_journal(&journal, "skipped"),
        on_group_dynamic_setup(|| SetupResult::StopWithSuccess),
    ];
    inner.extend(leaves(&journal, "s", &[true, true]));
    let tree = TaskTree::new(Group::new([
        Group::new(inner).into(),
        leaf(&journal, "after", true),
    ]));
    let events = tree.subscribe();

    assert!(tree.run().unwrap());
    assert_eq!(journal.started(), vec!["after"]);
    assert!(journal.contains("setup:skipped"));
    assert!(journal.contains("group-done:skipped"));
    assert_eq!(progress(&drain(&events)), vec![0, 2, 3]);
}

/// Test: Dynamic setup can fail a group
#[test]
fn test_dynamic_setup_stop_with_error() {
    let journal = Journal::new();
    let tree = TaskTree::new(Group::new([
        continue_on_error(),
        Group::new([
            group_journal(&journal, "failing"),
            on_group_dynamic_setup(|| SetupResult::StopWithError),
            leaf(&journal, "never", true),
        ])
        .into(),
        leaf(&journal, "after", true),
    ]));

    assert!(!tree.run().unwrap());
    assert_eq!(journal.started(), vec!["after"]);
    assert!(journal.contains("group-error:failing"));
}

/// Test: Dynamic setup returning Continue runs the group normally
#[test]
fn test_dynamic_setup_continue() {
    let journal = Journal::new();
    let tree = TaskTree::new(Group::new([
        on_group_dynamic_setup(|| SetupResult::Continue),
        leaf(&journal, "a", true),
    ]));
    assert!(tree.run().unwrap());
    assert_eq!(journal.started(), vec!["a"]);
}

/// Test: Sync steps observe side effects of earlier siblings
/// Given a leaf whose done handler sets a flag, followed by a sync step
/// When the tree runs
/// Then the sync step sees the flag and is not counted as a task
#[test]
fn test_sync_step_sees_earlier_effects() {
    let journal = Journal::new();
    let flag = Rc::new(Cell::new(false));
    let set_flag = Rc::clone(&flag);
    let read_flag = Rc::clone(&flag);

    let tree = TaskTree::new(Group::new([
        CustomTask::<ScriptedAdapter>::new(move |task| {
            task.name = "writer".to_string();
            task.outcome = true;
            task.journal = journal.clone();
        })
        .on_done(move |_| set_flag.set(true))
        .into(),
        Group::sync(move || read_flag.get()).into(),
    ]));

    assert_eq!(tree.task_count(), 1);
    assert!(tree.run().unwrap());
}

/// Test: Progress is monotonic and reaches the task count
#[test]
fn test_progress_is_monotonic() {
    let journal = Journal::new();
    let tree = TaskTree::new(Group::new([
        continue_on_error(),
        Group::new(leaves(&journal, "a", &[true, false])).into(),
        Group::new([parallel(), leaf(&journal, "b", true), leaf(&journal, "c", false)]).into(),
        leaf(&journal, "d", true),
    ]));
    let events = tree.subscribe();

    assert!(!tree.run().unwrap());
    let values = progress(&drain(&events));
    assert_eq!(values.first(), Some(&0));
    assert_eq!(values.last(), Some(&tree.task_count()));
    assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", values);
}

/// Test: Trees built from one group behave identically
/// Given one group specification
/// When two trees are built from it and run independently
/// Then both produce the same outcome, callbacks and events
#[test]
fn test_determinism_across_trees() {
    let journal = Journal::new();
    let spec = Group::new([
        stop_on_error(),
        leaf(&journal, "a", true),
        Group::new([parallel(), continue_on_error(), leaf(&journal, "b", false), leaf(&journal, "c", true)])
            .into(),
        leaf(&journal, "d", true),
    ]);

    let mut runs = Vec::new();
    for _ in 0..2 {
        journal.clear();
        let tree = TaskTree::new(spec.clone());
        let events = tree.subscribe();
        let outcome = tree.run().unwrap();
        runs.push((outcome, journal.entries(), drain(&events)));
    }

    assert_eq!(runs[0], runs[1]);
    assert!(!runs[0].0);
    assert_eq!(terminal(&runs[0].2), vec![TreeEvent::ErrorOccurred]);
}

/// Test: Usage errors drop the offending fragment only
/// Given a group with a task lacking a setup handler
/// When the tree runs
/// Then the diagnostic is recorded and the remaining task still runs
#[test]
fn test_missing_setup_handler_is_dropped() {
    let journal = Journal::new();
    let group = Group::new([
        CustomTask::<ScriptedAdapter>::default().into(),
        leaf(&journal, "kept", true),
    ]);
    assert_eq!(group.diagnostics(), &[SpecError::MissingSetupHandler]);

    let tree = TaskTree::new(group);
    assert_eq!(tree.task_count(), 1);
    assert!(tree.run().unwrap());
    assert_eq!(journal.started(), vec!["kept"]);
}
