//! Parallel group integration tests.

use tasktree::tasking::{
    continue_on_error, parallel, stop_on_done, stop_on_error, Group,
};
use tasktree::{TaskTree, TreeEvent};

use crate::fixtures::{
    drain, leaf, leaves, manual_leaf, progress, terminal, threaded_leaf, Journal, ManualSlots,
    TIMEOUT,
};

/// Test: All parallel children start before any completion is processed
/// Given a parallel group of four leaves that succeed synchronously
/// When the tree starts
/// Then every start precedes every done callback, and the result is true
#[test]
fn test_all_children_start_before_completions() {
    let journal = Journal::new();
    let mut items = vec![parallel(), stop_on_error()];
    items.extend(leaves(&journal, "p", &[true, true, true, true]));
    let tree = TaskTree::new(Group::new(items));

    assert!(tree.run().unwrap());
    let entries = journal.entries();
    let last_start = entries.iter().rposition(|e| e.starts_with("start:")).unwrap();
    let first_done = entries.iter().position(|e| e.starts_with("done:")).unwrap();
    assert!(last_start < first_done, "{:?}", entries);
    assert_eq!(journal.with_prefix("done:").len(), 4);
}

/// Test: Manual parallel leaves run concurrently
/// Given a parallel group of three manually completed leaves
/// When the tree starts
/// Then all three are running and the tree finishes after the last one
#[test]
fn test_manual_parallel_leaves() {
    let journal = Journal::new();
    let slots = ManualSlots::new();
    let tree = TaskTree::new(Group::new([
        parallel(),
        manual_leaf(&journal, &slots, "a"),
        manual_leaf(&journal, &slots, "b"),
        manual_leaf(&journal, &slots, "c"),
    ]));
    let events = tree.subscribe();

    tree.start().unwrap();
    assert_eq!(journal.started(), vec!["a", "b", "c"]);
    assert!(tree.is_running());

    assert!(slots.finish("b", true));
    assert!(slots.finish("c", true));
    tree.process_pending().unwrap();
    assert!(tree.is_running());
    assert_eq!(tree.progress_value(), 2);

    assert!(slots.finish("a", true));
    assert_eq!(tree.process_pending().unwrap(), 1);
    assert!(!tree.is_running());
    assert_eq!(tree.outcome(), Some(true));
    assert_eq!(journal.with_prefix("done:"), vec!["b", "c", "a"]);
    assert_eq!(terminal(&drain(&events)), vec![TreeEvent::Done]);
}

/// Test: A failing parallel child stops its siblings
/// Given a parallel StopOnError group of three manual leaves
/// When one leaf fails
/// Then the others are stopped without callbacks and their late
/// completions are ignored
#[test]
fn test_parallel_stop_on_error_stops_siblings() {
    let journal = Journal::new();
    let slots = ManualSlots::new();
    let tree = TaskTree::new(Group::new([
        parallel(),
        stop_on_error(),
        manual_leaf(&journal, &slots, "a"),
        manual_leaf(&journal, &slots, "b"),
        manual_leaf(&journal, &slots, "c"),
    ]));
    let events = tree.subscribe();

    tree.start().unwrap();
    assert!(slots.finish("b", false));
    tree.process_pending().unwrap();

    assert!(!tree.is_running());
    assert_eq!(tree.outcome(), Some(false));
    assert_eq!(tree.progress_value(), 3);

    assert!(slots.finish("a", true));
    assert!(slots.finish("c", true));
    assert_eq!(tree.process_pending().unwrap(), 2);
    assert_eq!(tree.outcome(), Some(false));
    assert_eq!(journal.with_prefix("done:"), Vec::<String>::new());
    assert_eq!(journal.with_prefix("error:"), vec!["b"]);
    assert_eq!(terminal(&drain(&events)), vec![TreeEvent::ErrorOccurred]);
}

/// Test: Parallel StopOnDone succeeds on the first success
#[test]
fn test_parallel_stop_on_done() {
    let journal = Journal::new();
    let slots = ManualSlots::new();
    let tree = TaskTree::new(Group::new([
        parallel(),
        stop_on_done(),
        manual_leaf(&journal, &slots, "a"),
        manual_leaf(&journal, &slots, "b"),
    ]));

    tree.start().unwrap();
    assert!(slots.finish("a", false));
    tree.process_pending().unwrap();
    assert!(tree.is_running());

    assert!(slots.finish("b", true));
    tree.process_pending().unwrap();
    assert_eq!(tree.outcome(), Some(true));
}

/// Test: Synchronous launch failure is an ordinary failure
/// Given a parallel ContinueOnError group whose first leaf fails inside start()
/// When the tree runs
/// Then every sibling still starts and finishes, and the result is false
#[test]
fn test_launch_failure_under_continue_on_error() {
    let journal = Journal::new();
    let tree = TaskTree::new(Group::new([
        parallel(),
        continue_on_error(),
        leaf(&journal, "broken", false),
        leaf(&journal, "ok1", true),
        leaf(&journal, "ok2", true),
    ]));

    assert!(!tree.run().unwrap());
    assert_eq!(journal.started(), vec!["broken", "ok1", "ok2"]);
    assert_eq!(journal.with_prefix("done:"), vec!["ok1", "ok2"]);
}

/// Test: Synchronous launch failure under StopOnError stops the siblings
/// Given a parallel StopOnError group whose first leaf fails inside start()
/// When the tree runs
/// Then the siblings were started but never report, and the result is false
#[test]
fn test_launch_failure_under_stop_on_error() {
    let journal = Journal::new();
    let tree = TaskTree::new(Group::new([
        parallel(),
        stop_on_error(),
        leaf(&journal, "broken", false),
        leaf(&journal, "ok1", true),
        leaf(&journal, "ok2", true),
    ]));

    assert!(!tree.run().unwrap());
    assert_eq!(journal.started(), vec!["broken", "ok1", "ok2"]);
    assert!(journal.with_prefix("done:").is_empty());
    assert_eq!(tree.progress_value(), 3);
}

/// Test: Completions from other threads are applied by wait()
/// Given a parallel group of leaves finishing on spawned threads
/// When the tree runs
/// Then wait() blocks until all of them reported
#[test]
fn test_threaded_completions() {
    let journal = Journal::new();
    let delay = std::time::Duration::from_millis(10);
    let tree = TaskTree::new(Group::new([
        parallel(),
        threaded_leaf(&journal, "x", true, delay),
        threaded_leaf(&journal, "y", true, delay * 2),
        threaded_leaf(&journal, "z", true, delay * 3),
    ]));
    let events = tree.subscribe();

    tree.start().unwrap();
    assert!(tree.wait_timeout(TIMEOUT).unwrap());
    assert_eq!(journal.with_prefix("done:").len(), 3);

    let values = progress(&drain(&events));
    assert_eq!(values.first(), Some(&0));
    assert_eq!(values.last(), Some(&3));
    assert!(values.windows(2).all(|w| w[0] <= w[1]));
}
