//! AsyncTask leaves running on a worker pool.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tasktree::orchestration::{Async, FutureSynchronizer, Priority, ThreadPool};
use tasktree::tasking::{parallel, stop_on_error, Group};
use tasktree::{Error, TaskTree};

use crate::fixtures::{manual_leaf, Journal, ManualSlots, TIMEOUT};

fn pool() -> ThreadPool {
    ThreadPool::new(2).unwrap()
}

/// Test: Sequential async steps pass results along
/// Given two async steps where the second uses the first one's result
/// When the tree runs
/// Then the second step computes from the first and the tree succeeds
#[test]
fn test_sequential_async_results() {
    let pool = pool();
    let first = Rc::new(RefCell::new(0u64));
    let second = Rc::new(RefCell::new(0u64));

    let (first_pool, second_pool) = (pool.clone(), pool.clone());
    let store_first = Rc::clone(&first);
    let read_first = Rc::clone(&first);
    let store_second = Rc::clone(&second);

    let tree = TaskTree::new(Group::new([
        Async::<u64>::new(move |task| {
            task.set_thread_pool(first_pool.clone());
            task.set_concurrent_call_data(|| (1..=10).sum());
        })
        .on_done(move |task| *store_first.borrow_mut() = task.result().unwrap_or_default())
        .into(),
        Async::<u64>::new(move |task| {
            let input = *read_first.borrow();
            task.set_thread_pool(second_pool.clone());
            task.set_priority(Priority::High);
            task.set_concurrent_call_data(move || input * 2);
        })
        .on_done(move |task| *store_second.borrow_mut() = task.result().unwrap_or_default())
        .into(),
    ]));

    tree.start().unwrap();
    assert!(tree.wait_timeout(TIMEOUT).unwrap());
    assert_eq!(*first.borrow(), 55);
    assert_eq!(*second.borrow(), 110);
}

/// Test: Parallel async steps share a small pool
/// Given six parallel async steps on a two-thread pool
/// When the tree runs
/// Then every step runs once and the tree succeeds
#[test]
fn test_parallel_async_on_shared_pool() {
    let pool = pool();
    let ran = Arc::new(AtomicUsize::new(0));
    let mut items = vec![parallel()];
    for _ in 0..6 {
        let pool = pool.clone();
        let ran = Arc::clone(&ran);
        items.push(
            Async::<()>::new(move |task| {
                let ran = Arc::clone(&ran);
                task.set_thread_pool(pool.clone());
                task.set_concurrent_call_data(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    ran.fetch_add(1, Ordering::SeqCst);
                });
            })
            .into(),
        );
    }
    let tree = TaskTree::new(Group::new(items));
    assert_eq!(tree.task_count(), 6);

    tree.start().unwrap();
    assert!(tree.wait_timeout(TIMEOUT).unwrap());
    assert_eq!(ran.load(Ordering::SeqCst), 6);
    assert_eq!(tree.progress_value(), 6);
}

/// Test: Promise results are visible in the done handler
#[test]
fn test_promise_results_in_handler() {
    let pool = pool();
    let collected = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&collected);
    let tree = TaskTree::new(Group::from_item(
        Async::<String>::new(move |task| {
            task.set_thread_pool(pool.clone());
            task.set_concurrent_call_with_promise(|promise| {
                for word in ["alpha", "beta", "gamma"] {
                    promise.add_result(word.to_string());
                }
            });
        })
        .on_done(move |task| *sink.borrow_mut() = task.results())
        .into(),
    ));

    tree.start().unwrap();
    assert!(tree.wait_timeout(TIMEOUT).unwrap());
    assert_eq!(*collected.borrow(), vec!["alpha", "beta", "gamma"]);
}

/// Test: A panicking call is a failed step
/// Given a StopOnError group whose first async step panics
/// When the tree runs
/// Then the error handler runs, the second step never starts and the tree fails
#[test]
fn test_panicking_call_fails_step() {
    let pool = pool();
    let journal = Journal::new();
    let error_journal = journal.clone();
    let second_journal = journal.clone();
    let (first_pool, second_pool) = (pool.clone(), pool.clone());

    let tree = TaskTree::new(Group::new([
        stop_on_error(),
        Async::<u8>::new(move |task| {
            task.set_thread_pool(first_pool.clone());
            task.set_concurrent_call_data(|| panic!("bad input"));
        })
        .on_error(move |task| {
            error_journal.push(format!("error:canceled={}", task.is_canceled()));
        })
        .into(),
        Async::<u8>::new(move |task| {
            second_journal.push("start:second");
            task.set_thread_pool(second_pool.clone());
            task.set_concurrent_call_data(|| 0);
        })
        .into(),
    ]));

    tree.start().unwrap();
    assert!(!tree.wait_timeout(TIMEOUT).unwrap());
    assert_eq!(journal.entries(), vec!["error:canceled=true"]);
}

/// Test: Stopping the tree cancels running calls and waits for them
/// Given a running async step that loops until canceled
/// When the tree is stopped
/// Then stop() returns only after the worker acknowledged cancellation
#[test]
fn test_stop_waits_for_cancellation() {
    let pool = pool();
    let acknowledged = Arc::new(AtomicBool::new(false));
    let (started_tx, started_rx) = crossbeam_channel::bounded(1);

    let ack = Arc::clone(&acknowledged);
    let tree = TaskTree::new(Group::from_item(
        Async::<()>::new(move |task| {
            let ack = Arc::clone(&ack);
            let started_tx = started_tx.clone();
            task.set_thread_pool(pool.clone());
            task.set_concurrent_call_with_promise(move |promise| {
                let _ = started_tx.send(());
                while !promise.is_canceled() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                std::thread::sleep(Duration::from_millis(20));
                ack.store(true, Ordering::SeqCst);
            });
        })
        .into(),
    ));

    tree.start().unwrap();
    started_rx.recv_timeout(TIMEOUT).unwrap();
    tree.stop().unwrap();

    assert!(acknowledged.load(Ordering::SeqCst));
    assert!(!tree.is_running());
    tree.process_pending().unwrap();
    assert_eq!(tree.outcome(), None);
}

/// Test: A synchronizer takes over calls of a stopped tree
/// Given an async step configured with a future synchronizer
/// When the tree is stopped while the call runs
/// Then stop() returns immediately and the synchronizer holds the call
#[test]
fn test_stop_hands_off_to_synchronizer() {
    let pool = pool();
    let synchronizer = FutureSynchronizer::new();
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
    let (started_tx, started_rx) = crossbeam_channel::bounded(1);

    let sync = synchronizer.clone();
    let tree = TaskTree::new(Group::from_item(
        Async::<()>::new(move |task| {
            let release_rx = release_rx.clone();
            let started_tx = started_tx.clone();
            task.set_thread_pool(pool.clone());
            task.set_future_synchronizer(sync.clone());
            task.set_concurrent_call_with_promise(move |_| {
                let _ = started_tx.send(());
                let _ = release_rx.recv();
            });
        })
        .into(),
    ));

    tree.start().unwrap();
    started_rx.recv_timeout(TIMEOUT).unwrap();
    tree.stop().unwrap();
    assert_eq!(synchronizer.len(), 1);

    release_tx.send(()).unwrap();
    synchronizer.wait_for_finished();
    assert!(synchronizer.is_empty());
}

/// Test: wait_timeout gives up on a stuck leaf
#[test]
fn test_wait_timeout_expires() {
    let journal = Journal::new();
    let slots = ManualSlots::new();
    let tree = TaskTree::new(Group::from_item(manual_leaf(&journal, &slots, "stuck")));

    tree.start().unwrap();
    let timeout = Duration::from_millis(20);
    assert!(matches!(tree.wait_timeout(timeout), Err(Error::Timeout(t)) if t == timeout));
    assert!(tree.is_running());

    assert!(slots.finish("stuck", true));
    assert!(tree.wait_timeout(TIMEOUT).unwrap());
}
