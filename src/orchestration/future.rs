//! Shared state between a concurrent call and the code waiting for it.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Running,
    Finished,
}

struct Inner<R> {
    status: Status,
    canceled: bool,
    results: Vec<R>,
}

/// Result buffer and lifecycle of one concurrent call.
pub(crate) struct FutureState<R> {
    inner: Mutex<Inner<R>>,
    finished: Condvar,
    cancel: CancellationToken,
}

impl<R> FutureState<R> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                status: Status::Pending,
                canceled: false,
                results: Vec::new(),
            }),
            finished: Condvar::new(),
            cancel: CancellationToken::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark the call as picked up by a worker. Returns false if it was
    /// canceled before it got there.
    pub(crate) fn begin(&self) -> bool {
        let mut inner = self.lock();
        if inner.status != Status::Pending {
            return false;
        }
        inner.status = Status::Running;
        true
    }

    pub(crate) fn finish(&self) {
        let mut inner = self.lock();
        inner.status = Status::Finished;
        drop(inner);
        self.finished.notify_all();
    }

    /// Finish as canceled, keeping no results.
    pub(crate) fn abandon(&self) {
        let mut inner = self.lock();
        inner.canceled = true;
        inner.results.clear();
        inner.status = Status::Finished;
        drop(inner);
        self.cancel.cancel();
        self.finished.notify_all();
    }

    /// Request cancellation. A call that has not started yet finishes
    /// immediately; a running one is expected to notice via its promise.
    pub(crate) fn cancel(&self) {
        let mut inner = self.lock();
        if inner.status == Status::Finished {
            return;
        }
        inner.canceled = true;
        let pending = inner.status == Status::Pending;
        if pending {
            inner.status = Status::Finished;
        }
        drop(inner);
        self.cancel.cancel();
        if pending {
            self.finished.notify_all();
        }
    }

    pub(crate) fn add_result(&self, result: R) {
        let mut inner = self.lock();
        if !inner.canceled {
            inner.results.push(result);
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.lock().status == Status::Finished
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.lock().canceled
    }

    pub(crate) fn wait_for_finished(&self) {
        let mut inner = self.lock();
        while inner.status != Status::Finished {
            inner = self
                .finished
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub(crate) fn result_count(&self) -> usize {
        self.lock().results.len()
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<R: Clone> FutureState<R> {
    pub(crate) fn result_at(&self, index: usize) -> Option<R> {
        self.lock().results.get(index).cloned()
    }

    pub(crate) fn results(&self) -> Vec<R> {
        self.lock().results.clone()
    }
}

/// Handed to a promise-style concurrent call to report results and to
/// check for cancellation.
pub struct Promise<R> {
    state: Arc<FutureState<R>>,
}

impl<R> Promise<R> {
    pub(crate) fn new(state: Arc<FutureState<R>>) -> Self {
        Self { state }
    }

    /// Append one result. Ignored once the call was canceled.
    pub fn add_result(&self, result: R) {
        self.state.add_result(result);
    }

    pub fn is_canceled(&self) -> bool {
        self.state.is_canceled()
    }

    /// Give up from inside the call. The call ends as canceled, so a tree
    /// leaf running it fails; results added afterwards are ignored.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Token cancelled together with the call, for use with async code.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.state.cancellation_token()
    }
}

/// Type-erased view of a future, as kept by a synchronizer.
pub(crate) trait Cancelable: Send + Sync {
    fn cancel(&self);
    fn is_finished(&self) -> bool;
    fn wait_for_finished(&self);
}

impl<R: Send> Cancelable for FutureState<R> {
    fn cancel(&self) {
        FutureState::cancel(self)
    }

    fn is_finished(&self) -> bool {
        FutureState::is_finished(self)
    }

    fn wait_for_finished(&self) {
        FutureState::wait_for_finished(self)
    }
}
