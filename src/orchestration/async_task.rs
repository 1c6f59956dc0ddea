//! Concurrent calls as tree leaves.
//!
//! An [`AsyncTask`] runs one function on a [`ThreadPool`] worker and buffers
//! what it produces. Used inside a tree through [`Async<R>`], it reports
//! `done(true)` when the call returned and `done(false)` when it was
//! canceled, panicked or could not be launched.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tasktree::orchestration::Async;
//! use tasktree::tasking::Group;
//! use tasktree::TaskTree;
//!
//! let answer = Rc::new(Cell::new(0));
//! let seen = Rc::clone(&answer);
//! let step = Async::<u64>::new(|task| task.set_concurrent_call_data(|| 6 * 7))
//!     .on_done(move |task| seen.set(task.result().unwrap_or_default()));
//! let tree = TaskTree::new(Group::from_item(step.into()));
//! assert!(tree.run().unwrap());
//! assert_eq!(answer.get(), 42);
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::orchestration::future::{FutureState, Promise};
use crate::orchestration::pool::{Priority, ThreadPool};
use crate::orchestration::synchronizer::FutureSynchronizer;
use crate::tasking::task::{DoneSender, TaskAdapter};
use crate::tasking::CustomTask;
use crate::{ttlog_debug, ttlog_error, ttlog_warn};

type Call<R> = Box<dyn FnOnce(&Promise<R>) + Send + 'static>;
type DoneSlot = Arc<Mutex<Option<DoneSender>>>;

fn lock_slot(slot: &DoneSlot) -> MutexGuard<'_, Option<DoneSender>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The part of an `AsyncTask` that travels to the worker thread.
///
/// Whatever happens to it (run, panic, or dropped unrun by a shut down
/// pool) its drop finishes the shared state and reports through the slot.
struct ConcurrentCall<R> {
    state: Arc<FutureState<R>>,
    call: Option<Call<R>>,
    done: DoneSlot,
}

impl<R> ConcurrentCall<R> {
    fn run(mut self) {
        let Some(call) = self.call.take() else {
            return;
        };
        if !self.state.begin() {
            ttlog_debug!("AsyncTask canceled before it started");
            return;
        }
        let promise = Promise::new(Arc::clone(&self.state));
        if panic::catch_unwind(AssertUnwindSafe(|| call(&promise))).is_err() {
            ttlog_error!("AsyncTask concurrent call panicked");
            self.state.abandon();
        }
    }
}

impl<R> Drop for ConcurrentCall<R> {
    fn drop(&mut self) {
        if self.call.take().is_some() {
            self.state.abandon();
        } else {
            self.state.finish();
        }
        let success = !self.state.is_canceled();
        let mut slot = lock_slot(&self.done);
        if let Some(done) = slot.take() {
            done.done(success);
        }
    }
}

/// Runs one function on a worker thread and keeps its results.
///
/// Dropping an unfinished task cancels it. Without a
/// [`FutureSynchronizer`] the drop then blocks until the worker has let
/// go of the call; with one, the call is handed to the synchronizer.
pub struct AsyncTask<R: Send + 'static> {
    call: Option<Call<R>>,
    pool: Option<ThreadPool>,
    priority: Priority,
    synchronizer: Option<FutureSynchronizer>,
    state: Option<Arc<FutureState<R>>>,
    done: Option<DoneSlot>,
}

impl<R: Send + 'static> Default for AsyncTask<R> {
    fn default() -> Self {
        Self {
            call: None,
            pool: None,
            priority: Priority::Inherit,
            synchronizer: None,
            state: None,
            done: None,
        }
    }
}

impl<R: Send + 'static> AsyncTask<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `call` and keep its return value as the only result.
    pub fn set_concurrent_call_data(&mut self, call: impl FnOnce() -> R + Send + 'static) {
        self.call = Some(Box::new(move |promise: &Promise<R>| {
            promise.add_result(call())
        }));
    }

    /// Run `call` with a promise it reports any number of results to.
    pub fn set_concurrent_call_with_promise(
        &mut self,
        call: impl FnOnce(&Promise<R>) + Send + 'static,
    ) {
        self.call = Some(Box::new(call));
    }

    /// Use `pool` instead of the process-wide default pool.
    pub fn set_thread_pool(&mut self, pool: ThreadPool) {
        self.pool = Some(pool);
    }

    pub fn thread_pool(&self) -> Option<&ThreadPool> {
        self.pool.as_ref()
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_future_synchronizer(&mut self, synchronizer: FutureSynchronizer) {
        self.synchronizer = Some(synchronizer);
    }

    pub fn future_synchronizer(&self) -> Option<&FutureSynchronizer> {
        self.synchronizer.as_ref()
    }

    /// Launch the call outside of any tree.
    pub fn start(&mut self) {
        self.launch(None);
    }

    pub(crate) fn launch(&mut self, done: Option<DoneSender>) {
        self.release();
        let state = FutureState::new();
        self.state = Some(Arc::clone(&state));

        let Some(call) = self.call.take() else {
            ttlog_warn!("AsyncTask started without a concurrent call");
            Self::fail_launch(&state, done);
            return;
        };
        let pool = match &self.pool {
            Some(pool) => pool.clone(),
            None => match ThreadPool::global() {
                Ok(pool) => pool.clone(),
                Err(e) => {
                    ttlog_error!("AsyncTask could not get the default thread pool: {}", e);
                    Self::fail_launch(&state, done);
                    return;
                }
            },
        };

        let slot: DoneSlot = Arc::new(Mutex::new(done));
        self.done = Some(Arc::clone(&slot));
        let call = ConcurrentCall {
            state,
            call: Some(call),
            done: slot,
        };
        pool.submit(self.priority, move || call.run());
    }

    /// Let go of the current call, if any, without reporting it.
    ///
    /// An unfinished call is canceled, then either handed to the
    /// synchronizer or waited for.
    fn release(&mut self) {
        if let Some(slot) = self.done.take() {
            if let Some(done) = lock_slot(&slot).take() {
                done.disarm();
            }
        }
        let Some(state) = self.state.take() else {
            return;
        };
        if state.is_finished() {
            return;
        }
        state.cancel();
        match &self.synchronizer {
            Some(synchronizer) => {
                ttlog_debug!("AsyncTask released while running, handing off to synchronizer");
                synchronizer.add_future(state);
            }
            None => {
                ttlog_debug!("AsyncTask released while running, waiting for cancellation");
                state.wait_for_finished();
            }
        }
    }

    fn fail_launch(state: &FutureState<R>, done: Option<DoneSender>) {
        state.abandon();
        if let Some(done) = done {
            done.done(false);
        }
    }

    /// True once the call returned, was canceled, or failed to launch.
    pub fn is_done(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.is_finished())
    }

    pub fn is_canceled(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.is_canceled())
    }

    /// Ask the call to stop. A call still queued never runs; a running one
    /// sees it through [`Promise::is_canceled`].
    pub fn cancel(&self) {
        if let Some(state) = &self.state {
            state.cancel();
        }
    }

    pub fn wait_for_finished(&self) {
        if let Some(state) = &self.state {
            state.wait_for_finished();
        }
    }

    pub fn is_result_available(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.result_count() > 0)
    }
}

impl<R: Clone + Send + 'static> AsyncTask<R> {
    /// The first result, if any.
    pub fn result(&self) -> Option<R> {
        self.result_at(0)
    }

    pub fn result_at(&self, index: usize) -> Option<R> {
        self.state.as_ref().and_then(|state| state.result_at(index))
    }

    pub fn results(&self) -> Vec<R> {
        self.state
            .as_ref()
            .map(|state| state.results())
            .unwrap_or_default()
    }
}

impl<R: Send + 'static> Drop for AsyncTask<R> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Binds [`AsyncTask`] to the task interface.
pub struct AsyncTaskAdapter<R: Send + 'static> {
    task: AsyncTask<R>,
}

impl<R: Send + 'static> Default for AsyncTaskAdapter<R> {
    fn default() -> Self {
        Self {
            task: AsyncTask::default(),
        }
    }
}

impl<R: Send + 'static> TaskAdapter for AsyncTaskAdapter<R> {
    type Task = AsyncTask<R>;

    fn task(&self) -> &AsyncTask<R> {
        &self.task
    }

    fn task_mut(&mut self) -> &mut AsyncTask<R> {
        &mut self.task
    }

    fn start(&mut self, done: DoneSender) {
        self.task.launch(Some(done));
    }
}

/// Declares an [`AsyncTask`] leaf producing `R`.
pub type Async<R> = CustomTask<AsyncTaskAdapter<R>>;
