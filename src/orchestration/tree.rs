//! The task tree scheduler.
//!
//! A [`TaskTree`] is built once from a [`Group`] and can then be started,
//! stopped and driven. Leaf completions arrive over a channel from any
//! thread and are applied on the thread that owns the tree, either by
//! [`TaskTree::process_pending`] or while blocked in [`TaskTree::wait`].
//!
//! ```
//! use tasktree::tasking::{Group, stop_on_error};
//! use tasktree::TaskTree;
//!
//! let tree = TaskTree::new(Group::new([
//!     stop_on_error(),
//!     Group::sync(|| true).into(),
//!     Group::sync(|| false).into(),
//! ]));
//! assert!(!tree.run().unwrap());
//! ```

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::orchestration::container::{Container, Step};
use crate::tasking::guard::Guard;
use crate::tasking::task::{Completion, CompletionSink, DoneSender};
use crate::tasking::Group;
use crate::{ttlog, ttlog_debug, ttlog_warn};

/// Unique identifier for a task tree instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeId(pub Uuid);

impl TreeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TreeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TreeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notifications published to [`TaskTree::subscribe`] receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "value", rename_all = "snake_case")]
pub enum TreeEvent {
    Started,
    /// Number of leaves finished, skipped or stopped so far in this run.
    ProgressChanged(usize),
    /// The run ended and the root group succeeded.
    Done,
    /// The run ended and the root group failed.
    ErrorOccurred,
}

/// State shared by every container of one tree.
pub(crate) struct Shared {
    pub(crate) guard: Guard,
    running: Cell<bool>,
    progress: Cell<usize>,
    next_token: Cell<u64>,
    sink: RefCell<CompletionSink>,
    subscribers: RefCell<Vec<Sender<TreeEvent>>>,
}

impl Shared {
    fn new(sink: CompletionSink) -> Self {
        Self {
            guard: Guard::default(),
            running: Cell::new(false),
            progress: Cell::new(0),
            next_token: Cell::new(0),
            sink: RefCell::new(sink),
            subscribers: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn next_token(&self) -> u64 {
        let token = self.next_token.get() + 1;
        self.next_token.set(token);
        token
    }

    pub(crate) fn done_sender(&self, path: Vec<usize>, token: u64) -> DoneSender {
        DoneSender::new(self.sink.borrow().clone(), path, token)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.set(running);
    }

    pub(crate) fn advance_progress(&self, count: usize) {
        if count == 0 {
            return;
        }
        let progress = self.progress.get() + count;
        self.progress.set(progress);
        self.emit(TreeEvent::ProgressChanged(progress));
    }

    fn emit(&self, event: TreeEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|subscriber| subscriber.send(event).is_ok());
    }
}

struct TreeInner {
    id: TreeId,
    shared: Shared,
    root: RefCell<Container>,
    completion_tx: Sender<Completion>,
    completions: Receiver<Completion>,
    task_count: usize,
    outcome: Cell<Option<bool>>,
}

impl Drop for TreeInner {
    fn drop(&mut self) {
        if self.shared.running.get() {
            ttlog_warn!("Task tree {} destroyed while running, stopping", self.id.short());
            self.root.get_mut().stop(&self.shared);
            self.shared.set_running(false);
        }
    }
}

/// Runs a task tree built from a [`Group`].
///
/// The tree is single-threaded: it is neither `Send` nor `Sync`, and all of
/// its handlers run on the thread that drives it. Handlers that need to
/// refer back to their own tree should hold a [`WeakTaskTree`].
pub struct TaskTree {
    inner: Rc<TreeInner>,
}

impl TaskTree {
    pub fn new(root: Group) -> Self {
        let (completion_tx, completions) = crossbeam_channel::unbounded();
        let id = TreeId::new();
        let task_count = root.task_count();
        ttlog_debug!(
            "Task tree {} built: {} tasks, root {:?}",
            id.short(),
            task_count,
            root
        );
        let root = Container::build(&root, &mut Vec::new(), true);
        Self {
            inner: Rc::new(TreeInner {
                id,
                shared: Shared::new(CompletionSink::Channel(completion_tx.clone())),
                root: RefCell::new(root),
                completion_tx,
                completions,
                task_count,
                outcome: Cell::new(None),
            }),
        }
    }

    pub fn id(&self) -> TreeId {
        self.inner.id
    }

    /// Replace this tree with a fresh one built from `root`.
    ///
    /// Subscribers of the old tree are not carried over.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] while a run is in progress.
    pub fn set_root(&mut self, root: Group) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        *self = Self::new(root);
        Ok(())
    }

    /// Start a new run.
    ///
    /// Completions reported synchronously while starting are applied before
    /// this returns, so a tree made only of synchronous steps is already
    /// finished afterwards.
    pub fn start(&self) -> Result<()> {
        let sink = CompletionSink::Channel(self.inner.completion_tx.clone());
        self.start_with(sink)
    }

    /// Start a run whose completions go to an enclosing tree, which hands
    /// them back through [`TaskTree::relay`].
    pub(crate) fn start_nested(&self, sink: CompletionSink) -> Result<()> {
        self.start_with(sink)
    }

    /// Apply one completion relayed by the enclosing tree.
    pub(crate) fn relay(&self, completion: Completion) {
        self.handle(completion);
    }

    fn start_with(&self, sink: CompletionSink) -> Result<()> {
        self.check_guard("start")?;
        let shared = &self.inner.shared;
        if shared.running.get() {
            ttlog_warn!(
                "Task tree {} is already running, start() ignored",
                self.inner.id.short()
            );
            return Err(Error::AlreadyRunning);
        }

        ttlog!(
            "Task tree {} started ({} tasks)",
            self.inner.id.short(),
            self.inner.task_count
        );
        *shared.sink.borrow_mut() = sink;
        self.inner.outcome.set(None);
        shared.progress.set(0);
        shared.set_running(true);
        shared.emit(TreeEvent::Started);
        shared.emit(TreeEvent::ProgressChanged(0));

        let step = {
            let mut root = self.inner.root.borrow_mut();
            root.reset();
            root.start(shared)
        };
        self.settle(step);
        self.process_pending()?;
        Ok(())
    }

    /// Abort the current run. No done or error notification fires for it.
    pub fn stop(&self) -> Result<()> {
        self.check_guard("stop")?;
        let shared = &self.inner.shared;
        if !shared.running.get() {
            return Ok(());
        }
        let stopped = self.inner.root.borrow_mut().stop(shared);
        shared.set_running(false);
        shared.advance_progress(stopped);
        ttlog!("Task tree {} stopped", self.inner.id.short());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.shared.running.get()
    }

    /// Total number of leaf tasks in the tree.
    pub fn task_count(&self) -> usize {
        self.inner.task_count
    }

    pub fn progress_value(&self) -> usize {
        self.inner.shared.progress.get()
    }

    /// Outcome of the last run that ended, `None` if none did.
    pub fn outcome(&self) -> Option<bool> {
        self.inner.outcome.get()
    }

    /// Receive every [`TreeEvent`] published from now on.
    pub fn subscribe(&self) -> Receiver<TreeEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner.shared.subscribers.borrow_mut().push(tx);
        rx
    }

    /// Apply every completion that already arrived, without blocking.
    ///
    /// Returns how many completions were handled.
    pub fn process_pending(&self) -> Result<usize> {
        self.check_guard("process_pending")?;
        let mut handled = 0;
        while let Ok(completion) = self.inner.completions.try_recv() {
            self.handle(completion);
            handled += 1;
        }
        Ok(handled)
    }

    /// Block until the current run ends and return its outcome.
    ///
    /// Returns the last outcome when the tree already finished, and
    /// [`Error::NotRunning`] when no run ended (never started or stopped).
    pub fn wait(&self) -> Result<bool> {
        self.wait_until(None)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.wait_until(Some(timeout))
    }

    /// Start the tree and block until it finishes.
    pub fn run(&self) -> Result<bool> {
        self.start()?;
        self.wait()
    }

    pub fn downgrade(&self) -> WeakTaskTree {
        WeakTaskTree {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn wait_until(&self, timeout: Option<Duration>) -> Result<bool> {
        self.check_guard("wait")?;
        self.process_pending()?;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        while self.is_running() {
            let completion = match deadline {
                None => self.inner.completions.recv().ok(),
                Some(deadline) => match self.inner.completions.recv_deadline(deadline) {
                    Ok(completion) => Some(completion),
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
                },
            };
            match completion {
                Some(completion) => self.handle(completion),
                None => return Err(Error::Timeout(timeout.unwrap_or_default())),
            }
        }

        self.inner.outcome.get().ok_or(Error::NotRunning)
    }

    fn handle(&self, completion: Completion) {
        let step = self.inner.root.borrow_mut().deliver(
            &self.inner.shared,
            &completion.path,
            completion.token,
            completion.report,
        );
        self.settle(step);
    }

    fn settle(&self, step: Step) {
        let Step::Finished(success) = step else {
            return;
        };
        let shared = &self.inner.shared;
        shared.set_running(false);
        self.inner.outcome.set(Some(success));
        ttlog!(
            "Task tree {} finished, success={}",
            self.inner.id.short(),
            success
        );
        shared.emit(if success {
            TreeEvent::Done
        } else {
            TreeEvent::ErrorOccurred
        });
    }

    fn check_guard(&self, operation: &'static str) -> Result<()> {
        if self.inner.shared.guard.is_locked() {
            let err = Error::Reentrant { operation };
            ttlog_warn!("Task tree {}: {}", self.inner.id.short(), err);
            return Err(err);
        }
        Ok(())
    }
}

impl Default for TaskTree {
    fn default() -> Self {
        Self::new(Group::default())
    }
}

impl std::fmt::Debug for TaskTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTree")
            .field("id", &self.inner.id)
            .field("running", &self.is_running())
            .field("progress", &self.progress_value())
            .field("task_count", &self.task_count())
            .finish()
    }
}

/// Non-owning reference to a [`TaskTree`].
#[derive(Clone)]
pub struct WeakTaskTree {
    inner: Weak<TreeInner>,
}

impl WeakTaskTree {
    pub fn upgrade(&self) -> Option<TaskTree> {
        self.inner.upgrade().map(|inner| TaskTree { inner })
    }
}
