//! The task interface every leaf of a tree implements.
//!
//! A task is started once per run and reports exactly one boolean outcome
//! through the [`DoneSender`] it was started with. The sender may travel to
//! any thread; the outcome is delivered back to the tree's coordination
//! thread through a channel, so a task that finishes synchronously inside
//! `start()` is observed exactly like one that finishes later.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::rc::Rc;
use std::time::Duration;

/// A completion routed back to the tree: which leaf, which run of it, and
/// what it reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Completion {
    pub path: Vec<usize>,
    pub token: u64,
    pub report: Report,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Report {
    /// The leaf finished.
    Done(bool),
    /// A completion of a tree running inside the leaf, to be applied by it.
    Nested(Box<Completion>),
}

/// Where a tree's leaves send their completions.
#[derive(Debug, Clone)]
pub(crate) enum CompletionSink {
    /// The tree's own channel.
    Channel(Sender<Completion>),
    /// A channel nobody routes nested completions through.
    Detached(Sender<Completion>),
    /// Wrapped into a [`Report::Nested`] for the leaf at `path` of the
    /// enclosing tree.
    Relay {
        parent: Box<CompletionSink>,
        path: Vec<usize>,
        token: u64,
    },
}

impl CompletionSink {
    pub(crate) fn send(&self, completion: Completion) {
        match self {
            CompletionSink::Channel(tx) | CompletionSink::Detached(tx) => {
                let _ = tx.send(completion);
            }
            CompletionSink::Relay {
                parent,
                path,
                token,
            } => parent.send(Completion {
                path: path.clone(),
                token: *token,
                report: Report::Nested(Box::new(completion)),
            }),
        }
    }
}

/// One-shot completion channel handed to a task on start.
///
/// Consuming [`DoneSender::done`] reports the outcome. Dropping the sender
/// without reporting counts as a failure, so a task that loses it (for
/// example a worker that panicked) still finishes its node.
#[derive(Debug)]
pub struct DoneSender {
    sink: Option<CompletionSink>,
    path: Vec<usize>,
    token: u64,
}

impl DoneSender {
    pub(crate) fn new(sink: CompletionSink, path: Vec<usize>, token: u64) -> Self {
        Self {
            sink: Some(sink),
            path,
            token,
        }
    }

    /// A sender that is not attached to any tree, paired with a receiver
    /// that observes the reported outcome. Useful to drive a task directly.
    pub fn detached() -> (Self, DoneReceiver) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (
            Self::new(CompletionSink::Detached(tx), Vec::new(), 0),
            DoneReceiver { rx },
        )
    }

    /// Report the outcome of the task.
    pub fn done(mut self, success: bool) {
        self.send(success);
    }

    /// Give up the right to report without reporting anything.
    pub fn disarm(mut self) {
        self.sink = None;
    }

    /// Sink for a tree nested in this task, whose completions come back
    /// through [`TaskAdapter::relay`]. `None` when this sender is detached.
    pub(crate) fn relay_sink(&self) -> Option<CompletionSink> {
        match self.sink.as_ref()? {
            CompletionSink::Detached(_) => None,
            sink => Some(CompletionSink::Relay {
                parent: Box::new(sink.clone()),
                path: self.path.clone(),
                token: self.token,
            }),
        }
    }

    fn send(&mut self, success: bool) {
        if let Some(sink) = self.sink.take() {
            sink.send(Completion {
                path: std::mem::take(&mut self.path),
                token: self.token,
                report: Report::Done(success),
            });
        }
    }
}

impl Drop for DoneSender {
    fn drop(&mut self) {
        self.send(false);
    }
}

/// Receiving end of [`DoneSender::detached`].
pub struct DoneReceiver {
    rx: Receiver<Completion>,
}

impl DoneReceiver {
    pub fn try_recv(&self) -> Option<bool> {
        self.rx.try_recv().ok().and_then(Self::outcome)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<bool> {
        match self.rx.recv_timeout(timeout) {
            Ok(completion) => Self::outcome(completion),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn outcome(completion: Completion) -> Option<bool> {
        match completion.report {
            Report::Done(success) => Some(success),
            Report::Nested(_) => None,
        }
    }
}

/// A completion of a tree nested in a task, handed back to the task's
/// adapter on the coordination thread.
#[derive(Debug)]
pub struct Relayed(pub(crate) Completion);

/// The minimal contract the engine relies on.
pub trait TaskInterface {
    fn start(&mut self, done: DoneSender);
}

/// Binds a concrete operation type to [`TaskInterface`].
///
/// The adapter owns the operation (`Task`), exposes it to the setup and
/// done/error handlers of a [`CustomTask`](crate::tasking::CustomTask), and
/// translates the operation's own notion of "finished" into one call on the
/// `DoneSender`.
pub trait TaskAdapter: Default + 'static {
    type Task: 'static;

    fn task(&self) -> &Self::Task;
    fn task_mut(&mut self) -> &mut Self::Task;
    fn start(&mut self, done: DoneSender);

    /// Apply a completion of a tree this task runs inside itself. Only
    /// adapters that nest a tree receive any.
    fn relay(&mut self, _completion: Relayed) {}
}

impl<A: TaskAdapter> TaskInterface for A {
    fn start(&mut self, done: DoneSender) {
        TaskAdapter::start(self, done)
    }
}

pub(crate) type SetupFn<T> = Rc<dyn Fn(&mut T)>;
pub(crate) type EndFn<T> = Rc<dyn Fn(&T)>;

/// Handlers attached to one declared leaf.
pub(crate) struct TaskHandlers<T> {
    pub setup: SetupFn<T>,
    pub done: Option<EndFn<T>>,
    pub error: Option<EndFn<T>>,
}

/// A task instance that is alive while its leaf runs, with its handlers.
pub(crate) trait LiveTask {
    fn setup(&mut self);
    fn start(&mut self, done: DoneSender);
    fn relay(&mut self, completion: Completion);
    fn finish(&self, success: bool);
}

pub(crate) struct AdaptedTask<A: TaskAdapter> {
    adapter: A,
    handlers: Rc<TaskHandlers<A::Task>>,
}

impl<A: TaskAdapter> AdaptedTask<A> {
    pub(crate) fn new(handlers: Rc<TaskHandlers<A::Task>>) -> Self {
        Self {
            adapter: A::default(),
            handlers,
        }
    }
}

impl<A: TaskAdapter> LiveTask for AdaptedTask<A> {
    fn setup(&mut self) {
        (self.handlers.setup)(self.adapter.task_mut());
    }

    fn start(&mut self, done: DoneSender) {
        TaskInterface::start(&mut self.adapter, done);
    }

    fn relay(&mut self, completion: Completion) {
        TaskAdapter::relay(&mut self.adapter, Relayed(completion));
    }

    fn finish(&self, success: bool) {
        let handler = if success {
            &self.handlers.done
        } else {
            &self.handlers.error
        };
        if let Some(handler) = handler {
            handler(self.adapter.task());
        }
    }
}
