//! Execution tree: the runtime mirror of a [`Group`].
//!
//! Every group becomes a [`Container`] and every child a [`Node`]. All state
//! transitions happen on the tree's coordination thread; leaves running
//! elsewhere only ever talk back through their `DoneSender`, and their
//! completions are routed down here by path.

use std::rc::Rc;

use crate::orchestration::tree::Shared;
use crate::tasking::group::{GroupChild, GroupHandler, TaskFactory};
use crate::tasking::task::{Completion, LiveTask, Report};
use crate::tasking::{ExecuteMode, Group, SetupResult, WorkflowPolicy};
use crate::{ttlog_debug, ttlog_trace};

/// Outcome of starting a node or delivering a completion to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// The node is still running (or the completion was not for it).
    Running,
    /// The node finished with the given outcome.
    Finished(bool),
}

/// What a container does after recording one child outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Advance {
    Wait,
    StartNext,
    Finished(bool),
}

enum LeafState {
    Idle,
    Running { task: Box<dyn LiveTask>, token: u64 },
    Finished,
}

pub(crate) struct TaskNode {
    factory: TaskFactory,
    path: Vec<usize>,
    state: LeafState,
}

impl TaskNode {
    fn start(&mut self, shared: &Shared) -> Step {
        let mut task = (self.factory)();
        let token = shared.next_token();
        let done = shared.done_sender(self.path.clone(), token);
        {
            let _locker = shared.guard.lock();
            task.setup();
            task.start(done);
        }
        ttlog_trace!("Leaf {:?} started (token {})", self.path, token);
        self.state = LeafState::Running { task, token };
        Step::Running
    }

    fn complete(&mut self, shared: &Shared, token: u64, success: bool) -> Step {
        match std::mem::replace(&mut self.state, LeafState::Finished) {
            LeafState::Running { task, token: live } if live == token => {
                ttlog_trace!("Leaf {:?} finished, success={}", self.path, success);
                {
                    let _locker = shared.guard.lock();
                    task.finish(success);
                    drop(task);
                }
                shared.advance_progress(1);
                Step::Finished(success)
            }
            previous => {
                ttlog_trace!("Ignoring stale completion for leaf {:?}", self.path);
                self.state = previous;
                Step::Running
            }
        }
    }

    /// Hand a completion of the tree nested in this leaf to its task.
    fn relay(&mut self, shared: &Shared, token: u64, completion: Completion) {
        match &mut self.state {
            LeafState::Running { task, token: live } if *live == token => {
                let _locker = shared.guard.lock();
                task.relay(completion);
            }
            _ => ttlog_trace!("Ignoring stale nested completion for leaf {:?}", self.path),
        }
    }

    fn stop(&mut self, shared: &Shared) -> usize {
        match std::mem::replace(&mut self.state, LeafState::Finished) {
            LeafState::Idle => 1,
            LeafState::Running { task, .. } => {
                ttlog_trace!("Leaf {:?} stopped", self.path);
                let _locker = shared.guard.lock();
                drop(task);
                1
            }
            LeafState::Finished => 0,
        }
    }

    fn reset(&mut self) {
        self.state = LeafState::Idle;
    }
}

pub(crate) enum Node {
    Task(TaskNode),
    Group(Container),
}

impl Node {
    fn start(&mut self, shared: &Shared) -> Step {
        match self {
            Node::Task(leaf) => leaf.start(shared),
            Node::Group(container) => container.start(shared),
        }
    }

    fn stop(&mut self, shared: &Shared) -> usize {
        match self {
            Node::Task(leaf) => leaf.stop(shared),
            Node::Group(container) => container.stop(shared),
        }
    }

    fn reset(&mut self) {
        match self {
            Node::Task(leaf) => leaf.reset(),
            Node::Group(container) => container.reset(),
        }
    }
}

/// Runtime state of one group.
pub(crate) struct Container {
    mode: ExecuteMode,
    policy: WorkflowPolicy,
    handler: GroupHandler,
    children: Vec<Node>,
    /// Number of children that reported while running; `None` when idle.
    current: Option<usize>,
    success_bit: bool,
    is_root: bool,
}

impl Container {
    pub(crate) fn build(group: &Group, path: &mut Vec<usize>, is_root: bool) -> Self {
        let children = group
            .children
            .iter()
            .enumerate()
            .map(|(index, child)| {
                path.push(index);
                let node = match child {
                    GroupChild::Task(factory) => Node::Task(TaskNode {
                        factory: Rc::clone(factory),
                        path: path.clone(),
                        state: LeafState::Idle,
                    }),
                    GroupChild::Group(group) => Node::Group(Container::build(group, path, false)),
                };
                path.pop();
                node
            })
            .collect();

        Self {
            mode: group.mode,
            policy: group.policy,
            handler: group.handler.clone(),
            children,
            current: None,
            success_bit: group.policy.initial_success_bit(),
            is_root,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.current.is_some()
    }

    pub(crate) fn start(&mut self, shared: &Shared) -> Step {
        if let Some(setup) = &self.handler.setup {
            let _locker = shared.guard.lock();
            setup();
        }
        let setup_result = match &self.handler.dynamic_setup {
            Some(dynamic_setup) => {
                let _locker = shared.guard.lock();
                dynamic_setup()
            }
            None => SetupResult::Continue,
        };
        match setup_result {
            SetupResult::Continue => {}
            SetupResult::StopWithSuccess => return self.skip(shared, true),
            SetupResult::StopWithError => return self.skip(shared, false),
        }

        if self.children.is_empty() {
            return Step::Finished(self.finalize(shared, true));
        }

        self.success_bit = self.policy.initial_success_bit();
        self.current = Some(0);

        match self.mode {
            ExecuteMode::Sequential => self.resume(shared, Advance::StartNext),
            ExecuteMode::Parallel => {
                for index in 0..self.children.len() {
                    if let Step::Finished(success) = self.children[index].start(shared) {
                        if let Advance::Finished(result) = self.record(shared, success) {
                            return Step::Finished(self.finalize(shared, result));
                        }
                    }
                }
                Step::Running
            }
        }
    }

    /// Abort this subtree without invoking any done or error handler.
    ///
    /// Returns the number of leaves that had not finished yet.
    pub(crate) fn stop(&mut self, shared: &Shared) -> usize {
        self.current = None;
        self.children
            .iter_mut()
            .map(|child| child.stop(shared))
            .sum()
    }

    pub(crate) fn reset(&mut self) {
        self.current = None;
        self.success_bit = self.policy.initial_success_bit();
        for child in &mut self.children {
            child.reset();
        }
    }

    /// Route a leaf completion to the leaf at `path`.
    pub(crate) fn deliver(&mut self, shared: &Shared, path: &[usize], token: u64, report: Report) -> Step {
        let Some((&index, rest)) = path.split_first() else {
            return Step::Running;
        };
        if !self.is_running() {
            ttlog_trace!("Completion for idle group ignored");
            return Step::Running;
        }
        let step = match self.children.get_mut(index) {
            Some(Node::Task(leaf)) if rest.is_empty() => match report {
                Report::Done(success) => leaf.complete(shared, token, success),
                Report::Nested(completion) => {
                    leaf.relay(shared, token, *completion);
                    Step::Running
                }
            },
            Some(Node::Group(container)) => container.deliver(shared, rest, token, report),
            _ => Step::Running,
        };
        match step {
            Step::Running => Step::Running,
            Step::Finished(success) => {
                let advance = self.record(shared, success);
                self.resume(shared, advance)
            }
        }
    }

    fn record(&mut self, shared: &Shared, success: bool) -> Advance {
        if self.policy.stops_on(success) {
            ttlog_debug!(
                "{} group stops early, success={}",
                self.policy,
                success
            );
            let skipped = self.stop(shared);
            shared.advance_progress(skipped);
            return Advance::Finished(success);
        }

        self.success_bit = self.policy.fold(self.success_bit, success);
        let finished = self.current.map_or(1, |count| count + 1);
        self.current = Some(finished);

        if finished >= self.children.len() {
            Advance::Finished(self.success_bit)
        } else if self.mode == ExecuteMode::Sequential {
            Advance::StartNext
        } else {
            Advance::Wait
        }
    }

    fn resume(&mut self, shared: &Shared, mut advance: Advance) -> Step {
        loop {
            match advance {
                Advance::Wait => return Step::Running,
                Advance::Finished(success) => return Step::Finished(self.finalize(shared, success)),
                Advance::StartNext => {
                    let Some(index) = self.current else {
                        return Step::Running;
                    };
                    match self.children[index].start(shared) {
                        Step::Running => return Step::Running,
                        Step::Finished(success) => advance = self.record(shared, success),
                    }
                }
            }
        }
    }

    /// Finish without starting any child, counting all leaves as skipped.
    fn skip(&mut self, shared: &Shared, success: bool) -> Step {
        let skipped = self.stop(shared);
        shared.advance_progress(skipped);
        Step::Finished(self.finalize(shared, success))
    }

    fn finalize(&mut self, shared: &Shared, success: bool) -> bool {
        self.current = None;
        if self.is_root {
            shared.set_running(false);
        }
        let handler = if success {
            &self.handler.done
        } else {
            &self.handler.error
        };
        if let Some(handler) = handler {
            let _locker = shared.guard.lock();
            handler();
        }
        success
    }
}
