//! A whole task tree as one leaf of another.
//!
//! The nested tree shares the enclosing tree's coordination thread: its
//! leaves report into the enclosing tree's channel, wrapped with the path of
//! the leaf that runs it, and are applied when the enclosing tree processes
//! them. The leaf finishes with the nested tree's outcome.
//!
//! ```
//! use tasktree::orchestration::TaskTreeTask;
//! use tasktree::tasking::{optional, Group};
//! use tasktree::TaskTree;
//!
//! let inner = Group::new([optional(), Group::sync(|| false).into()]);
//! let tree = TaskTree::new(Group::from_item(
//!     TaskTreeTask::new(move |nested| nested.set_root(inner.clone()).unwrap()).into(),
//! ));
//! assert!(tree.run().unwrap());
//! ```

use crate::orchestration::tree::TaskTree;
use crate::tasking::task::{DoneSender, Relayed, TaskAdapter};
use crate::tasking::CustomTask;
use crate::{ttlog_debug, ttlog_warn};

/// Binds a nested [`TaskTree`] to the task interface.
///
/// Started without an enclosing tree (a detached sender), the nested tree
/// is run to completion inside `start()`.
#[derive(Default)]
pub struct TaskTreeTaskAdapter {
    tree: TaskTree,
    done: Option<DoneSender>,
}

impl TaskTreeTaskAdapter {
    /// Report once the nested run ended.
    fn report(&mut self) {
        if self.tree.is_running() {
            return;
        }
        if let Some(done) = self.done.take() {
            let success = self.tree.outcome().unwrap_or(false);
            ttlog_debug!("Nested tree {} finished, success={}", self.tree.id().short(), success);
            done.done(success);
        }
    }
}

impl TaskAdapter for TaskTreeTaskAdapter {
    type Task = TaskTree;

    fn task(&self) -> &TaskTree {
        &self.tree
    }

    fn task_mut(&mut self) -> &mut TaskTree {
        &mut self.tree
    }

    fn start(&mut self, done: DoneSender) {
        let Some(sink) = done.relay_sink() else {
            done.done(self.tree.run().unwrap_or(false));
            return;
        };
        if let Err(e) = self.tree.start_nested(sink) {
            ttlog_warn!("Nested tree {} not started: {}", self.tree.id().short(), e);
            done.done(false);
            return;
        }
        self.done = Some(done);
        self.report();
    }

    fn relay(&mut self, completion: Relayed) {
        self.tree.relay(completion.0);
        self.report();
    }
}

impl Drop for TaskTreeTaskAdapter {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            done.disarm();
        }
    }
}

/// Declares a leaf running a nested [`TaskTree`], set up with
/// [`TaskTree::set_root`].
pub type TaskTreeTask = CustomTask<TaskTreeTaskAdapter>;
