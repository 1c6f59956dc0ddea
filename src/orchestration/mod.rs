//! Runtime layer of the task tree engine.
//!
//! This module turns a declared [`Group`](crate::tasking::Group) into a
//! running tree: the container state machine, the [`TaskTree`] scheduler
//! and its event stream, and the worker pool that [`AsyncTask`] leaves use
//! to run calls off the coordination thread. A [`TaskTreeTask`] runs a
//! whole tree as one leaf of another.

mod async_task;
mod container;
mod future;
mod pool;
mod synchronizer;
mod tree;
mod tree_task;

pub use async_task::{Async, AsyncTask, AsyncTaskAdapter};
pub use future::Promise;
pub use pool::{Priority, ThreadPool};
pub use synchronizer::FutureSynchronizer;
pub use tree::{TaskTree, TreeEvent, TreeId, WeakTaskTree};
pub use tree_task::{TaskTreeTask, TaskTreeTaskAdapter};
