//! Declarative task tree scheduler.
//!
//! A tree is declared as nested [`Group`](tasking::Group)s of tasks, each
//! group with an execute mode and a workflow policy, and run by a
//! [`TaskTree`]. Leaves implement [`TaskAdapter`](tasking::TaskAdapter);
//! [`AsyncTask`](orchestration::AsyncTask) runs a function on a worker pool.
//!
//! ```
//! use tasktree::tasking::{parallel, stop_on_done, Group};
//! use tasktree::TaskTree;
//!
//! let tree = TaskTree::new(Group::new([
//!     parallel(),
//!     stop_on_done(),
//!     Group::sync(|| false).into(),
//!     Group::sync(|| true).into(),
//! ]));
//! assert!(tree.run().unwrap());
//! ```

pub mod config;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod tasking;

pub use config::Config;
pub use error::{Error, Result, SpecError};
pub use orchestration::{TaskTree, TreeEvent};
