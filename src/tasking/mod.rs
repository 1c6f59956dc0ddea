//! Declarative side of the engine: the task interface, leaf adapters and
//! the group specification a tree is built from.

pub mod group;
pub(crate) mod guard;
pub mod task;
pub mod timeout;

pub use group::{
    continue_on_done, continue_on_error, on_group_done, on_group_dynamic_setup, on_group_error,
    on_group_setup, optional, parallel, sequential, stop_on_done, stop_on_error, workflow_policy,
    CustomTask, ExecuteMode, Group, GroupHandler, GroupItem, SetupResult, TaskHandler,
    WorkflowPolicy,
};
pub use task::{DoneReceiver, DoneSender, Relayed, TaskAdapter, TaskInterface};
pub use timeout::{TimeoutTask, TimeoutTaskAdapter};
