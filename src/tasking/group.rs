//! Declarative task tree specification.
//!
//! A tree is described as nested [`Group`]s. Each group is built from an
//! ordered list of [`GroupItem`]s: child tasks and child groups keep their
//! order, while mode markers, policy markers and handlers are folded into
//! the group's configuration.
//!
//! ```
//! use tasktree::tasking::{parallel, stop_on_done, Group};
//!
//! let root = Group::new([
//!     parallel(),
//!     stop_on_done(),
//!     Group::sync(|| false).into(),
//!     Group::sync(|| true).into(),
//! ]);
//! assert_eq!(root.child_count(), 2);
//! ```

use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::SpecError;
use crate::tasking::task::{AdaptedTask, EndFn, LiveTask, SetupFn, TaskAdapter, TaskHandlers};
use crate::ttlog_warn;

/// How the children of a group are started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMode {
    /// One child at a time, in declared order.
    #[default]
    Sequential,
    /// All children at once.
    Parallel,
}

/// How a group reacts to its children's outcomes and folds them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPolicy {
    /// Fail on the first failing child, otherwise succeed.
    #[default]
    StopOnError,
    /// Run every child; succeed only if all succeeded.
    ContinueOnError,
    /// Succeed on the first succeeding child, otherwise fail.
    StopOnDone,
    /// Run every child; succeed if any succeeded.
    ContinueOnDone,
    /// Run every child and always succeed.
    Optional,
}

impl WorkflowPolicy {
    pub const ALL: [WorkflowPolicy; 5] = [
        WorkflowPolicy::StopOnError,
        WorkflowPolicy::ContinueOnError,
        WorkflowPolicy::StopOnDone,
        WorkflowPolicy::ContinueOnDone,
        WorkflowPolicy::Optional,
    ];

    /// Value of the aggregate before any child reported.
    pub fn initial_success_bit(self) -> bool {
        !matches!(
            self,
            WorkflowPolicy::StopOnDone | WorkflowPolicy::ContinueOnDone
        )
    }

    /// Fold one child's outcome into the aggregate.
    pub fn fold(self, acc: bool, success: bool) -> bool {
        match self {
            WorkflowPolicy::StopOnError | WorkflowPolicy::ContinueOnError => acc && success,
            WorkflowPolicy::StopOnDone | WorkflowPolicy::ContinueOnDone => acc || success,
            WorkflowPolicy::Optional => true,
        }
    }

    /// Whether a child finishing with `success` ends the group right away.
    pub fn stops_on(self, success: bool) -> bool {
        match self {
            WorkflowPolicy::StopOnError => !success,
            WorkflowPolicy::StopOnDone => success,
            _ => false,
        }
    }
}

impl std::fmt::Display for WorkflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowPolicy::StopOnError => write!(f, "stop-on-error"),
            WorkflowPolicy::ContinueOnError => write!(f, "continue-on-error"),
            WorkflowPolicy::StopOnDone => write!(f, "stop-on-done"),
            WorkflowPolicy::ContinueOnDone => write!(f, "continue-on-done"),
            WorkflowPolicy::Optional => write!(f, "optional"),
        }
    }
}

impl std::str::FromStr for WorkflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        WorkflowPolicy::ALL
            .into_iter()
            .find(|p| p.to_string() == normalized)
            .ok_or_else(|| format!("unknown workflow policy: {}", s))
    }
}

/// Returned by a group's dynamic setup handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetupResult {
    /// Start the group's children as usual.
    #[default]
    Continue,
    /// Skip the children and finish the group successfully.
    StopWithSuccess,
    /// Skip the children and finish the group with an error.
    StopWithError,
}

pub(crate) type GroupFn = Rc<dyn Fn()>;
pub(crate) type DynamicSetupFn = Rc<dyn Fn() -> SetupResult>;

/// Callbacks attached to a group.
#[derive(Clone, Default)]
pub struct GroupHandler {
    pub(crate) setup: Option<GroupFn>,
    pub(crate) dynamic_setup: Option<DynamicSetupFn>,
    pub(crate) done: Option<GroupFn>,
    pub(crate) error: Option<GroupFn>,
}

impl GroupHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when the group is entered, before any child starts.
    pub fn on_setup(mut self, handler: impl Fn() + 'static) -> Self {
        self.setup = Some(Rc::new(handler));
        self
    }

    /// Called right after the plain setup; may skip the group's children.
    pub fn on_dynamic_setup(mut self, handler: impl Fn() -> SetupResult + 'static) -> Self {
        self.dynamic_setup = Some(Rc::new(handler));
        self
    }

    pub fn on_done(mut self, handler: impl Fn() + 'static) -> Self {
        self.done = Some(Rc::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl Fn() + 'static) -> Self {
        self.error = Some(Rc::new(handler));
        self
    }

    /// Merge `other` into `self`, reporting every handler that gets replaced.
    fn absorb(&mut self, other: GroupHandler, diagnostics: &mut Vec<SpecError>) {
        fn take<T>(
            slot: &mut Option<T>,
            incoming: Option<T>,
            kind: &'static str,
            diagnostics: &mut Vec<SpecError>,
        ) {
            if let Some(handler) = incoming {
                if slot.is_some() {
                    diagnostics.push(SpecError::HandlerRedefined { kind });
                }
                *slot = Some(handler);
            }
        }
        take(&mut self.setup, other.setup, "setup", diagnostics);
        take(
            &mut self.dynamic_setup,
            other.dynamic_setup,
            "dynamic setup",
            diagnostics,
        );
        take(&mut self.done, other.done, "done", diagnostics);
        take(&mut self.error, other.error, "error", diagnostics);
    }
}

pub(crate) type TaskFactory = Rc<dyn Fn() -> Box<dyn LiveTask>>;

/// Type-erased leaf declaration. `None` when no setup handler was given.
#[derive(Clone)]
pub struct TaskHandler {
    pub(crate) factory: Option<TaskFactory>,
}

/// Declares one leaf run through adapter `A`.
///
/// The setup handler configures the freshly created `A::Task` before it
/// starts; the done or error handler inspects it after it finished.
pub struct CustomTask<A: TaskAdapter> {
    setup: Option<SetupFn<A::Task>>,
    done: Option<EndFn<A::Task>>,
    error: Option<EndFn<A::Task>>,
    _adapter: PhantomData<fn() -> A>,
}

impl<A: TaskAdapter> Default for CustomTask<A> {
    fn default() -> Self {
        Self {
            setup: None,
            done: None,
            error: None,
            _adapter: PhantomData,
        }
    }
}

impl<A: TaskAdapter> CustomTask<A> {
    pub fn new(setup: impl Fn(&mut A::Task) + 'static) -> Self {
        Self {
            setup: Some(Rc::new(setup)),
            ..Self::default()
        }
    }

    pub fn on_done(mut self, handler: impl Fn(&A::Task) + 'static) -> Self {
        self.done = Some(Rc::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl Fn(&A::Task) + 'static) -> Self {
        self.error = Some(Rc::new(handler));
        self
    }
}

impl<A: TaskAdapter> From<CustomTask<A>> for TaskHandler {
    fn from(task: CustomTask<A>) -> Self {
        let factory = task.setup.map(|setup| {
            let handlers = Rc::new(TaskHandlers {
                setup,
                done: task.done,
                error: task.error,
            });
            Rc::new(move || Box::new(AdaptedTask::<A>::new(Rc::clone(&handlers))) as Box<dyn LiveTask>)
                as TaskFactory
        });
        TaskHandler { factory }
    }
}

/// One entry in a group's declaration list.
#[derive(Clone)]
pub enum GroupItem {
    Task(TaskHandler),
    Group(Group),
    Mode(ExecuteMode),
    Policy(WorkflowPolicy),
    Handler(GroupHandler),
}

impl GroupItem {
    fn kind(&self) -> &'static str {
        match self {
            GroupItem::Task(_) => "Task",
            GroupItem::Group(_) => "Group",
            GroupItem::Mode(_) => "Execute mode",
            GroupItem::Policy(_) => "Workflow policy",
            GroupItem::Handler(_) => "Group handler",
        }
    }
}

impl<A: TaskAdapter> From<CustomTask<A>> for GroupItem {
    fn from(task: CustomTask<A>) -> Self {
        GroupItem::Task(task.into())
    }
}

impl From<Group> for GroupItem {
    fn from(group: Group) -> Self {
        GroupItem::Group(group)
    }
}

impl From<ExecuteMode> for GroupItem {
    fn from(mode: ExecuteMode) -> Self {
        GroupItem::Mode(mode)
    }
}

impl From<WorkflowPolicy> for GroupItem {
    fn from(policy: WorkflowPolicy) -> Self {
        GroupItem::Policy(policy)
    }
}

impl From<GroupHandler> for GroupItem {
    fn from(handler: GroupHandler) -> Self {
        GroupItem::Handler(handler)
    }
}

pub fn sequential() -> GroupItem {
    GroupItem::Mode(ExecuteMode::Sequential)
}

pub fn parallel() -> GroupItem {
    GroupItem::Mode(ExecuteMode::Parallel)
}

pub fn workflow_policy(policy: WorkflowPolicy) -> GroupItem {
    GroupItem::Policy(policy)
}

pub fn stop_on_error() -> GroupItem {
    workflow_policy(WorkflowPolicy::StopOnError)
}

pub fn continue_on_error() -> GroupItem {
    workflow_policy(WorkflowPolicy::ContinueOnError)
}

pub fn stop_on_done() -> GroupItem {
    workflow_policy(WorkflowPolicy::StopOnDone)
}

pub fn continue_on_done() -> GroupItem {
    workflow_policy(WorkflowPolicy::ContinueOnDone)
}

pub fn optional() -> GroupItem {
    workflow_policy(WorkflowPolicy::Optional)
}

pub fn on_group_setup(handler: impl Fn() + 'static) -> GroupItem {
    GroupHandler::new().on_setup(handler).into()
}

pub fn on_group_dynamic_setup(handler: impl Fn() -> SetupResult + 'static) -> GroupItem {
    GroupHandler::new().on_dynamic_setup(handler).into()
}

pub fn on_group_done(handler: impl Fn() + 'static) -> GroupItem {
    GroupHandler::new().on_done(handler).into()
}

pub fn on_group_error(handler: impl Fn() + 'static) -> GroupItem {
    GroupHandler::new().on_error(handler).into()
}

/// A normalized child of a group.
#[derive(Clone)]
pub(crate) enum GroupChild {
    Task(TaskFactory),
    Group(Group),
}

/// A group of tasks and nested groups with one execute mode, one workflow
/// policy and at most one handler of each kind.
///
/// Groups are immutable once built and cheap to clone; the same group can
/// seed any number of independent task trees.
#[derive(Clone, Default)]
pub struct Group {
    pub(crate) children: Vec<GroupChild>,
    pub(crate) mode: ExecuteMode,
    pub(crate) policy: WorkflowPolicy,
    pub(crate) handler: GroupHandler,
    diagnostics: Vec<SpecError>,
}

impl Group {
    pub fn new(items: impl IntoIterator<Item = GroupItem>) -> Self {
        let mut group = Group::default();
        let mut mode_set = false;
        let mut policy_set = false;

        for item in items {
            match item {
                GroupItem::Task(TaskHandler {
                    factory: Some(factory),
                }) => group.children.push(GroupChild::Task(factory)),
                GroupItem::Task(TaskHandler { factory: None }) => {
                    group.diagnostics.push(SpecError::MissingSetupHandler)
                }
                GroupItem::Group(child) => group.children.push(GroupChild::Group(child)),
                GroupItem::Mode(mode) => {
                    if mode_set {
                        group.diagnostics.push(SpecError::ModeRedefined);
                    }
                    group.mode = mode;
                    mode_set = true;
                }
                GroupItem::Policy(policy) => {
                    if policy_set {
                        group.diagnostics.push(SpecError::PolicyRedefined);
                    }
                    group.policy = policy;
                    policy_set = true;
                }
                GroupItem::Handler(handler) => {
                    group.handler.absorb(handler, &mut group.diagnostics)
                }
            }
        }

        for diagnostic in &group.diagnostics {
            ttlog_warn!("{}", diagnostic);
        }
        group
    }

    /// Turn a standalone item into a tree root.
    ///
    /// A group is used as is and a task is wrapped into a one-child group.
    /// Markers and handlers have no group to configure; they are reported
    /// and an empty group is returned.
    pub fn from_item(item: GroupItem) -> Self {
        match item {
            GroupItem::Group(group) => group,
            task @ GroupItem::Task(_) => Group::new([task]),
            other => {
                let diagnostic = SpecError::NotAGroup { kind: other.kind() };
                ttlog_warn!("{}", diagnostic);
                Group {
                    diagnostics: vec![diagnostic],
                    ..Group::default()
                }
            }
        }
    }

    /// A synchronous inline step: runs `handler` when reached and finishes
    /// with its result. It is not counted as a task.
    pub fn sync(handler: impl Fn() -> bool + 'static) -> Self {
        Group::new([on_group_dynamic_setup(move || {
            if handler() {
                SetupResult::StopWithSuccess
            } else {
                SetupResult::StopWithError
            }
        })])
    }

    pub fn execute_mode(&self) -> ExecuteMode {
        self.mode
    }

    pub fn workflow_policy(&self) -> WorkflowPolicy {
        self.policy
    }

    /// Number of direct children (tasks and groups).
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Number of leaf tasks in the whole subtree.
    pub fn task_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                GroupChild::Task(_) => 1,
                GroupChild::Group(group) => group.task_count(),
            })
            .sum()
    }

    /// Usage errors found while building this group (not its children).
    pub fn diagnostics(&self) -> &[SpecError] {
        &self.diagnostics
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .field("children", &self.children.len())
            .field("tasks", &self.task_count())
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}
