//! Worker thread pool for concurrent calls.
//!
//! The `ThreadPool` runs submitted jobs on the blocking threads of a tokio
//! runtime, with at most `max_threads` jobs active at once. Jobs waiting for
//! a free slot are kept in a priority queue: higher priorities run first,
//! jobs of equal priority run in submission order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::runtime::{Handle, Runtime};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::{ttlog_debug, ttlog_error};

/// Scheduling priority of a submitted job.
///
/// `Inherit` resolves to the pool's default priority, which itself
/// defaults to `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Idle,
    Lowest,
    Low,
    Normal,
    High,
    Highest,
    TimeCritical,
    #[default]
    Inherit,
}

impl Priority {
    /// Position in the run queue; larger runs first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Idle => 0,
            Priority::Lowest => 1,
            Priority::Low => 2,
            Priority::Normal | Priority::Inherit => 3,
            Priority::High => 4,
            Priority::Highest => 5,
            Priority::TimeCritical => 6,
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueuedJob {
    rank: u8,
    sequence: u64,
    job: Job,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .cmp(&other.rank)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
struct PoolState {
    queue: BinaryHeap<QueuedJob>,
    active: usize,
    sequence: u64,
}

struct PoolShared {
    handle: Handle,
    max_threads: usize,
    default_priority: Priority,
    state: Mutex<PoolState>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start queued jobs while there are free slots.
    fn dispatch(self: &Arc<Self>) {
        loop {
            let job = {
                let mut state = self.lock();
                if state.active >= self.max_threads {
                    return;
                }
                let Some(queued) = state.queue.pop() else {
                    return;
                };
                state.active += 1;
                queued.job
            };

            let shared = Arc::clone(self);
            self.handle.spawn_blocking(move || {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    ttlog_error!("Thread pool job panicked");
                }
                shared.lock().active -= 1;
                shared.dispatch();
            });
        }
    }
}

/// Runtime created by [`ThreadPool::with_config`].
///
/// Dropped without waiting: jobs still queued are discarded and running
/// ones finish on their threads, so releasing the last pool handle never
/// blocks and is allowed inside async code.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            ttlog_debug!("ThreadPool runtime shutting down in the background");
            runtime.shutdown_background();
        }
    }
}

/// A bounded pool of worker threads with a priority run queue.
///
/// Cloning a `ThreadPool` yields another handle to the same pool.
///
/// # Example
///
/// ```
/// use tasktree::orchestration::{Priority, ThreadPool};
///
/// let pool = ThreadPool::new(2).unwrap();
/// let (tx, rx) = crossbeam_channel::bounded(1);
/// pool.submit(Priority::High, move || tx.send(6 * 7).unwrap());
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
#[derive(Clone)]
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    _runtime: Option<Arc<OwnedRuntime>>,
}

impl ThreadPool {
    /// Create a pool with its own runtime and `max_threads` worker slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pool`] if the runtime cannot be created.
    pub fn new(max_threads: usize) -> Result<Self> {
        Self::with_config(&Config {
            worker_threads: Some(max_threads),
            ..Config::default()
        })
    }

    /// Create a pool sized and named from `config`.
    pub fn with_config(config: &Config) -> Result<Self> {
        let max_threads = config.effective_worker_threads();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_threads)
            .thread_name(config.thread_name.clone())
            .enable_time()
            .build()
            .map_err(|e| Error::Pool(e.to_string()))?;
        ttlog_debug!(
            "ThreadPool created: {} threads named {}",
            max_threads,
            config.thread_name
        );
        let shared = Self::new_shared(runtime.handle().clone(), max_threads, config.default_priority);
        Ok(Self {
            shared,
            _runtime: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    /// Create a pool that runs its jobs on an existing runtime.
    pub fn from_handle(handle: Handle, max_threads: usize) -> Self {
        Self {
            shared: Self::new_shared(handle, max_threads.max(1), Priority::Inherit),
            _runtime: None,
        }
    }

    /// The process-wide default pool, configured from the environment.
    pub fn global() -> Result<&'static ThreadPool> {
        static GLOBAL: OnceLock<ThreadPool> = OnceLock::new();
        if let Some(pool) = GLOBAL.get() {
            return Ok(pool);
        }
        let pool = ThreadPool::with_config(&Config::default().apply_env())?;
        Ok(GLOBAL.get_or_init(|| pool))
    }

    fn new_shared(handle: Handle, max_threads: usize, default_priority: Priority) -> Arc<PoolShared> {
        Arc::new(PoolShared {
            handle,
            max_threads,
            default_priority,
            state: Mutex::new(PoolState::default()),
        })
    }

    /// Queue `job` to run on a worker thread.
    ///
    /// A job that panics is logged and its slot released; the panic does
    /// not reach the caller.
    pub fn submit(&self, priority: Priority, job: impl FnOnce() + Send + 'static) {
        let priority = match priority {
            Priority::Inherit => self.shared.default_priority,
            other => other,
        };
        {
            let mut state = self.shared.lock();
            state.sequence += 1;
            let sequence = state.sequence;
            state.queue.push(QueuedJob {
                rank: priority.rank(),
                sequence,
                job: Box::new(job),
            });
        }
        self.shared.dispatch();
    }

    pub fn max_threads(&self) -> usize {
        self.shared.max_threads
    }

    /// Number of jobs currently running.
    pub fn active_count(&self) -> usize {
        self.shared.lock().active
    }

    /// Number of jobs waiting for a free slot.
    pub fn queued_count(&self) -> usize {
        self.shared.lock().queue.len()
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("max_threads", &self.max_threads())
            .field("active", &self.active_count())
            .field("queued", &self.queued_count())
            .finish()
    }
}
